//! Agent 层：ResearchAgent（问题 → Explanation Document）与 CodeAgent（文档 → Scene Code + Sync Manifest）
//!
//! 两类 Agent 都是无状态协作者，只通过 trait 暴露给 Orchestrator；超时与取消由调用方施加。

pub mod code;
pub mod plan;
pub mod prompts;
pub mod research;
pub mod template;

use async_trait::async_trait;

use crate::core::error::{CodeGenFailure, ResearchFailure};
use crate::schema::{ExplanationDocument, SceneCode, SyncManifest};

pub use code::CodeAgent;
pub use plan::ResearchPlan;
pub use research::ResearchAgent;
pub use template::TemplateSceneWriter;

/// 研究阶段
#[async_trait]
pub trait Researcher: Send + Sync {
    /// `feedback` 为上一轮失败的修正提示，首次调用为空
    async fn research(
        &self,
        question: &str,
        feedback: &[String],
    ) -> Result<ExplanationDocument, ResearchFailure>;
}

/// 代码生成阶段产物
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedScene {
    pub scene: SceneCode,
    pub manifest: SyncManifest,
    /// 时间轴修正记录
    pub adjustments: Vec<String>,
}

/// 代码生成阶段
#[async_trait]
pub trait SceneGenerator: Send + Sync {
    async fn generate(
        &self,
        document: &ExplanationDocument,
        feedback: &[String],
    ) -> Result<GeneratedScene, CodeGenFailure>;
}

/// 从模型输出中提取 JSON 块（```json ... ``` 或首个 '{' 到最后一个 '}'）
pub fn extract_json_block(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}
