//! 模型输出格式的 JSON Schema（schemars 自动生成）
//!
//! 拼入 system prompt，减少 LLM 输出格式错误。

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use crate::llm::JsonShape;
use crate::schema::document::ExplanationDocument;
use crate::schema::manifest::SyncManifest;

/// CodeAgent 要求模型返回的结构
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SceneDraft {
    /// Manim Scene 类名
    pub scene_name: String,
    /// 完整 Python 源码；每个 section 以 `# section: <id>` 开头，每个使用的 cue 标注 `# cue: <id>`
    pub scene_code: String,
    /// 声明的时间轴；可省略，省略时按章节时长自动排布
    #[serde(default)]
    pub manifest: Option<SyncManifest>,
}

/// Explanation Document 的 JSON Schema 字符串
pub fn document_schema_json() -> String {
    let schema = schema_for!(ExplanationDocument);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

/// SceneDraft 的 JSON Schema 字符串
pub fn scene_draft_schema_json() -> String {
    let schema = schema_for!(SceneDraft);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

/// 研究阶段的结构化输出要求
pub fn document_shape() -> JsonShape {
    let schema = schema_for!(ExplanationDocument);
    JsonShape::new(
        "explanation_document",
        serde_json::to_value(&schema).unwrap_or_default(),
    )
}

/// 代码生成阶段的结构化输出要求
pub fn scene_draft_shape() -> JsonShape {
    let schema = schema_for!(SceneDraft);
    JsonShape::new("scene_draft", serde_json::to_value(&schema).unwrap_or_default())
}
