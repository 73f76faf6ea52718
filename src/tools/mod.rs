//! 工具适配器：文献检索（在线与本地资料）、数值计算、代码分析、图标查找
//!
//! 适配器本身无状态；并发上限、超时与审计日志统一由 ToolExecutor 施加。

pub mod code_analysis;
pub mod compute;
pub mod executor;
pub mod icons;
pub mod local_docs;
pub mod search;
pub mod toolbox;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use code_analysis::{CodeAnalyzer, CodeSummary};
pub use compute::{evaluate, Calculator, ComputeAdapter, ComputeError, Computation};
pub use executor::ToolExecutor;
pub use icons::{IconLibrary, IconLookup, IconReference};
pub use local_docs::LocalDocuments;
pub use search::{parse_arxiv_feed, ArxivSearch, WikipediaSearch};
pub use toolbox::{SearchHit, Toolbox};

/// 检索结果条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    /// 来源内唯一标识（arXiv abs URL / Wikipedia 页面 URL）
    pub id: String,
    pub title: String,
    pub summary: String,
    pub url: String,
    #[serde(default)]
    pub authors: Vec<String>,
}

/// 工具调用错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("tool {tool} unavailable: {reason}")]
    Unavailable { tool: String, reason: String },

    #[error("tool {0} timed out")]
    Timeout(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Compute(#[from] ComputeError),
}

/// 检索适配器
#[async_trait]
pub trait SearchAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str) -> Result<Vec<DocumentSummary>, ToolError>;
}
