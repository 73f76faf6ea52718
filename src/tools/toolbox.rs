//! Toolbox：ResearchAgent 使用的工具集合
//!
//! 检索按适配器链依次尝试（本地资料 → arXiv → Wikipedia），前一个不可用或无结果时切换到下一个；
//! 所有调用都经过共享的 ToolExecutor（并发上限 + 超时 + 审计）。

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::ToolsSection;
use crate::tools::{
    ArxivSearch, Calculator, CodeAnalyzer, CodeSummary, ComputeAdapter, Computation,
    DocumentSummary, IconLibrary, IconLookup, IconReference, LocalDocuments, SearchAdapter,
    ToolError, ToolExecutor, WikipediaSearch,
};

/// 一次检索的结果及其来源适配器
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub adapter: String,
    pub documents: Vec<DocumentSummary>,
}

pub struct Toolbox {
    executor: ToolExecutor,
    searchers: Vec<Arc<dyn SearchAdapter>>,
    compute: Arc<dyn ComputeAdapter>,
    icons: Arc<dyn IconLookup>,
    code: CodeAnalyzer,
}

impl Toolbox {
    pub fn new(
        executor: ToolExecutor,
        searchers: Vec<Arc<dyn SearchAdapter>>,
        compute: Arc<dyn ComputeAdapter>,
        icons: Arc<dyn IconLookup>,
    ) -> Self {
        Self {
            executor,
            searchers,
            compute,
            icons,
            code: CodeAnalyzer::new(".", 4000),
        }
    }

    pub fn with_code_analyzer(mut self, code: CodeAnalyzer) -> Self {
        self.code = code;
        self
    }

    /// 按配置组装：本地资料（若配置）优先、arXiv 为主、Wikipedia 兜底、内置计算器、本地图标库
    pub fn from_config(cfg: &ToolsSection) -> Self {
        let search = &cfg.search;
        let mut searchers: Vec<Arc<dyn SearchAdapter>> = Vec::new();
        if let Some(dir) = &cfg.local_docs_dir {
            searchers.push(Arc::new(LocalDocuments::new(
                dir.clone(),
                search.max_results,
                search.max_summary_chars,
            )));
        }
        searchers.extend([
            Arc::new(ArxivSearch::new(
                search.arxiv_endpoint.clone(),
                search.max_results,
                search.max_summary_chars,
                cfg.tool_timeout_secs,
            )) as Arc<dyn SearchAdapter>,
            Arc::new(WikipediaSearch::new(
                search.wikipedia_endpoint.clone(),
                search.max_summary_chars,
                cfg.tool_timeout_secs,
            )) as Arc<dyn SearchAdapter>,
        ]);
        Self::new(
            ToolExecutor::new(cfg.max_concurrent, cfg.tool_timeout_secs),
            searchers,
            Arc::new(Calculator),
            Arc::new(IconLibrary::scan(&cfg.icons_dir)),
        )
        .with_code_analyzer(CodeAnalyzer::new(cfg.code_root.clone(), cfg.code_excerpt_chars))
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    /// 沿适配器链检索；全部失败时返回 Unavailable
    pub async fn search(&self, query: &str) -> Result<SearchHit, ToolError> {
        let mut failures = Vec::new();
        let mut empty: Option<SearchHit> = None;
        for adapter in &self.searchers {
            let name = adapter.name().to_string();
            let result = self
                .executor
                .execute(&name, serde_json::json!({ "query": query }), adapter.search(query))
                .await;
            match result {
                Ok(documents) if !documents.is_empty() => {
                    return Ok(SearchHit {
                        adapter: name,
                        documents,
                    })
                }
                Ok(documents) => {
                    tracing::debug!(adapter = %name, "search returned no results, trying next");
                    empty.get_or_insert(SearchHit {
                        adapter: name,
                        documents,
                    });
                }
                Err(e) => {
                    tracing::warn!(adapter = %name, error = %e, "search adapter failed, trying next");
                    failures.push(e.to_string());
                }
            }
        }
        empty.ok_or_else(|| ToolError::Unavailable {
            tool: "search".to_string(),
            reason: if failures.is_empty() {
                "no search adapters configured".to_string()
            } else {
                failures.join("; ")
            },
        })
    }

    pub async fn compute(&self, expression: &str) -> Result<Computation, ToolError> {
        let compute = Arc::clone(&self.compute);
        self.executor
            .execute(
                "compute",
                serde_json::json!({ "expression": expression }),
                async move { compute.compute(expression).map_err(ToolError::from) },
            )
            .await
    }

    pub async fn analyze_code(&self, path: &str) -> Result<CodeSummary, ToolError> {
        self.executor
            .execute(
                "code_analysis",
                serde_json::json!({ "path": path }),
                self.code.analyze(path),
            )
            .await
    }

    pub async fn icon_lookup(&self, concept: &str) -> Result<IconReference, ToolError> {
        self.executor
            .execute(
                "icon_lookup",
                serde_json::json!({ "concept": concept }),
                self.icons.lookup(concept),
            )
            .await
    }

    pub fn known_icons(&self) -> HashSet<String> {
        self.icons.known_icons()
    }

    pub fn icon_paths(&self) -> BTreeMap<String, PathBuf> {
        self.icons.paths()
    }
}
