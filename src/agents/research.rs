//! ResearchAgent：问题 → Explanation Document
//!
//! 流程：规划工具步骤 → 收集证据（计算、代码分析、检索）并编号为 S1..Sn → LLM 起草 →
//! 剔除引用未知来源的 Reference → 解析 icon cue → 校验，不通过则带违规列表自我修订（有上限）。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;

use crate::agents::plan::ResearchPlan;
use crate::agents::prompts::{research_system_prompt, research_user_prompt, revision_prompt};
use crate::agents::{extract_json_block, Researcher};
use crate::core::error::ResearchFailure;
use crate::llm::{LlmClient, Message};
use crate::schema::{
    document_shape, normalize, CueKind, ExplanationDocument, ValidationPolicy, ValidationResult,
    Validator,
};
use crate::tools::{ToolError, Toolbox};

/// 一条证据
#[derive(Debug, Clone, PartialEq)]
pub struct Evidence {
    /// 来源标识 S1、S2 ...
    pub id: String,
    /// arxiv / wikipedia / local_docs / compute / code_analysis
    pub origin: String,
    pub title: String,
    /// URL 或表达式，作为 Reference.locator 的默认值
    pub locator: String,
    pub excerpt: String,
}

impl Evidence {
    fn ledger_line(&self) -> String {
        format!(
            "[{}] {} | {} | {}\n{}",
            self.id, self.origin, self.title, self.locator, self.excerpt
        )
    }
}

pub struct ResearchAgent {
    llm: Arc<dyn LlmClient>,
    tools: Arc<Toolbox>,
    self_revisions: u32,
    require_cues: bool,
}

impl ResearchAgent {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<Toolbox>) -> Self {
        Self {
            llm,
            tools,
            self_revisions: 1,
            require_cues: true,
        }
    }

    pub fn with_self_revisions(mut self, rounds: u32) -> Self {
        self.self_revisions = rounds;
        self
    }

    pub fn with_require_cues(mut self, require: bool) -> Self {
        self.require_cues = require;
        self
    }

    fn validator(&self) -> Validator {
        Validator::new(ValidationPolicy {
            require_cues: self.require_cues,
            known_icons: Some(self.tools.known_icons()),
        })
    }

    /// 按计划收集证据；计划内无任何证据产出时退化为以问题检索
    pub async fn gather(&self, plan: &ResearchPlan) -> Vec<Evidence> {
        let mut ledger: Vec<Evidence> = Vec::new();
        let next_id = |ledger: &Vec<Evidence>| format!("S{}", ledger.len() + 1);

        if let Some(expr) = &plan.compute_expression {
            match self.tools.compute(expr).await {
                Ok(c) => ledger.push(Evidence {
                    id: next_id(&ledger),
                    origin: "compute".to_string(),
                    title: format!("numeric evaluation of {}", c.expression),
                    locator: c.expression.clone(),
                    excerpt: format!("{} (LaTeX: {})", c.value, c.latex),
                }),
                Err(e) => tracing::warn!(expression = %expr, error = %e, "compute step omitted"),
            }
        }

        if let Some(path) = &plan.code_path {
            match self.tools.analyze_code(path).await {
                Ok(summary) => ledger.push(Evidence {
                    id: next_id(&ledger),
                    origin: "code_analysis".to_string(),
                    title: format!("{} source {}", summary.language, summary.path),
                    locator: summary.path.clone(),
                    excerpt: summary.render(),
                }),
                Err(e) => tracing::warn!(path = %path, error = %e, "code analysis omitted"),
            }
        }

        if plan.literature_search || ledger.is_empty() {
            match self.tools.search(&plan.question).await {
                Ok(hit) => {
                    for doc in hit.documents {
                        ledger.push(Evidence {
                            id: next_id(&ledger),
                            origin: hit.adapter.clone(),
                            title: doc.title,
                            locator: doc.url,
                            excerpt: doc.summary,
                        });
                    }
                }
                Err(e) => tracing::warn!(error = %e, "literature search omitted"),
            }
        }
        ledger
    }

    /// 解析 icon cue：载荷替换为图标 id，找不到的 cue 直接删除。同一章节的查找并发进行。
    async fn resolve_icons(&self, document: &mut ExplanationDocument) {
        for section in &mut document.sections {
            let cues = std::mem::take(&mut section.cues);
            let lookups = cues.iter().map(|cue| async move {
                if cue.kind == CueKind::Icon {
                    Some(self.tools.icon_lookup(&cue.payload).await)
                } else {
                    None
                }
            });
            let results = join_all(lookups).await;
            section.cues = cues
                .into_iter()
                .zip(results)
                .filter_map(|(mut cue, result)| match result {
                    None => Some(cue),
                    Some(Ok(icon)) => {
                        cue.payload = icon.id;
                        Some(cue)
                    }
                    Some(Err(ToolError::NotFound(concept))) => {
                        tracing::info!(cue = %cue.id, concept = %concept, "icon not found, cue dropped");
                        None
                    }
                    Some(Err(e)) => {
                        tracing::warn!(cue = %cue.id, error = %e, "icon lookup failed, cue dropped");
                        None
                    }
                })
                .collect();
        }
    }

    fn parse_draft(raw: &str) -> Result<ExplanationDocument, String> {
        let json = extract_json_block(raw).ok_or_else(|| "response contains no JSON object".to_string())?;
        serde_json::from_str(json).map_err(|e| e.to_string())
    }
}

/// 只保留引用了本次证据的 Reference；以 URL 引用的改写为对应来源 id，空 locator 用证据定位补全。
/// 返回被删除的数量。
pub fn prune_references(document: &mut ExplanationDocument, ledger: &[Evidence]) -> usize {
    let mut removed = 0;
    for section in &mut document.sections {
        let before = section.references.len();
        let mut seen = HashSet::new();
        section.references.retain_mut(|r| {
            let key = r.source.trim_matches(|c| c == '[' || c == ']').trim().to_uppercase();
            let found = ledger
                .iter()
                .find(|e| e.id == key || (!r.source.is_empty() && e.locator == r.source));
            match found {
                Some(ev) => {
                    r.source = ev.id.clone();
                    if r.locator.trim().is_empty() {
                        r.locator = ev.locator.clone();
                    }
                    seen.insert((r.source.clone(), r.locator.clone()))
                }
                None => false,
            }
        });
        removed += before - section.references.len();
    }
    removed
}

#[async_trait]
impl Researcher for ResearchAgent {
    async fn research(
        &self,
        question: &str,
        feedback: &[String],
    ) -> Result<ExplanationDocument, ResearchFailure> {
        let plan = ResearchPlan::build(question);
        if plan.unintelligible {
            return Err(ResearchFailure::NoViableExplanation(format!(
                "question is not intelligible: {:?}",
                question.trim()
            )));
        }
        tracing::info!(steps = ?plan.steps(), math = plan.is_math, "research plan");

        let ledger = self.gather(&plan).await;
        if ledger.is_empty() {
            return Err(ResearchFailure::ToolUnavailable(
                "no evidence source returned anything".to_string(),
            ));
        }
        let evidence: Vec<String> = ledger.iter().map(Evidence::ledger_line).collect();

        let mut messages = vec![
            Message::system(research_system_prompt()),
            Message::user(research_user_prompt(
                question,
                &evidence,
                plan.wants_visuals,
                feedback,
            )),
        ];
        let validator = self.validator();
        let shape = document_shape();

        for round in 0..=self.self_revisions {
            let last_round = round == self.self_revisions;
            let raw = self
                .llm
                .complete_json(&messages, &shape)
                .await
                .map_err(|e| ResearchFailure::ModelUnavailable(e.to_string()))?;

            let mut document = match Self::parse_draft(&raw) {
                Ok(doc) => doc,
                Err(e) if last_round => return Err(ResearchFailure::MalformedOutput(e)),
                Err(e) => {
                    tracing::warn!(round, error = %e, "research draft unparsable, revising");
                    messages.push(Message::assistant(raw));
                    messages.push(Message::user(revision_prompt(&[format!(
                        "output is not valid JSON for the schema: {e}"
                    )])));
                    continue;
                }
            };

            document.question = question.trim().to_string();
            let mut document = normalize(&document);
            let removed = prune_references(&mut document, &ledger);
            if removed > 0 {
                tracing::warn!(removed, "dropped references to unknown sources");
            }
            self.resolve_icons(&mut document).await;

            match validator.validate(&document) {
                ValidationResult::Valid => return Ok(document),
                invalid => {
                    let violations = invalid.feedback();
                    if last_round {
                        return Err(ResearchFailure::NoViableExplanation(format!(
                            "no valid document after {} self-revisions: {}",
                            self.self_revisions,
                            violations.join("; ")
                        )));
                    }
                    tracing::warn!(round, violations = violations.len(), "draft invalid, self-revising");
                    messages.push(Message::assistant(raw));
                    messages.push(Message::user(revision_prompt(&violations)));
                }
            }
        }
        Err(ResearchFailure::NoViableExplanation(
            "self-revision loop ended without a document".to_string(),
        ))
    }
}
