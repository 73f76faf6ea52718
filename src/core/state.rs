//! Pipeline Run 状态：阶段状态机、重试计数、产物与诊断历史
//!
//! PipelineRun 只由 Orchestrator 修改；每次阶段转移都经过 `transition` 校验。

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::error::FailureClass;
use crate::schema::{slugify, ExplanationDocument, SceneCode, SyncManifest};

/// 流水线阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    ResearchPending,
    ResearchValidated,
    CodeGenPending,
    CodeGenValidated,
    Rendering,
    Succeeded,
    ResearchFailed,
    CodeGenFailed,
    RenderFailed,
    Abandoned,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Succeeded | Stage::Abandoned)
    }

    /// 合法转移；任何非终态都可因取消直接进入 Abandoned
    pub fn can_transition_to(&self, next: Stage) -> bool {
        use Stage::*;
        if next == Abandoned {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (ResearchPending, ResearchPending)
                | (ResearchPending, ResearchValidated)
                | (ResearchPending, ResearchFailed)
                | (ResearchValidated, CodeGenPending)
                | (CodeGenPending, CodeGenPending)
                | (CodeGenPending, CodeGenValidated)
                | (CodeGenPending, CodeGenFailed)
                | (CodeGenValidated, Rendering)
                | (Rendering, Succeeded)
                | (Rendering, CodeGenPending)
                | (Rendering, RenderFailed)
        )
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// 非法转移
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("illegal stage transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: Stage,
    pub to: Stage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Succeeded,
    Failed,
}

/// Run ID：`<slug>-<UTC 时间戳>-<8 位摘要>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn derive(question: &str, submitted_at: DateTime<Utc>) -> Self {
        let mut slug: String = slugify(question).chars().take(32).collect();
        while slug.ends_with('-') {
            slug.pop();
        }
        if slug.is_empty() {
            slug.push_str("run");
        }
        let nanos = submitted_at
            .timestamp_nanos_opt()
            .unwrap_or_else(|| submitted_at.timestamp_micros() * 1000);
        let mut hasher = Sha256::new();
        hasher.update(question.as_bytes());
        hasher.update(nanos.to_string().as_bytes());
        let digest = hex::encode(hasher.finalize());
        Self(format!(
            "{}-{}-{}",
            slug,
            submitted_at.format("%Y%m%dT%H%M%S"),
            &digest[..8]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 各阶段重试计数（只计失败后的重试）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryCounters {
    pub research_retries: u32,
    pub codegen_retries: u32,
    /// 已吸收的编译错误次数
    pub compile_errors: u32,
}

/// 各阶段调用次数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocations {
    pub research: u32,
    pub codegen: u32,
    pub render: u32,
}

/// 渲染成品
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoArtifact {
    pub path: PathBuf,
    pub duration_secs: f64,
}

/// 各阶段最新产物
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifacts {
    pub document: Option<ExplanationDocument>,
    pub scene: Option<SceneCode>,
    pub manifest: Option<SyncManifest>,
    pub video: Option<VideoArtifact>,
    pub subtitles: Option<PathBuf>,
}

/// 一条诊断记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticEntry {
    pub stage: Stage,
    /// 该阶段第几次调用（从 1 开始）
    pub attempt: u32,
    pub class: FailureClass,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// 一次流水线运行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: RunId,
    pub question: String,
    pub stage: Stage,
    pub status: RunStatus,
    pub counters: RetryCounters,
    pub invocations: Invocations,
    pub artifacts: Artifacts,
    /// 待注入当前阶段下一次调用的反馈
    #[serde(default)]
    pub feedback: Vec<String>,
    pub history: Vec<DiagnosticEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineRun {
    pub fn new(question: impl Into<String>) -> Self {
        Self::new_at(question, Utc::now())
    }

    pub fn new_at(question: impl Into<String>, submitted_at: DateTime<Utc>) -> Self {
        let question = question.into();
        Self {
            run_id: RunId::derive(&question, submitted_at),
            question,
            stage: Stage::ResearchPending,
            status: RunStatus::Pending,
            counters: RetryCounters::default(),
            invocations: Invocations::default(),
            artifacts: Artifacts::default(),
            feedback: Vec::new(),
            history: Vec::new(),
            created_at: submitted_at,
            updated_at: submitted_at,
        }
    }

    /// 校验并执行阶段转移，同步终态 status
    pub fn transition(&mut self, next: Stage) -> Result<(), InvalidTransition> {
        if !self.stage.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.stage,
                to: next,
            });
        }
        tracing::info!(run_id = %self.run_id, from = %self.stage, to = %next, "stage transition");
        self.stage = next;
        self.status = match next {
            Stage::Succeeded => RunStatus::Succeeded,
            Stage::Abandoned => RunStatus::Failed,
            _ => RunStatus::Pending,
        };
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn record(&mut self, stage: Stage, attempt: u32, class: FailureClass, message: impl Into<String>) {
        self.history.push(DiagnosticEntry {
            stage,
            attempt,
            class,
            message: message.into(),
            at: Utc::now(),
        });
        self.updated_at = Utc::now();
    }

    pub fn last_diagnostic(&self) -> Option<&DiagnosticEntry> {
        self.history.last()
    }

    pub fn is_finished(&self) -> bool {
        self.stage.is_terminal()
    }
}
