//! 流水线错误分类与恢复动作
//!
//! 各阶段的失败以类型化枚举表示；StageFailure 统一承载后交给 RecoveryEngine，
//! 由其决定重试研究、重新生成场景还是放弃。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::{CueKind, Violation};

/// 研究阶段失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResearchFailure {
    #[error("required evidence could not be gathered: {0}")]
    ToolUnavailable(String),

    #[error("no viable explanation: {0}")]
    NoViableExplanation(String),

    #[error("malformed research output: {0}")]
    MalformedOutput(String),

    /// LLM 后端调用失败（与检索工具不可用区分）
    #[error("language model call failed: {0}")]
    ModelUnavailable(String),

    #[error("research call timed out")]
    Timeout,
}

impl ResearchFailure {
    /// NoViableExplanation 不可恢复，其余可通过重试修复
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ResearchFailure::NoViableExplanation(_))
    }
}

/// 代码生成阶段失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodeGenFailure {
    #[error("cue '{cue_id}' of kind {kind} is not supported by the render backend")]
    UnsupportedCueType { cue_id: String, kind: CueKind },

    #[error("sync manifest incomplete: {}", .0.join("; "))]
    ManifestIncomplete(Vec<String>),

    #[error("malformed scene output: {0}")]
    MalformedOutput(String),

    #[error("language model call failed: {0}")]
    ModelUnavailable(String),

    #[error("code generation call timed out")]
    Timeout,
}

/// 失败分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureClass {
    ToolFailure,
    ValidationFailure,
    GenerationFailure,
    RenderFailure,
    BudgetExhausted,
    Cancelled,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureClass::ToolFailure => "tool_failure",
            FailureClass::ValidationFailure => "validation_failure",
            FailureClass::GenerationFailure => "generation_failure",
            FailureClass::RenderFailure => "render_failure",
            FailureClass::BudgetExhausted => "budget_exhausted",
            FailureClass::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// 某阶段的一次失败
#[derive(Debug, Clone, PartialEq)]
pub enum StageFailure {
    Research(ResearchFailure),
    /// 研究产物未通过校验
    Invalid(Vec<Violation>),
    CodeGen(CodeGenFailure),
    /// 场景代码无法编译（渲染端诊断）
    CompileError(String),
    RenderTimeout,
    ResourceExhausted,
    Cancelled,
}

impl StageFailure {
    pub fn class(&self) -> FailureClass {
        match self {
            StageFailure::Research(ResearchFailure::ToolUnavailable(_)) => FailureClass::ToolFailure,
            StageFailure::Research(_) => FailureClass::GenerationFailure,
            StageFailure::Invalid(_) => FailureClass::ValidationFailure,
            StageFailure::CodeGen(CodeGenFailure::UnsupportedCueType { .. })
            | StageFailure::CodeGen(CodeGenFailure::ManifestIncomplete(_)) => {
                FailureClass::ValidationFailure
            }
            StageFailure::CodeGen(_) => FailureClass::GenerationFailure,
            StageFailure::CompileError(_)
            | StageFailure::RenderTimeout
            | StageFailure::ResourceExhausted => FailureClass::RenderFailure,
            StageFailure::Cancelled => FailureClass::Cancelled,
        }
    }

    /// 注入下一次调用的修正反馈
    pub fn feedback(&self) -> Vec<String> {
        match self {
            StageFailure::Invalid(violations) => violations.iter().map(|v| v.to_string()).collect(),
            StageFailure::CodeGen(CodeGenFailure::ManifestIncomplete(issues)) => issues
                .iter()
                .map(|i| format!("sync manifest: {i}"))
                .collect(),
            StageFailure::CompileError(diag) => {
                vec![format!("scene code failed to compile: {}", tail(diag, 1500))]
            }
            other => vec![other.to_string()],
        }
    }
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageFailure::Research(e) => write!(f, "{e}"),
            StageFailure::Invalid(v) => write!(
                f,
                "explanation document invalid: {}",
                v.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("; ")
            ),
            StageFailure::CodeGen(e) => write!(f, "{e}"),
            StageFailure::CompileError(diag) => write!(f, "compile error: {}", tail(diag, 500)),
            StageFailure::RenderTimeout => write!(f, "render timed out"),
            StageFailure::ResourceExhausted => write!(f, "render exhausted resources"),
            StageFailure::Cancelled => write!(f, "run cancelled"),
        }
    }
}

/// 诊断文本只保留末尾部分（编译错误的关键信息通常在最后）
fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        text.trim().to_string()
    } else {
        let skipped: String = text.chars().skip(count - max_chars).collect();
        format!("...{}", skipped.trim())
    }
}

/// 恢复引擎给出的动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 带反馈重新研究
    RetryResearch(Vec<String>),
    /// 带反馈重新生成场景代码
    RegenerateScene(Vec<String>),
    /// 终止本次 run
    Abandon { class: FailureClass, reason: String },
}
