//! 错误恢复引擎
//!
//! 根据 StageFailure 与当前重试计数返回 RecoveryAction：失败路由到最早能修复它的阶段，
//! 预算耗尽或不可恢复时放弃。计数的递增由 Orchestrator 负责。

use crate::core::error::{FailureClass, RecoveryAction, ResearchFailure, StageFailure};
use crate::core::state::RetryCounters;

/// 各阶段重试预算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudgets {
    pub max_research_retries: u32,
    pub max_codegen_retries: u32,
    /// 一个 run 可吸收的编译错误数，达到即放弃
    pub render_retry_budget: u32,
}

impl Default for RetryBudgets {
    fn default() -> Self {
        Self {
            max_research_retries: 2,
            max_codegen_retries: 2,
            render_retry_budget: 2,
        }
    }
}

/// 语义化错误恢复：将失败映射为可执行动作
#[derive(Debug, Default, Clone)]
pub struct RecoveryEngine {
    budgets: RetryBudgets,
}

impl RecoveryEngine {
    pub fn new(budgets: RetryBudgets) -> Self {
        Self { budgets }
    }

    pub fn budgets(&self) -> RetryBudgets {
        self.budgets
    }

    /// `counters` 为本次失败之前的计数
    pub fn handle(&self, failure: &StageFailure, counters: &RetryCounters) -> RecoveryAction {
        match failure {
            StageFailure::Cancelled => RecoveryAction::Abandon {
                class: FailureClass::Cancelled,
                reason: failure.to_string(),
            },
            StageFailure::Research(ResearchFailure::NoViableExplanation(_)) => {
                RecoveryAction::Abandon {
                    class: failure.class(),
                    reason: failure.to_string(),
                }
            }
            StageFailure::Research(_) | StageFailure::Invalid(_) => {
                if counters.research_retries < self.budgets.max_research_retries {
                    RecoveryAction::RetryResearch(failure.feedback())
                } else {
                    self.exhausted(
                        "research",
                        self.budgets.max_research_retries,
                        failure,
                    )
                }
            }
            StageFailure::CodeGen(_) => {
                if counters.codegen_retries < self.budgets.max_codegen_retries {
                    RecoveryAction::RegenerateScene(failure.feedback())
                } else {
                    self.exhausted("codegen", self.budgets.max_codegen_retries, failure)
                }
            }
            StageFailure::CompileError(_) => {
                if counters.compile_errors + 1 < self.budgets.render_retry_budget {
                    RecoveryAction::RegenerateScene(failure.feedback())
                } else {
                    self.exhausted("render", self.budgets.render_retry_budget, failure)
                }
            }
            StageFailure::RenderTimeout | StageFailure::ResourceExhausted => {
                RecoveryAction::Abandon {
                    class: FailureClass::RenderFailure,
                    reason: failure.to_string(),
                }
            }
        }
    }

    fn exhausted(&self, stage: &str, budget: u32, failure: &StageFailure) -> RecoveryAction {
        RecoveryAction::Abandon {
            class: FailureClass::BudgetExhausted,
            reason: format!("{stage} retry budget ({budget}) exhausted; last failure: {failure}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::CodeGenFailure;

    fn counters(research: u32, codegen: u32, compile: u32) -> RetryCounters {
        RetryCounters {
            research_retries: research,
            codegen_retries: codegen,
            compile_errors: compile,
        }
    }

    #[test]
    fn test_research_retry_until_budget() {
        let engine = RecoveryEngine::default();
        let failure = StageFailure::Research(ResearchFailure::MalformedOutput("x".into()));
        assert!(matches!(
            engine.handle(&failure, &counters(0, 0, 0)),
            RecoveryAction::RetryResearch(_)
        ));
        assert!(matches!(
            engine.handle(&failure, &counters(2, 0, 0)),
            RecoveryAction::Abandon {
                class: FailureClass::BudgetExhausted,
                ..
            }
        ));
    }

    #[test]
    fn test_no_viable_is_terminal() {
        let engine = RecoveryEngine::default();
        let failure = StageFailure::Research(ResearchFailure::NoViableExplanation("?".into()));
        assert!(matches!(
            engine.handle(&failure, &counters(0, 0, 0)),
            RecoveryAction::Abandon {
                class: FailureClass::GenerationFailure,
                ..
            }
        ));
    }

    #[test]
    fn test_compile_error_routes_to_codegen() {
        let engine = RecoveryEngine::default();
        let failure = StageFailure::CompileError("SyntaxError".into());
        match engine.handle(&failure, &counters(0, 0, 0)) {
            RecoveryAction::RegenerateScene(fb) => assert!(fb[0].contains("SyntaxError")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            engine.handle(&failure, &counters(0, 0, 1)),
            RecoveryAction::Abandon {
                class: FailureClass::BudgetExhausted,
                ..
            }
        ));
    }

    #[test]
    fn test_codegen_and_render_failures() {
        let engine = RecoveryEngine::default();
        let failure = StageFailure::CodeGen(CodeGenFailure::Timeout);
        assert!(matches!(
            engine.handle(&failure, &counters(0, 1, 0)),
            RecoveryAction::RegenerateScene(_)
        ));
        assert!(matches!(
            engine.handle(&StageFailure::RenderTimeout, &counters(0, 0, 0)),
            RecoveryAction::Abandon {
                class: FailureClass::RenderFailure,
                ..
            }
        ));
        assert!(matches!(
            engine.handle(&StageFailure::Cancelled, &counters(0, 0, 0)),
            RecoveryAction::Abandon {
                class: FailureClass::Cancelled,
                ..
            }
        ));
    }
}
