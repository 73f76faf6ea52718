//! 核心编排层：错误分类与恢复、run 状态机、主控循环、提交队列、组件装配、优雅关闭

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod run_queue;
pub mod shutdown;
pub mod state;

pub use builder::{create_pipeline_builder, PipelineBuilder};
pub use error::{CodeGenFailure, FailureClass, RecoveryAction, ResearchFailure, StageFailure};
pub use orchestrator::{Orchestrator, RunOutcome, RunReport, StageTimeouts};
pub use recovery::{RecoveryEngine, RetryBudgets};
pub use run_queue::{RunQueue, RunTicket, SubmitError};
pub use shutdown::ShutdownManager;
pub use state::{PipelineRun, RetryCounters, RunId, RunStatus, Stage};
