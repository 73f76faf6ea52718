//! Pipeline Orchestrator：驱动单个 run 的状态机
//!
//! ResearchPending → ResearchValidated → CodeGenPending → CodeGenValidated → Rendering → Succeeded；
//! 失败交给 RecoveryEngine 路由到最早能修复它的阶段，预算耗尽则经 *Failed 进入 Abandoned。
//! 每次 LLM / 渲染调用都是可取消、带超时的挂起点；每次状态转移后持久化 run 快照。

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::agents::{GeneratedScene, Researcher, SceneGenerator};
use crate::core::error::{CodeGenFailure, FailureClass, RecoveryAction, ResearchFailure, StageFailure};
use crate::core::recovery::{RecoveryEngine, RetryBudgets};
use crate::core::state::{
    DiagnosticEntry, Invocations, PipelineRun, RetryCounters, RunId, Stage, VideoArtifact,
};
use crate::render::{write_srt, AdmissionError, RenderBackend, RenderPool, RenderResult, RenderSlot};
use crate::schema::{
    check_manifest, coverage, normalize, Coverage, CueKind, ExplanationDocument, SyncPolicy,
    ValidationResult, Validator,
};
use crate::store::RunStore;

/// 单次调用超时
#[derive(Debug, Clone, Copy)]
pub struct StageTimeouts {
    pub research: Duration,
    pub codegen: Duration,
    pub render: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            research: Duration::from_secs(300),
            codegen: Duration::from_secs(300),
            render: Duration::from_secs(900),
        }
    }
}

/// run 的最终结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded {
        video: VideoArtifact,
        subtitles: Option<PathBuf>,
    },
    Abandoned {
        class: FailureClass,
        reason: String,
    },
}

/// 返回给调用方的报告；`run` 为完整快照，不参与序列化
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub question: String,
    pub stage: Stage,
    pub outcome: RunOutcome,
    pub counters: RetryCounters,
    pub invocations: Invocations,
    pub history: Vec<DiagnosticEntry>,
    #[serde(skip)]
    pub run: PipelineRun,
}

impl RunReport {
    fn from_run(run: PipelineRun) -> Self {
        let outcome = match (&run.stage, &run.artifacts.video) {
            (Stage::Succeeded, Some(video)) => RunOutcome::Succeeded {
                video: video.clone(),
                subtitles: run.artifacts.subtitles.clone(),
            },
            _ => match run.last_diagnostic() {
                Some(entry) => RunOutcome::Abandoned {
                    class: entry.class,
                    reason: entry.message.clone(),
                },
                None => RunOutcome::Abandoned {
                    class: FailureClass::Cancelled,
                    reason: format!("run stopped at {}", run.stage),
                },
            },
        };
        Self {
            run_id: run.run_id.clone(),
            question: run.question.clone(),
            stage: run.stage,
            outcome,
            counters: run.counters.clone(),
            invocations: run.invocations.clone(),
            history: run.history.clone(),
            run,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Succeeded { .. })
    }
}

/// 挂起点被打断的原因
enum Interrupt {
    Cancelled,
    TimedOut,
}

async fn guarded<F: Future>(
    cancel: &CancellationToken,
    limit: Duration,
    fut: F,
) -> Result<F::Output, Interrupt> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        out = tokio::time::timeout(limit, fut) => out.map_err(|_| Interrupt::TimedOut),
    }
}

pub struct Orchestrator {
    researcher: Arc<dyn Researcher>,
    generator: Arc<dyn SceneGenerator>,
    renderer: Arc<dyn RenderBackend>,
    pool: Arc<RenderPool>,
    validator: Validator,
    sync: SyncPolicy,
    supported_cues: Vec<CueKind>,
    recovery: RecoveryEngine,
    store: Option<RunStore>,
    timeouts: StageTimeouts,
    admission_backoff: Duration,
}

impl Orchestrator {
    pub fn new(
        researcher: Arc<dyn Researcher>,
        generator: Arc<dyn SceneGenerator>,
        renderer: Arc<dyn RenderBackend>,
    ) -> Self {
        Self {
            researcher,
            generator,
            renderer,
            pool: Arc::new(RenderPool::new(2, 8)),
            validator: Validator::default(),
            sync: SyncPolicy::default(),
            supported_cues: vec![
                CueKind::Equation,
                CueKind::Diagram,
                CueKind::Icon,
                CueKind::Transition,
            ],
            recovery: RecoveryEngine::default(),
            store: None,
            timeouts: StageTimeouts::default(),
            admission_backoff: Duration::from_millis(500),
        }
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// 代码生成结果的同步约束与渲染端支持的 cue 类型
    pub fn with_scene_contract(mut self, sync: SyncPolicy, supported_cues: Vec<CueKind>) -> Self {
        self.sync = sync;
        self.supported_cues = supported_cues;
        self
    }

    pub fn with_budgets(mut self, budgets: RetryBudgets) -> Self {
        self.recovery = RecoveryEngine::new(budgets);
        self
    }

    pub fn with_store(mut self, store: RunStore) -> Self {
        self.store = Some(store);
        self
    }

    /// 多个 Orchestrator 可共享同一个渲染池
    pub fn with_render_pool(mut self, pool: Arc<RenderPool>) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_admission_backoff(mut self, backoff: Duration) -> Self {
        self.admission_backoff = backoff;
        self
    }

    pub fn store(&self) -> Option<&RunStore> {
        self.store.as_ref()
    }

    pub fn render_pool(&self) -> &Arc<RenderPool> {
        &self.pool
    }

    /// 为新问题创建 run 并执行到终态
    pub async fn run(&self, question: &str, cancel: CancellationToken) -> RunReport {
        let run = PipelineRun::new(question);
        tracing::info!(run_id = %run.run_id, question = %question, "run submitted");
        self.drive(run, cancel).await
    }

    /// 从已持久化的阶段继续执行
    pub async fn resume(&self, run: PipelineRun, cancel: CancellationToken) -> RunReport {
        tracing::info!(run_id = %run.run_id, stage = %run.stage, "run resumed");
        self.drive(run, cancel).await
    }

    async fn drive(&self, mut run: PipelineRun, cancel: CancellationToken) -> RunReport {
        self.persist(&run).await;
        while !run.is_finished() {
            if cancel.is_cancelled() {
                self.fail(&mut run, StageFailure::Cancelled);
                self.persist(&run).await;
                break;
            }
            match run.stage {
                Stage::ResearchPending => self.research_step(&mut run, &cancel).await,
                Stage::ResearchValidated => advance(&mut run, Stage::CodeGenPending),
                Stage::CodeGenPending => self.codegen_step(&mut run, &cancel).await,
                Stage::CodeGenValidated | Stage::Rendering => self.render_step(&mut run, &cancel).await,
                Stage::ResearchFailed | Stage::CodeGenFailed | Stage::RenderFailed => {
                    advance(&mut run, Stage::Abandoned)
                }
                Stage::Succeeded | Stage::Abandoned => break,
            }
            self.persist(&run).await;
        }
        let report = RunReport::from_run(run);
        match &report.outcome {
            RunOutcome::Succeeded { video, .. } => tracing::info!(
                run_id = %report.run_id,
                video = %video.path.display(),
                duration = video.duration_secs,
                "run succeeded"
            ),
            RunOutcome::Abandoned { class, reason } => tracing::warn!(
                run_id = %report.run_id,
                class = %class,
                reason = %reason,
                "run abandoned"
            ),
        }
        report
    }

    async fn research_step(&self, run: &mut PipelineRun, cancel: &CancellationToken) {
        run.invocations.research += 1;
        let feedback = std::mem::take(&mut run.feedback);
        tracing::info!(
            run_id = %run.run_id,
            stage = %run.stage,
            attempt = run.invocations.research,
            feedback = feedback.len(),
            "research"
        );
        let outcome = guarded(
            cancel,
            self.timeouts.research,
            self.researcher.research(&run.question, &feedback),
        )
        .await;

        let document = match outcome {
            Err(Interrupt::Cancelled) => return self.fail(run, StageFailure::Cancelled),
            Err(Interrupt::TimedOut) => {
                return self.fail(run, StageFailure::Research(ResearchFailure::Timeout))
            }
            Ok(Err(e)) => return self.fail(run, StageFailure::Research(e)),
            Ok(Ok(document)) => normalize(&document),
        };

        let verdict = self.validator.validate(&document);
        run.artifacts.document = Some(document);
        match verdict {
            ValidationResult::Valid => advance(run, Stage::ResearchValidated),
            ValidationResult::Invalid(violations) => self.fail(run, StageFailure::Invalid(violations)),
        }
    }

    async fn codegen_step(&self, run: &mut PipelineRun, cancel: &CancellationToken) {
        run.invocations.codegen += 1;
        let Some(document) = run.artifacts.document.clone() else {
            return self.fail(
                run,
                StageFailure::CodeGen(CodeGenFailure::MalformedOutput(
                    "no validated explanation document".to_string(),
                )),
            );
        };
        let feedback = std::mem::take(&mut run.feedback);
        tracing::info!(
            run_id = %run.run_id,
            stage = %run.stage,
            attempt = run.invocations.codegen,
            feedback = feedback.len(),
            "code generation"
        );
        let outcome = guarded(
            cancel,
            self.timeouts.codegen,
            self.generator.generate(&document, &feedback),
        )
        .await;

        match outcome {
            Err(Interrupt::Cancelled) => self.fail(run, StageFailure::Cancelled),
            Err(Interrupt::TimedOut) => self.fail(run, StageFailure::CodeGen(CodeGenFailure::Timeout)),
            Ok(Err(e)) => self.fail(run, StageFailure::CodeGen(e)),
            Ok(Ok(generated)) => {
                if let Err(e) = self.check_generated(&document, &generated) {
                    return self.fail(run, StageFailure::CodeGen(e));
                }
                if !generated.adjustments.is_empty() {
                    tracing::info!(
                        run_id = %run.run_id,
                        adjustments = generated.adjustments.len(),
                        detail = %generated.adjustments.join("; "),
                        "sync manifest reconciled"
                    );
                }
                run.artifacts.scene = Some(generated.scene);
                run.artifacts.manifest = Some(generated.manifest);
                advance(run, Stage::CodeGenValidated);
            }
        }
    }

    /// 不信任生成器的自检：cue 必须存在且受支持，清单必须覆盖每个旁白片段
    fn check_generated(
        &self,
        document: &ExplanationDocument,
        generated: &GeneratedScene,
    ) -> Result<(), CodeGenFailure> {
        let markers = generated.scene.markers("cue");
        let spans = generated
            .manifest
            .segments
            .iter()
            .flat_map(|seg| seg.spans.iter().map(|span| span.cue_id.as_str()));
        let used: Vec<&str> = markers.iter().map(String::as_str).chain(spans).collect();

        let unknown = self.validator.check_cue_usage(document, used.iter().copied());
        if !unknown.is_empty() {
            return Err(CodeGenFailure::ManifestIncomplete(
                unknown.iter().map(|v| v.to_string()).collect(),
            ));
        }
        for id in &used {
            if let Some((_, cue)) = document.find_cue(id) {
                if !self.supported_cues.contains(&cue.kind) {
                    return Err(CodeGenFailure::UnsupportedCueType {
                        cue_id: cue.id.clone(),
                        kind: cue.kind,
                    });
                }
            }
        }

        if let Coverage::Incomplete(missing) = coverage(&generated.manifest, document) {
            return Err(CodeGenFailure::ManifestIncomplete(
                missing
                    .iter()
                    .map(|id| format!("segment '{id}' has no cue coverage"))
                    .collect(),
            ));
        }
        let issues = check_manifest(&generated.manifest, document, &self.sync);
        if !issues.is_empty() {
            return Err(CodeGenFailure::ManifestIncomplete(
                issues.iter().map(|i| i.to_string()).collect(),
            ));
        }
        Ok(())
    }

    /// 等待渲染槽位；队列满时留在当前阶段退避重试
    async fn admit(&self, run: &PipelineRun, cancel: &CancellationToken) -> Result<RenderSlot, AdmissionError> {
        loop {
            match self.pool.reserve(cancel).await {
                Ok(slot) => return Ok(slot),
                Err(AdmissionError::QueueFull) => {
                    tracing::info!(
                        run_id = %run.run_id,
                        backoff_ms = self.admission_backoff.as_millis() as u64,
                        "render queue full, backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(AdmissionError::Cancelled),
                        _ = tokio::time::sleep(self.admission_backoff) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn render_step(&self, run: &mut PipelineRun, cancel: &CancellationToken) {
        let Some(scene) = run.artifacts.scene.clone() else {
            tracing::error!(run_id = %run.run_id, stage = %run.stage, "no scene code to render");
            run.record(run.stage, run.invocations.render, FailureClass::GenerationFailure, "no scene code to render");
            return advance(run, Stage::Abandoned);
        };

        let slot = match self.admit(run, cancel).await {
            Ok(slot) => slot,
            Err(AdmissionError::Cancelled) => return self.fail(run, StageFailure::Cancelled),
            Err(e) => {
                tracing::error!(run_id = %run.run_id, error = %e, "render admission failed");
                if run.stage == Stage::CodeGenValidated {
                    advance(run, Stage::Rendering);
                }
                return self.fail(run, StageFailure::ResourceExhausted);
            }
        };
        if run.stage == Stage::CodeGenValidated {
            advance(run, Stage::Rendering);
            self.persist(run).await;
        }

        run.invocations.render += 1;
        tracing::info!(
            run_id = %run.run_id,
            attempt = run.invocations.render,
            backend = self.renderer.name(),
            scene = %scene.scene_name,
            "render"
        );
        let outcome = guarded(cancel, self.timeouts.render, self.renderer.render(&scene)).await;
        drop(slot);

        match outcome {
            Err(Interrupt::Cancelled) => self.fail(run, StageFailure::Cancelled),
            Err(Interrupt::TimedOut) | Ok(RenderResult::Timeout) => self.fail(run, StageFailure::RenderTimeout),
            Ok(RenderResult::ResourceExhausted) => self.fail(run, StageFailure::ResourceExhausted),
            Ok(RenderResult::CompileError(diagnostics)) => {
                self.fail(run, StageFailure::CompileError(diagnostics))
            }
            Ok(RenderResult::Success {
                artifact_path,
                duration_rendered,
            }) => {
                run.artifacts.video = Some(VideoArtifact {
                    path: artifact_path,
                    duration_secs: duration_rendered,
                });
                run.artifacts.subtitles = self.write_subtitles(run).await;
                advance(run, Stage::Succeeded);
            }
        }
    }

    async fn write_subtitles(&self, run: &PipelineRun) -> Option<PathBuf> {
        let store = self.store.as_ref()?;
        let document = run.artifacts.document.as_ref()?;
        let manifest = run.artifacts.manifest.as_ref()?;
        match store.write_subtitles(&run.run_id, &write_srt(document, manifest)).await {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(run_id = %run.run_id, error = %e, "failed to write subtitles");
                None
            }
        }
    }

    /// 记录失败并执行恢复动作
    fn fail(&self, run: &mut PipelineRun, failure: StageFailure) {
        let stage = run.stage;
        let attempt = match stage {
            Stage::ResearchPending => run.invocations.research,
            Stage::CodeGenPending => run.invocations.codegen,
            Stage::Rendering | Stage::CodeGenValidated => run.invocations.render,
            _ => 0,
        };
        let class = failure.class();
        tracing::warn!(
            run_id = %run.run_id,
            stage = %stage,
            attempt,
            class = %class,
            error = %failure,
            "stage failed"
        );
        run.record(stage, attempt, class, failure.to_string());

        let action = self.recovery.handle(&failure, &run.counters);
        if matches!(failure, StageFailure::CompileError(_)) {
            run.counters.compile_errors += 1;
        }
        match action {
            RecoveryAction::RetryResearch(feedback) => {
                run.counters.research_retries += 1;
                tracing::warn!(run_id = %run.run_id, retry = run.counters.research_retries, "retrying research");
                run.feedback = feedback;
                advance(run, Stage::ResearchPending);
            }
            RecoveryAction::RegenerateScene(feedback) => {
                if !matches!(failure, StageFailure::CompileError(_)) {
                    run.counters.codegen_retries += 1;
                }
                tracing::warn!(
                    run_id = %run.run_id,
                    retry = run.counters.codegen_retries,
                    compile_errors = run.counters.compile_errors,
                    "regenerating scene"
                );
                run.feedback = feedback;
                advance(run, Stage::CodeGenPending);
            }
            RecoveryAction::Abandon { class, reason } => {
                run.feedback.clear();
                if class == FailureClass::BudgetExhausted {
                    run.record(stage, attempt, class, reason);
                }
                let next = match (class, stage) {
                    (FailureClass::Cancelled, _) => Stage::Abandoned,
                    (_, Stage::ResearchPending) => Stage::ResearchFailed,
                    (_, Stage::CodeGenPending) => Stage::CodeGenFailed,
                    (_, Stage::Rendering) => Stage::RenderFailed,
                    _ => Stage::Abandoned,
                };
                advance(run, next);
            }
        }
    }

    /// 持久化失败只告警，不影响 run 本身
    async fn persist(&self, run: &PipelineRun) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(run).await {
                tracing::warn!(run_id = %run.run_id, error = %e, "failed to persist run");
            }
        }
    }
}

/// 执行转移；非法转移属于编排缺陷，记录后放弃该 run
fn advance(run: &mut PipelineRun, next: Stage) {
    if let Err(e) = run.transition(next) {
        tracing::error!(run_id = %run.run_id, error = %e, "illegal transition");
        if !run.stage.is_terminal() {
            let _ = run.transition(Stage::Abandoned);
        }
    }
}
