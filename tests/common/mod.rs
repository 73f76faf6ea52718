//! 集成测试共用替身：脚本化 Researcher / SceneGenerator / RenderBackend 与示例文档

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use visocode::agents::{GeneratedScene, Researcher, SceneGenerator, TemplateSceneWriter};
use visocode::core::{CodeGenFailure, Orchestrator, ResearchFailure, RetryBudgets, StageTimeouts};
use visocode::render::{RenderBackend, RenderResult};
use visocode::schema::{
    CueKind, ExplanationDocument, Reference, SceneCode, Section, SyncManifest, SyncPolicy, VisualCue,
};

pub fn cue(id: &str, kind: CueKind, payload: &str) -> VisualCue {
    VisualCue {
        id: id.into(),
        kind,
        payload: payload.into(),
        at_secs: None,
        overlay: false,
    }
}

pub fn reference(source: &str, locator: &str) -> Reference {
    Reference {
        source: source.into(),
        locator: locator.into(),
    }
}

/// 链式法则：3 个章节，每节都有引用与画面
pub fn chain_rule_document() -> ExplanationDocument {
    ExplanationDocument {
        question: "What is the chain rule?".into(),
        sections: vec![
            Section {
                id: "s1".into(),
                title: "Functions inside functions".into(),
                narration: "Many functions are built by feeding one function into another, like $f(g(x))$.".into(),
                cues: vec![cue("c1", CueKind::Equation, "y = f(g(x))")],
                references: vec![reference("S1", "https://en.wikipedia.org/wiki/Chain_rule")],
                duration_secs: Some(5.0),
            },
            Section {
                id: "s2".into(),
                title: "Rates multiply".into(),
                narration: "If g changes x at one rate and f changes g at another, the rates multiply.".into(),
                cues: vec![
                    cue("c2", CueKind::Diagram, "two gears turning at different speeds"),
                    cue("c3", CueKind::Equation, "\\frac{dy}{dx} = f'(g(x))\\,g'(x)"),
                ],
                references: vec![reference("S1", "https://en.wikipedia.org/wiki/Chain_rule")],
                duration_secs: Some(6.0),
            },
            Section {
                id: "s3".into(),
                title: "An example".into(),
                narration: "For $\\sin(x^2)$ the derivative is $2x\\cos(x^2)$.".into(),
                cues: vec![
                    cue("c4", CueKind::Equation, "\\frac{d}{dx}\\sin(x^2) = 2x\\cos(x^2)"),
                    cue("c5", CueKind::Transition, "fade to summary"),
                ],
                references: vec![reference("S2", "2x cos(x^2)")],
                duration_secs: None,
            },
        ],
    }
}

/// 第二个章节缺少引用
pub fn document_missing_reference_in_section_2() -> ExplanationDocument {
    let mut doc = chain_rule_document();
    doc.sections[1].references.clear();
    doc
}

/// 按脚本返回研究结果；脚本耗尽后重复最后一项
pub struct ScriptedResearcher {
    script: Mutex<VecDeque<Result<ExplanationDocument, ResearchFailure>>>,
    last: Mutex<Option<Result<ExplanationDocument, ResearchFailure>>>,
    slow_calls: AtomicU32,
    pub calls: AtomicU32,
    pub feedback: Mutex<Vec<Vec<String>>>,
}

impl ScriptedResearcher {
    pub fn new(script: Vec<Result<ExplanationDocument, ResearchFailure>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            slow_calls: AtomicU32::new(0),
            calls: AtomicU32::new(0),
            feedback: Mutex::new(Vec::new()),
        }
    }

    /// 前 n 次调用挂起 5 秒
    pub fn with_slow_calls(self, n: u32) -> Self {
        self.slow_calls.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Researcher for ScriptedResearcher {
    async fn research(
        &self,
        _question: &str,
        feedback: &[String],
    ) -> Result<ExplanationDocument, ResearchFailure> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.feedback.lock().await.push(feedback.to_vec());
        if n < self.slow_calls.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        let mut script = self.script.lock().await;
        let mut last = self.last.lock().await;
        match script.pop_front() {
            Some(result) => {
                *last = Some(result.clone());
                result
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(ResearchFailure::ToolUnavailable("script empty".into()))),
        }
    }
}

/// 包装 TemplateSceneWriter：先按脚本失败若干次，并记录每次收到的反馈
pub struct RecordingGenerator {
    inner: TemplateSceneWriter,
    failures: Mutex<VecDeque<CodeGenFailure>>,
    always_fail: bool,
    /// 前 n 次返回空清单（不经自检）
    hollow_manifests: AtomicU32,
    pub calls: AtomicU32,
    pub feedback: Mutex<Vec<Vec<String>>>,
}

impl RecordingGenerator {
    pub fn new() -> Self {
        Self::failing(Vec::new())
    }

    pub fn failing(failures: Vec<CodeGenFailure>) -> Self {
        Self {
            inner: TemplateSceneWriter::new(
                vec![CueKind::Equation, CueKind::Diagram, CueKind::Icon, CueKind::Transition],
                SyncPolicy::default(),
            ),
            failures: Mutex::new(failures.into()),
            always_fail: false,
            hollow_manifests: AtomicU32::new(0),
            calls: AtomicU32::new(0),
            feedback: Mutex::new(Vec::new()),
        }
    }

    pub fn with_hollow_manifests(n: u32) -> Self {
        Self {
            hollow_manifests: AtomicU32::new(n),
            ..Self::new()
        }
    }

    pub fn always_failing() -> Self {
        Self {
            always_fail: true,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SceneGenerator for RecordingGenerator {
    async fn generate(
        &self,
        document: &ExplanationDocument,
        feedback: &[String],
    ) -> Result<GeneratedScene, CodeGenFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.feedback.lock().await.push(feedback.to_vec());
        if self.always_fail {
            return Err(CodeGenFailure::MalformedOutput("no scene class".into()));
        }
        if let Some(failure) = self.failures.lock().await.pop_front() {
            return Err(failure);
        }
        let mut generated = self.inner.generate(document, feedback).await?;
        let hollow = self
            .hollow_manifests
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hollow {
            generated.manifest = SyncManifest::default();
        }
        Ok(generated)
    }
}

/// 按脚本返回渲染结果；脚本耗尽后按代码摘要确定性地成功
pub struct ScriptedRenderer {
    script: Mutex<VecDeque<RenderResult>>,
    delay: Duration,
    pub calls: AtomicU32,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedRenderer {
    pub fn new(script: Vec<RenderResult>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RenderBackend for ScriptedRenderer {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn render(&self, scene: &SceneCode) -> RenderResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(result) = self.script.lock().await.pop_front() {
            return result;
        }
        let digest = scene.digest();
        RenderResult::Success {
            artifact_path: PathBuf::from(format!("media/{}.mp4", &digest[..12])),
            duration_rendered: 10.0 + (scene.code.len() % 50) as f64,
        }
    }
}

pub fn budgets(research: u32, codegen: u32, render: u32) -> RetryBudgets {
    RetryBudgets {
        max_research_retries: research,
        max_codegen_retries: codegen,
        render_retry_budget: render,
    }
}

pub fn short_timeouts() -> StageTimeouts {
    StageTimeouts {
        research: Duration::from_secs(2),
        codegen: Duration::from_secs(2),
        render: Duration::from_secs(2),
    }
}

pub fn orchestrator(
    researcher: Arc<dyn Researcher>,
    generator: Arc<dyn SceneGenerator>,
    renderer: Arc<dyn RenderBackend>,
) -> Orchestrator {
    Orchestrator::new(researcher, generator, renderer)
        .with_budgets(budgets(2, 2, 2))
        .with_timeouts(short_timeouts())
        .with_admission_backoff(Duration::from_millis(20))
}
