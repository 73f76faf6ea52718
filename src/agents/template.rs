//! TemplateSceneWriter：不依赖 LLM 的确定性场景生成
//!
//! 每个 section 生成一个 `with self.voiceover(text=...)` 块；equation → MathTex，icon → ImageMobject，
//! diagram → Text 指令占位，transition → 清场。时间轴按章节时长等分排布。
//! 渲染端不支持的 cue 类型直接跳过。

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::agents::code::{check_scene, restrict_to};
use crate::agents::{GeneratedScene, SceneGenerator};
use crate::core::error::CodeGenFailure;
use crate::schema::{layout, CueKind, CueSpan, ExplanationDocument, SceneCode, SyncPolicy, VisualCue};

const SCENE_NAME: &str = "Explainer";

pub struct TemplateSceneWriter {
    supported: Vec<CueKind>,
    sync: SyncPolicy,
    icon_paths: BTreeMap<String, PathBuf>,
}

impl TemplateSceneWriter {
    pub fn new(supported: Vec<CueKind>, sync: SyncPolicy) -> Self {
        Self {
            supported,
            sync,
            icon_paths: BTreeMap::new(),
        }
    }

    pub fn with_icon_paths(mut self, icon_paths: BTreeMap<String, PathBuf>) -> Self {
        self.icon_paths = icon_paths;
        self
    }

    /// 生成场景源码与配套时间轴
    pub fn write(&self, document: &ExplanationDocument) -> Result<GeneratedScene, CodeGenFailure> {
        let shown_ids: HashSet<&str> = document
            .cues()
            .filter(|c| self.supported.contains(&c.kind))
            .map(|c| c.id.as_str())
            .collect();
        let shown = restrict_to(document, &shown_ids);
        let manifest = layout(&shown, &self.sync);

        let mut code = String::new();
        code.push_str("from manim import *\n");
        code.push_str("from manim_voiceover import VoiceoverScene\n");
        code.push_str("from manim_voiceover.services.gtts import GTTSService\n\n\n");
        let _ = writeln!(code, "class {SCENE_NAME}(VoiceoverScene):");
        code.push_str("    def construct(self):\n");
        code.push_str("        self.set_speech_service(GTTSService())\n");

        for (section, segment) in shown.sections.iter().zip(&manifest.segments) {
            code.push('\n');
            let _ = writeln!(code, "        # section: {}", section.id);
            let _ = writeln!(code, "        title = Text({}, font_size=40).to_edge(UP)", py_str(&section.title));
            code.push_str("        self.add(title)\n");
            let _ = writeln!(
                code,
                "        with self.voiceover(text={}) as tracker:",
                py_str(&spoken(&section.narration))
            );
            let mut cursor = 0.0_f64;
            let mut previous: Option<String> = None;
            for span in &segment.spans {
                let Some(cue) = section.cues.iter().find(|c| c.id == span.cue_id) else {
                    continue;
                };
                if !span.overlay && span.start_secs > cursor + 1e-6 {
                    let _ = writeln!(code, "            self.wait({:.2})", span.start_secs - cursor);
                }
                if !span.overlay {
                    if let Some(prev) = previous.take() {
                        let _ = writeln!(code, "            self.play(FadeOut({prev}), run_time=0.3)");
                    }
                }
                self.emit_cue(&mut code, cue, span);
                if !span.overlay {
                    cursor = span.end_secs();
                    if cue.kind != CueKind::Transition {
                        previous = Some(var_name(&cue.id));
                    }
                }
            }
            code.push_str("        self.play(*[FadeOut(m) for m in self.mobjects])\n");
        }
        code.push_str("        self.wait()\n");

        let scene = SceneCode::new(SCENE_NAME, code);
        check_scene(document, &scene, Some(&manifest), &self.supported, &self.sync)
    }

    fn emit_cue(&self, code: &mut String, cue: &VisualCue, span: &CueSpan) {
        let var = var_name(&cue.id);
        let run_time = span.duration_secs.min(1.0);
        let hold = (span.duration_secs - run_time).max(0.0);
        let _ = writeln!(code, "            # cue: {}", cue.id);
        match cue.kind {
            CueKind::Equation => {
                let _ = writeln!(code, "            {var} = MathTex({})", py_str(&cue.payload));
                let _ = writeln!(code, "            self.play(Write({var}), run_time={run_time:.2})");
            }
            CueKind::Icon => match self.icon_paths.get(&cue.payload) {
                Some(path) => {
                    let _ = writeln!(
                        code,
                        "            {var} = ImageMobject({}).scale_to_fit_height(2)",
                        py_str(&path.display().to_string())
                    );
                    let _ = writeln!(code, "            self.play(FadeIn({var}), run_time={run_time:.2})");
                }
                None => {
                    let _ = writeln!(code, "            {var} = Text({}, font_size=32)", py_str(&cue.payload));
                    let _ = writeln!(code, "            self.play(FadeIn({var}), run_time={run_time:.2})");
                }
            },
            CueKind::Diagram => {
                let _ = writeln!(code, "            {var} = Text({}, font_size=32)", py_str(&cue.payload));
                let _ = writeln!(code, "            self.play(Create({var}), run_time={run_time:.2})");
            }
            CueKind::Transition => {
                let _ = writeln!(code, "            leftovers = [m for m in self.mobjects if m is not title]");
                let _ = writeln!(code, "            if leftovers:");
                let _ = writeln!(
                    code,
                    "                self.play(*[FadeOut(m) for m in leftovers], run_time={run_time:.2})"
                );
            }
        }
        if hold > 0.0 && !span.overlay {
            let _ = writeln!(code, "            self.wait({hold:.2})");
        }
    }
}

/// 旁白朗读文本：去掉 `$` 定界符（字幕保留原文）
fn spoken(narration: &str) -> String {
    narration.replace('$', "")
}

fn var_name(cue_id: &str) -> String {
    let cleaned: String = cue_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("cue_{cleaned}")
}

/// Python 双引号字符串字面量
fn py_str(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

#[async_trait]
impl SceneGenerator for TemplateSceneWriter {
    async fn generate(
        &self,
        document: &ExplanationDocument,
        _feedback: &[String],
    ) -> Result<GeneratedScene, CodeGenFailure> {
        self.write(document)
    }
}
