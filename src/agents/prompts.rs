//! Agent 提示词
//!
//! 输出格式约束以 schemars 生成的 JSON Schema 注入 system prompt；
//! 修正反馈以编号列表附在 user 消息末尾。

use crate::schema::{document_schema_json, scene_draft_schema_json, CueKind};

const RESEARCH_SYSTEM: &str = "You are a research writer for short explainer videos in the style of 3Blue1Brown.
Turn the question into an explanation split into 3-6 sections that are narrated in order.

Rules:
- Output exactly one JSON object matching the schema below. No prose outside the JSON.
- Section ids are s1, s2, ... in playback order. Cue ids are c1, c2, ... unique across the document.
- Every section has narration (LaTeX allowed inside $...$), at least one visual cue and at least one reference.
- A reference's `source` must be one of the evidence ids listed in the user message (S1, S2, ...). Never invent sources.
- Cue payloads: equation = LaTeX source; icon = a short concept name (e.g. \"neural network\"); diagram / transition = a one-line scene directive.
- Optional `at_secs` hints are offsets into the section narration and must not decrease within a section.";

const CODE_SYSTEM: &str = "You are a Manim Community Edition engineer. Write one VoiceoverScene that animates the explanation document in the user message.

Rules:
- Output exactly one JSON object matching the schema below. No prose outside the JSON.
- The scene class subclasses VoiceoverScene and uses one `with self.voiceover(text=...)` block per section, in document order.
- Put a `# section: <section id>` comment line at the start of each section block and a `# cue: <cue id>` comment line before the code that shows each cue.
- Use only cue ids from the document. Equations use MathTex, icons use ImageMobject with the icon path given, diagrams and transitions use standard Manim mobjects and animations.
- The manifest lists, per section id, the cue spans (start offset and duration in seconds, relative to the section start). Exclusive cues must not overlap; mark layered cues with overlay = true.";

/// 研究阶段 system prompt
pub fn research_system_prompt() -> String {
    format!(
        "{}\n\n## Output JSON Schema (you must output valid JSON matching this)\n```json\n{}\n```",
        RESEARCH_SYSTEM,
        document_schema_json()
    )
}

/// 研究阶段 user 消息：问题 + 证据台账 + 修正反馈
pub fn research_user_prompt(
    question: &str,
    evidence: &[String],
    wants_visuals: bool,
    feedback: &[String],
) -> String {
    let mut out = format!("Question: {}\n", question.trim());
    out.push_str("\n## Evidence\n");
    for item in evidence {
        out.push_str(item);
        out.push('\n');
    }
    if wants_visuals {
        out.push_str("\nThe asker wants visuals: include icon cues for the key concepts.\n");
    }
    push_feedback(&mut out, feedback);
    out
}

/// 代码生成阶段 system prompt
pub fn code_system_prompt(supported: &[CueKind]) -> String {
    let kinds: Vec<&str> = supported.iter().map(|k| k.as_str()).collect();
    format!(
        "{}\n- Supported cue kinds: {}.\n\n## Output JSON Schema (you must output valid JSON matching this)\n```json\n{}\n```",
        CODE_SYSTEM,
        kinds.join(", "),
        scene_draft_schema_json()
    )
}

/// 代码生成阶段 user 消息：文档 JSON + 修正反馈
pub fn code_user_prompt(document_json: &str, feedback: &[String]) -> String {
    let mut out = format!("## Explanation document\n```json\n{document_json}\n```\n");
    push_feedback(&mut out, feedback);
    out
}

/// 自我修订：把校验违规回灌给模型
pub fn revision_prompt(violations: &[String]) -> String {
    let mut out = String::from(
        "The document you returned failed validation. Return the full corrected JSON object.\n",
    );
    for (i, v) in violations.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, v));
    }
    out
}

fn push_feedback(out: &mut String, feedback: &[String]) {
    if feedback.is_empty() {
        return;
    }
    out.push_str("\n## Fix these problems from the previous attempt\n");
    for (i, item) in feedback.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, item));
    }
}
