//! CodeAgent：Explanation Document → Scene Code + Sync Manifest（LLM 驱动）
//!
//! 对模型产出做结构检查：section 标记按文档顺序出现、cue 标记只引用文档内的 cue、
//! 使用的 cue 类型受渲染端支持；声明的时间轴经 reconcile 修正后必须覆盖全部片段。

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::agents::prompts::{code_system_prompt, code_user_prompt};
use crate::agents::{extract_json_block, GeneratedScene, SceneGenerator};
use crate::core::error::CodeGenFailure;
use crate::llm::{LlmClient, Message};
use crate::schema::{
    reconcile, scene_draft_shape, CueKind, ExplanationDocument, SceneCode, SceneDraft,
    SyncManifest, SyncPolicy, Validator,
};

pub struct CodeAgent {
    llm: Arc<dyn LlmClient>,
    supported: Vec<CueKind>,
    sync: SyncPolicy,
    icon_paths: BTreeMap<String, PathBuf>,
}

impl CodeAgent {
    pub fn new(llm: Arc<dyn LlmClient>, supported: Vec<CueKind>, sync: SyncPolicy) -> Self {
        Self {
            llm,
            supported,
            sync,
            icon_paths: BTreeMap::new(),
        }
    }

    pub fn with_icon_paths(mut self, icon_paths: BTreeMap<String, PathBuf>) -> Self {
        self.icon_paths = icon_paths;
        self
    }

    fn user_prompt(&self, document: &ExplanationDocument, feedback: &[String]) -> String {
        let json = serde_json::to_string_pretty(document).unwrap_or_default();
        let mut prompt = code_user_prompt(&json, feedback);
        let used_icons: Vec<&str> = document
            .cues()
            .filter(|c| c.kind == CueKind::Icon)
            .map(|c| c.payload.as_str())
            .collect();
        if !used_icons.is_empty() {
            prompt.push_str("\n## Icon files\n");
            for id in used_icons {
                if let Some(path) = self.icon_paths.get(id) {
                    prompt.push_str(&format!("{id}: {}\n", path.display()));
                }
            }
        }
        prompt
    }
}

/// 检查场景代码并生成最终时间轴
pub fn check_scene(
    document: &ExplanationDocument,
    scene: &SceneCode,
    declared: Option<&SyncManifest>,
    supported: &[CueKind],
    sync: &SyncPolicy,
) -> Result<GeneratedScene, CodeGenFailure> {
    if scene.code.trim().is_empty() {
        return Err(CodeGenFailure::MalformedOutput("scene_code is empty".to_string()));
    }
    if !is_identifier(&scene.scene_name) {
        return Err(CodeGenFailure::MalformedOutput(format!(
            "scene_name '{}' is not a valid class name",
            scene.scene_name
        )));
    }
    if !scene.code.contains(&format!("class {}", scene.scene_name)) {
        return Err(CodeGenFailure::MalformedOutput(format!(
            "scene_code does not define class {}",
            scene.scene_name
        )));
    }

    let expected: Vec<&str> = document.sections.iter().map(|s| s.id.as_str()).collect();
    let found = scene.markers("section");
    if found != expected {
        return Err(CodeGenFailure::MalformedOutput(format!(
            "section markers must be [{}] in order, found [{}]",
            expected.join(", "),
            found.join(", ")
        )));
    }

    let used = scene.markers("cue");
    let unknown = Validator::default().check_cue_usage(document, used.iter().map(String::as_str));
    if !unknown.is_empty() {
        return Err(CodeGenFailure::MalformedOutput(
            unknown
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        ));
    }
    for id in &used {
        if let Some((_, cue)) = document.find_cue(id) {
            if !supported.contains(&cue.kind) {
                return Err(CodeGenFailure::UnsupportedCueType {
                    cue_id: cue.id.clone(),
                    kind: cue.kind,
                });
            }
        }
    }

    let used: HashSet<&str> = used.iter().map(String::as_str).collect();
    let shown = restrict_to(document, &used);
    let declared = declared.cloned().unwrap_or_default();
    match reconcile(&declared, &shown, sync) {
        Ok(reconciled) => {
            for note in &reconciled.adjustments {
                tracing::debug!(adjustment = %note, "manifest reconciled");
            }
            Ok(GeneratedScene {
                scene: scene.clone(),
                manifest: reconciled.manifest,
                adjustments: reconciled.adjustments,
            })
        }
        Err(issues) => Err(CodeGenFailure::ManifestIncomplete(
            issues.iter().map(|i| i.to_string()).collect(),
        )),
    }
}

/// 只保留场景代码实际展示的 cue
pub fn restrict_to(document: &ExplanationDocument, used: &HashSet<&str>) -> ExplanationDocument {
    let mut shown = document.clone();
    for section in &mut shown.sections {
        section.cues.retain(|c| used.contains(c.id.as_str()));
    }
    shown
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[async_trait]
impl SceneGenerator for CodeAgent {
    async fn generate(
        &self,
        document: &ExplanationDocument,
        feedback: &[String],
    ) -> Result<GeneratedScene, CodeGenFailure> {
        let messages = vec![
            Message::system(code_system_prompt(&self.supported)),
            Message::user(self.user_prompt(document, feedback)),
        ];
        let raw = self
            .llm
            .complete_json(&messages, &scene_draft_shape())
            .await
            .map_err(|e| CodeGenFailure::ModelUnavailable(e.to_string()))?;

        let json = extract_json_block(&raw).ok_or_else(|| {
            CodeGenFailure::MalformedOutput("response contains no JSON object".to_string())
        })?;
        let draft: SceneDraft = serde_json::from_str(json)
            .map_err(|e| CodeGenFailure::MalformedOutput(format!("scene JSON: {e}")))?;

        let scene = SceneCode::new(draft.scene_name.trim(), draft.scene_code);
        let generated = check_scene(
            document,
            &scene,
            draft.manifest.as_ref(),
            &self.supported,
            &self.sync,
        )?;
        tracing::info!(
            scene = %generated.scene.scene_name,
            segments = generated.manifest.segments.len(),
            adjustments = generated.adjustments.len(),
            "scene generated"
        );
        Ok(generated)
    }
}
