//! Explanation Document：研究阶段输出的结构化中间表示
//!
//! Section 顺序即播放顺序；每个 Section 的 id 同时是 Sync Manifest 中的旁白片段 id。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 研究阶段产出的解说文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExplanationDocument {
    /// 原始问题
    pub question: String,
    /// 按播放顺序排列的章节
    pub sections: Vec<Section>,
}

/// 单个章节：标题、旁白、画面提示、引用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Section {
    /// 旁白片段 id（如 "s1"），文档内唯一
    pub id: String,
    pub title: String,
    /// 旁白文本（可含 `$...$` LaTeX）
    pub narration: String,
    #[serde(default)]
    pub cues: Vec<VisualCue>,
    #[serde(default)]
    pub references: Vec<Reference>,
    /// 旁白时长提示（秒），缺省时按语速估算
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}

/// 画面提示
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VisualCue {
    /// 文档内唯一
    pub id: String,
    pub kind: CueKind,
    /// equation: LaTeX 源码；icon: 图标引用；diagram / transition: 场景指令
    pub payload: String,
    /// 相对本章节旁白起点的出现时刻（秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_secs: Option<f64>,
    /// 叠加层：允许与其它 cue 时间重叠
    #[serde(default)]
    pub overlay: bool,
}

/// Visual Cue 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CueKind {
    Equation,
    Diagram,
    Icon,
    Transition,
}

impl CueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CueKind::Equation => "equation",
            CueKind::Diagram => "diagram",
            CueKind::Icon => "icon",
            CueKind::Transition => "transition",
        }
    }
}

impl std::fmt::Display for CueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 引用：来源标识（工具调用产生的 source id）与定位（URL / 表达式 / 页码）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Reference {
    pub source: String,
    pub locator: String,
}

impl ExplanationDocument {
    /// 按 id 查找 cue，返回 (所属 section 下标, cue)
    pub fn find_cue(&self, cue_id: &str) -> Option<(usize, &VisualCue)> {
        self.sections.iter().enumerate().find_map(|(idx, section)| {
            section
                .cues
                .iter()
                .find(|cue| cue.id == cue_id)
                .map(|cue| (idx, cue))
        })
    }

    pub fn section(&self, id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == id)
    }

    /// 所有 cue，按播放顺序
    pub fn cues(&self) -> impl Iterator<Item = &VisualCue> {
        self.sections.iter().flat_map(|s| s.cues.iter())
    }
}

impl Section {
    /// 旁白时长：优先使用提示，否则按语速估算（至少 1 秒）
    pub fn narration_secs(&self, words_per_minute: f64) -> f64 {
        if let Some(d) = self.duration_secs.filter(|d| *d > 0.0) {
            return d;
        }
        let words = self.narration.split_whitespace().count() as f64;
        let wpm = if words_per_minute > 0.0 { words_per_minute } else { 150.0 };
        (words / wpm * 60.0).max(1.0)
    }
}

/// 规范化：去除首尾空白，图标引用转为 slug。幂等。
pub fn normalize(document: &ExplanationDocument) -> ExplanationDocument {
    ExplanationDocument {
        question: document.question.trim().to_string(),
        sections: document
            .sections
            .iter()
            .map(|section| Section {
                id: section.id.trim().to_string(),
                title: section.title.trim().to_string(),
                narration: section.narration.trim().to_string(),
                cues: section
                    .cues
                    .iter()
                    .map(|cue| VisualCue {
                        id: cue.id.trim().to_string(),
                        kind: cue.kind,
                        payload: match cue.kind {
                            CueKind::Icon => slugify(&cue.payload),
                            _ => cue.payload.trim().to_string(),
                        },
                        at_secs: cue.at_secs,
                        overlay: cue.overlay,
                    })
                    .collect(),
                references: section
                    .references
                    .iter()
                    .map(|r| Reference {
                        source: r.source.trim().to_string(),
                        locator: r.locator.trim().to_string(),
                    })
                    .collect(),
                duration_secs: section.duration_secs,
            })
            .collect(),
    }
}

/// 小写 + 非字母数字折叠为 '-'
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.trim().chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}
