//! Sync Manifest：旁白片段 → Visual Cue 时间轴
//!
//! 每个 Section 对应一个片段（segment），片段内为按开始时间排序的 (cue, start, duration) 区间。
//! 不变量：偏移非负；非 overlay 区间互不重叠；cue 必须存在于源文档且属于该片段的 Section；
//! 每个片段至少一个区间，且未覆盖间隙不超过阈值。
//!
//! reconcile 负责把 CodeAgent 声明的（可能残缺的）时间轴修正为满足上述不变量的版本，
//! 每一处修正都记录为 adjustment，便于日志与调试。

use std::collections::HashSet;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::schema::document::{ExplanationDocument, Section};

const EPS: f64 = 1e-6;

/// 同步清单
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct SyncManifest {
    pub segments: Vec<SegmentTiming>,
}

/// 单个旁白片段的时间轴
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SegmentTiming {
    /// 对应 Section.id
    pub segment_id: String,
    pub duration_secs: f64,
    #[serde(default)]
    pub spans: Vec<CueSpan>,
}

/// cue 在片段内的出现区间（相对片段起点）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CueSpan {
    pub cue_id: String,
    pub start_secs: f64,
    pub duration_secs: f64,
    #[serde(default)]
    pub overlay: bool,
}

impl CueSpan {
    pub fn end_secs(&self) -> f64 {
        self.start_secs + self.duration_secs
    }
}

impl SyncManifest {
    pub fn segment(&self, segment_id: &str) -> Option<&SegmentTiming> {
        self.segments.iter().find(|s| s.segment_id == segment_id)
    }

    pub fn total_secs(&self) -> f64 {
        self.segments.iter().map(|s| s.duration_secs).sum()
    }

    /// 每个片段在整段视频中的绝对起点
    pub fn segment_offsets(&self) -> Vec<(&str, f64)> {
        let mut offset = 0.0;
        self.segments
            .iter()
            .map(|s| {
                let start = offset;
                offset += s.duration_secs;
                (s.segment_id.as_str(), start)
            })
            .collect()
    }
}

/// 同步策略
#[derive(Debug, Clone)]
pub struct SyncPolicy {
    /// 允许的最长无画面旁白间隙（秒）
    pub max_gap_secs: f64,
    pub words_per_minute: f64,
    /// 补排 cue 时的最短时长
    pub min_span_secs: f64,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            max_gap_secs: 2.0,
            words_per_minute: 150.0,
            min_span_secs: 0.5,
        }
    }
}

/// 清单违规
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ManifestIssue {
    MissingSegment(String),
    UnknownSegment(String),
    SegmentOutOfOrder(String),
    UnknownCue { segment: String, cue: String },
    ForeignCue { segment: String, cue: String },
    NegativeOffset { segment: String, cue: String },
    NonPositiveDuration { segment: String, cue: String },
    Overlap { segment: String, cue: String, previous: String },
    SpansOutOfOrder(String),
    Uncovered(String),
    Gap { segment: String, from_secs: f64, to_secs: f64 },
}

impl fmt::Display for ManifestIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestIssue::MissingSegment(s) => write!(f, "segment '{s}' is missing"),
            ManifestIssue::UnknownSegment(s) => write!(f, "segment '{s}' has no matching section"),
            ManifestIssue::SegmentOutOfOrder(s) => {
                write!(f, "segment '{s}' is out of section order")
            }
            ManifestIssue::UnknownCue { segment, cue } => {
                write!(f, "segment '{segment}': cue '{cue}' does not exist")
            }
            ManifestIssue::ForeignCue { segment, cue } => {
                write!(f, "segment '{segment}': cue '{cue}' belongs to another section")
            }
            ManifestIssue::NegativeOffset { segment, cue } => {
                write!(f, "segment '{segment}': cue '{cue}' starts before the segment")
            }
            ManifestIssue::NonPositiveDuration { segment, cue } => {
                write!(f, "segment '{segment}': cue '{cue}' has non-positive duration")
            }
            ManifestIssue::Overlap {
                segment,
                cue,
                previous,
            } => write!(
                f,
                "segment '{segment}': cue '{cue}' overlaps '{previous}' without overlay"
            ),
            ManifestIssue::SpansOutOfOrder(s) => {
                write!(f, "segment '{s}': spans are not ordered by start time")
            }
            ManifestIssue::Uncovered(s) => write!(f, "segment '{s}' has no cue coverage"),
            ManifestIssue::Gap {
                segment,
                from_secs,
                to_secs,
            } => write!(
                f,
                "segment '{segment}': narration uncovered from {from_secs:.2}s to {to_secs:.2}s"
            ),
        }
    }
}

/// 覆盖度
#[derive(Debug, Clone, PartialEq)]
pub enum Coverage {
    Complete,
    /// 未被任何 cue 覆盖的片段 id
    Incomplete(Vec<String>),
}

/// 每个 Section 是否都有至少一个 cue 区间
pub fn coverage(manifest: &SyncManifest, document: &ExplanationDocument) -> Coverage {
    let missing: Vec<String> = document
        .sections
        .iter()
        .filter(|section| {
            manifest
                .segment(&section.id)
                .map(|seg| seg.spans.is_empty())
                .unwrap_or(true)
        })
        .map(|section| section.id.clone())
        .collect();
    if missing.is_empty() {
        Coverage::Complete
    } else {
        Coverage::Incomplete(missing)
    }
}

/// 检查清单是否满足全部不变量
pub fn check_manifest(
    manifest: &SyncManifest,
    document: &ExplanationDocument,
    policy: &SyncPolicy,
) -> Vec<ManifestIssue> {
    let mut issues = Vec::new();
    let section_ids: HashSet<&str> = document.sections.iter().map(|s| s.id.as_str()).collect();

    for segment in &manifest.segments {
        if !section_ids.contains(segment.segment_id.as_str()) {
            issues.push(ManifestIssue::UnknownSegment(segment.segment_id.clone()));
        }
    }

    let ordered: Vec<&str> = manifest
        .segments
        .iter()
        .map(|s| s.segment_id.as_str())
        .filter(|id| section_ids.contains(id))
        .collect();
    let mut cursor = 0;
    for section in &document.sections {
        let Some(segment) = manifest.segment(&section.id) else {
            issues.push(ManifestIssue::MissingSegment(section.id.clone()));
            continue;
        };
        if ordered.get(cursor).copied() != Some(section.id.as_str()) {
            issues.push(ManifestIssue::SegmentOutOfOrder(section.id.clone()));
        }
        cursor += 1;
        check_segment(segment, section, document, policy, &mut issues);
    }
    issues
}

fn check_segment(
    segment: &SegmentTiming,
    section: &Section,
    document: &ExplanationDocument,
    policy: &SyncPolicy,
    issues: &mut Vec<ManifestIssue>,
) {
    let seg = &segment.segment_id;
    if segment.spans.is_empty() {
        issues.push(ManifestIssue::Uncovered(seg.clone()));
        return;
    }

    let mut last_start = f64::NEG_INFINITY;
    let mut last_exclusive: Option<&CueSpan> = None;
    for span in &segment.spans {
        match document.find_cue(&span.cue_id) {
            None => issues.push(ManifestIssue::UnknownCue {
                segment: seg.clone(),
                cue: span.cue_id.clone(),
            }),
            Some(_) if !section.cues.iter().any(|c| c.id == span.cue_id) => {
                issues.push(ManifestIssue::ForeignCue {
                    segment: seg.clone(),
                    cue: span.cue_id.clone(),
                })
            }
            Some(_) => {}
        }
        if span.start_secs < 0.0 {
            issues.push(ManifestIssue::NegativeOffset {
                segment: seg.clone(),
                cue: span.cue_id.clone(),
            });
        }
        if span.duration_secs <= 0.0 || !span.duration_secs.is_finite() {
            issues.push(ManifestIssue::NonPositiveDuration {
                segment: seg.clone(),
                cue: span.cue_id.clone(),
            });
        }
        if span.start_secs + EPS < last_start {
            issues.push(ManifestIssue::SpansOutOfOrder(seg.clone()));
        }
        last_start = span.start_secs;

        if !span.overlay {
            if let Some(prev) = last_exclusive {
                if span.start_secs + EPS < prev.end_secs() {
                    issues.push(ManifestIssue::Overlap {
                        segment: seg.clone(),
                        cue: span.cue_id.clone(),
                        previous: prev.cue_id.clone(),
                    });
                }
            }
            last_exclusive = Some(span);
        }
    }

    for (from, to) in uncovered_gaps(segment, policy.max_gap_secs) {
        issues.push(ManifestIssue::Gap {
            segment: seg.clone(),
            from_secs: from,
            to_secs: to,
        });
    }
}

/// 片段内超过阈值的未覆盖区间（含开头与结尾）
fn uncovered_gaps(segment: &SegmentTiming, max_gap: f64) -> Vec<(f64, f64)> {
    let mut spans: Vec<&CueSpan> = segment.spans.iter().collect();
    spans.sort_by(|a, b| a.start_secs.total_cmp(&b.start_secs));

    let mut gaps = Vec::new();
    let mut covered_end = 0.0_f64;
    for span in spans {
        if span.start_secs - covered_end > max_gap + EPS {
            gaps.push((covered_end, span.start_secs));
        }
        covered_end = covered_end.max(span.end_secs());
    }
    if segment.duration_secs - covered_end > max_gap + EPS {
        gaps.push((covered_end, segment.duration_secs));
    }
    gaps
}

/// 确定性默认排布：非 overlay cue 等分片段时长，overlay cue 覆盖整个片段
pub fn layout(document: &ExplanationDocument, policy: &SyncPolicy) -> SyncManifest {
    let segments = document
        .sections
        .iter()
        .map(|section| {
            let duration = section.narration_secs(policy.words_per_minute);
            let exclusive: Vec<_> = section.cues.iter().filter(|c| !c.overlay).collect();
            let share = if exclusive.is_empty() {
                duration
            } else {
                duration / exclusive.len() as f64
            };
            let mut spans = Vec::with_capacity(section.cues.len());
            let mut cursor = 0.0;
            for cue in &section.cues {
                if cue.overlay {
                    spans.push(CueSpan {
                        cue_id: cue.id.clone(),
                        start_secs: 0.0,
                        duration_secs: duration,
                        overlay: true,
                    });
                } else {
                    spans.push(CueSpan {
                        cue_id: cue.id.clone(),
                        start_secs: cursor,
                        duration_secs: share,
                        overlay: false,
                    });
                    cursor += share;
                }
            }
            spans.sort_by(|a, b| a.start_secs.total_cmp(&b.start_secs));
            SegmentTiming {
                segment_id: section.id.clone(),
                duration_secs: duration,
                spans,
            }
        })
        .collect();
    SyncManifest { segments }
}

/// 修正结果
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub manifest: SyncManifest,
    /// 每处修正的可读描述
    pub adjustments: Vec<String>,
}

/// 将声明的时间轴修正为满足不变量的版本
///
/// 无法修复的情况（某 Section 没有任何 cue 可用）以 Err 返回剩余违规。
pub fn reconcile(
    declared: &SyncManifest,
    document: &ExplanationDocument,
    policy: &SyncPolicy,
) -> Result<Reconciled, Vec<ManifestIssue>> {
    let mut adjustments = Vec::new();

    for segment in &declared.segments {
        if document.section(&segment.segment_id).is_none() {
            adjustments.push(format!(
                "dropped segment '{}' with no matching section",
                segment.segment_id
            ));
        }
    }

    let mut segments = Vec::with_capacity(document.sections.len());
    for section in &document.sections {
        let declared_segment = declared.segment(&section.id);
        segments.push(reconcile_segment(
            section,
            declared_segment,
            document,
            policy,
            &mut adjustments,
        ));
    }

    let manifest = SyncManifest { segments };
    let remaining = check_manifest(&manifest, document, policy);
    if remaining.is_empty() {
        Ok(Reconciled {
            manifest,
            adjustments,
        })
    } else {
        Err(remaining)
    }
}

fn reconcile_segment(
    section: &Section,
    declared: Option<&SegmentTiming>,
    document: &ExplanationDocument,
    policy: &SyncPolicy,
    adjustments: &mut Vec<String>,
) -> SegmentTiming {
    let seg = section.id.as_str();
    let estimated = section.narration_secs(policy.words_per_minute);
    let mut duration = match declared {
        Some(d) if d.duration_secs.is_finite() && d.duration_secs > estimated => d.duration_secs,
        _ => estimated,
    };
    let default_len = {
        let exclusive = section.cues.iter().filter(|c| !c.overlay).count().max(1);
        (estimated / exclusive as f64).max(policy.min_span_secs)
    };

    let mut spans: Vec<CueSpan> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    if let Some(declared) = declared {
        for span in &declared.spans {
            let Some(cue) = section.cues.iter().find(|c| c.id == span.cue_id) else {
                let why = if document.find_cue(&span.cue_id).is_some() {
                    "belongs to another section"
                } else {
                    "does not exist"
                };
                adjustments.push(format!("{seg}: dropped cue '{}' ({why})", span.cue_id));
                continue;
            };
            if !seen.insert(span.cue_id.clone()) {
                adjustments.push(format!("{seg}: dropped duplicate span for '{}'", span.cue_id));
                continue;
            }
            let mut fixed = span.clone();
            if !fixed.start_secs.is_finite() || fixed.start_secs < 0.0 {
                adjustments.push(format!("{seg}: clamped start of '{}' to 0", span.cue_id));
                fixed.start_secs = 0.0;
            }
            if !fixed.duration_secs.is_finite() || fixed.duration_secs <= 0.0 {
                adjustments.push(format!(
                    "{seg}: reset non-positive duration of '{}'",
                    span.cue_id
                ));
                fixed.duration_secs = default_len;
            }
            if fixed.overlay != cue.overlay {
                adjustments.push(format!(
                    "{seg}: overlay flag of '{}' taken from document",
                    span.cue_id
                ));
                fixed.overlay = cue.overlay;
            }
            spans.push(fixed);
        }
    }

    // 未被声明的 cue：按时序提示或接在最后一个非 overlay 区间之后
    for cue in &section.cues {
        if seen.contains(&cue.id) {
            continue;
        }
        let tail = spans
            .iter()
            .filter(|s| !s.overlay)
            .map(|s| s.end_secs())
            .fold(0.0_f64, f64::max);
        let (start, len) = if cue.overlay {
            (cue.at_secs.unwrap_or(0.0), duration)
        } else {
            (cue.at_secs.unwrap_or(tail).max(0.0), default_len)
        };
        adjustments.push(format!("{seg}: scheduled undeclared cue '{}' at {start:.2}s", cue.id));
        spans.push(CueSpan {
            cue_id: cue.id.clone(),
            start_secs: start,
            duration_secs: len,
            overlay: cue.overlay,
        });
    }

    spans.sort_by(|a, b| a.start_secs.total_cmp(&b.start_secs));

    // 非 overlay 区间去重叠：后者顺延到前者结束
    let mut prev_end: Option<f64> = None;
    let mut order: Vec<usize> = (0..spans.len()).collect();
    order.retain(|&i| !spans[i].overlay);
    for i in order {
        if let Some(end) = prev_end {
            if spans[i].start_secs + EPS < end {
                adjustments.push(format!(
                    "{seg}: shifted '{}' from {:.2}s to {:.2}s to remove overlap",
                    spans[i].cue_id, spans[i].start_secs, end
                ));
                spans[i].start_secs = end;
            }
        }
        prev_end = Some(spans[i].end_secs());
    }
    spans.sort_by(|a, b| a.start_secs.total_cmp(&b.start_secs));

    let visual_end = spans.iter().map(|s| s.end_secs()).fold(0.0_f64, f64::max);
    if visual_end > duration + EPS {
        adjustments.push(format!(
            "{seg}: extended segment from {duration:.2}s to {visual_end:.2}s to fit visuals"
        ));
        duration = visual_end;
    }

    close_gaps(seg, &mut spans, duration, policy.max_gap_secs, adjustments);

    SegmentTiming {
        segment_id: section.id.clone(),
        duration_secs: duration,
        spans,
    }
}

/// 拉伸区间以消除超过阈值的间隙：开头间隙前移首个区间，中间与结尾间隙延长前一个区间
fn close_gaps(
    seg: &str,
    spans: &mut [CueSpan],
    duration: f64,
    max_gap: f64,
    adjustments: &mut Vec<String>,
) {
    if spans.is_empty() {
        return;
    }
    if spans[0].start_secs > max_gap + EPS {
        adjustments.push(format!(
            "{seg}: moved '{}' to segment start to close leading gap",
            spans[0].cue_id
        ));
        spans[0].duration_secs += spans[0].start_secs;
        spans[0].start_secs = 0.0;
    }

    let mut covering = 0usize;
    let mut covered_end = spans[0].end_secs();
    for i in 1..spans.len() {
        let start = spans[i].start_secs;
        if start - covered_end > max_gap + EPS {
            adjustments.push(format!(
                "{seg}: stretched '{}' to {start:.2}s to close gap",
                spans[covering].cue_id
            ));
            spans[covering].duration_secs = start - spans[covering].start_secs;
            covered_end = start;
        }
        if spans[i].end_secs() >= covered_end {
            covered_end = spans[i].end_secs();
            covering = i;
        }
    }
    if duration - covered_end > max_gap + EPS {
        adjustments.push(format!(
            "{seg}: stretched '{}' to segment end to close trailing gap",
            spans[covering].cue_id
        ));
        spans[covering].duration_secs = duration - spans[covering].start_secs;
    }
}
