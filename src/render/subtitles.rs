//! SRT 字幕：每个旁白片段一条，时间取自 Sync Manifest，文本保留 `$...$` 原样

use std::fmt::Write as _;

use crate::schema::{ExplanationDocument, SyncManifest};

/// `HH:MM:SS,mmm`
pub fn srt_timestamp(secs: f64) -> String {
    let total_ms = (secs.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    format!(
        "{:02}:{:02}:{:02},{:03}",
        total_secs / 3600,
        (total_secs / 60) % 60,
        total_secs % 60,
        ms
    )
}

pub fn write_srt(document: &ExplanationDocument, manifest: &SyncManifest) -> String {
    let mut out = String::new();
    let mut index = 1;
    for ((segment_id, start), segment) in manifest.segment_offsets().into_iter().zip(&manifest.segments) {
        let Some(section) = document.section(segment_id) else {
            continue;
        };
        let text = section.narration.trim();
        if text.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{index}");
        let _ = writeln!(
            out,
            "{} --> {}",
            srt_timestamp(start),
            srt_timestamp(start + segment.duration_secs)
        );
        let _ = writeln!(out, "{text}");
        out.push('\n');
        index += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SegmentTiming, Section};

    #[test]
    fn test_srt_timestamp() {
        assert_eq!(srt_timestamp(0.0), "00:00:00,000");
        assert_eq!(srt_timestamp(61.25), "00:01:01,250");
        assert_eq!(srt_timestamp(3723.0), "01:02:03,000");
    }

    #[test]
    fn test_write_srt_keeps_latex() {
        let section = |id: &str, narration: &str| Section {
            id: id.into(),
            title: id.into(),
            narration: narration.into(),
            cues: vec![],
            references: vec![],
            duration_secs: None,
        };
        let doc = ExplanationDocument {
            question: "q".into(),
            sections: vec![section("s1", "Let $y = f(g(x))$."), section("s2", "Then multiply.")],
        };
        let manifest = SyncManifest {
            segments: vec![
                SegmentTiming {
                    segment_id: "s1".into(),
                    duration_secs: 4.0,
                    spans: vec![],
                },
                SegmentTiming {
                    segment_id: "s2".into(),
                    duration_secs: 2.5,
                    spans: vec![],
                },
            ],
        };
        let srt = write_srt(&doc, &manifest);
        assert_eq!(
            srt,
            "1\n00:00:00,000 --> 00:00:04,000\nLet $y = f(g(x))$.\n\n\
             2\n00:00:04,000 --> 00:00:06,500\nThen multiply.\n\n"
        );
    }
}
