//! Explanation Document 校验器
//!
//! 按固定顺序检查：(a) 结构完整性 (b) cue 可解析性 (c) 引用完整性（id 不冲突）(d) 时序合理性。
//! 无副作用；违规以 (locator, rule) 列表返回，供 Orchestrator 作为修正反馈注入下一轮研究。

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::schema::document::{slugify, CueKind, ExplanationDocument, VisualCue};

/// 违规位置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Locator {
    Document,
    Section(usize),
    Cue(usize, usize),
    Reference(usize, usize),
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Document => write!(f, "document"),
            Locator::Section(s) => write!(f, "sections[{s}]"),
            Locator::Cue(s, c) => write!(f, "sections[{s}].cues[{c}]"),
            Locator::Reference(s, r) => write!(f, "sections[{s}].references[{r}]"),
        }
    }
}

/// 被违反的规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Rule {
    NoSections,
    EmptySectionId,
    EmptyNarration,
    MissingReference,
    MissingCue,
    EmptyReferenceField,
    EmptyLatex,
    UnbalancedLatex,
    EmptyIconReference,
    UnknownIcon(String),
    EmptyDirective,
    DuplicateSectionId(String),
    DuplicateCueId(String),
    UnknownCue(String),
    NegativeTiming,
    NonMonotonicTiming,
    InvalidDuration,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::NoSections => write!(f, "document has no sections"),
            Rule::EmptySectionId => write!(f, "section id is empty"),
            Rule::EmptyNarration => write!(f, "narration is empty"),
            Rule::MissingReference => write!(f, "section has no references"),
            Rule::MissingCue => write!(f, "section has no visual cues"),
            Rule::EmptyReferenceField => write!(f, "reference source or locator is empty"),
            Rule::EmptyLatex => write!(f, "equation cue has empty LaTeX source"),
            Rule::UnbalancedLatex => write!(f, "equation cue has unbalanced braces"),
            Rule::EmptyIconReference => write!(f, "icon cue has empty icon reference"),
            Rule::UnknownIcon(icon) => write!(f, "icon reference '{icon}' does not resolve"),
            Rule::EmptyDirective => write!(f, "cue has empty scene directive"),
            Rule::DuplicateSectionId(id) => write!(f, "section id '{id}' is used more than once"),
            Rule::DuplicateCueId(id) => write!(f, "cue id '{id}' is used more than once"),
            Rule::UnknownCue(id) => write!(f, "cue id '{id}' does not exist in the document"),
            Rule::NegativeTiming => write!(f, "cue timing hint is negative"),
            Rule::NonMonotonicTiming => write!(f, "cue timing hints are not in increasing order"),
            Rule::InvalidDuration => write!(f, "section duration hint must be positive"),
        }
    }
}

/// 一条违规
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub locator: Locator,
    pub rule: Rule,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.locator, self.rule)
    }
}

/// 校验结果
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Valid,
    Invalid(Vec<Violation>),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            ValidationResult::Valid => &[],
            ValidationResult::Invalid(v) => v,
        }
    }

    /// 转为可注入 prompt 的修正提示
    pub fn feedback(&self) -> Vec<String> {
        self.violations().iter().map(|v| v.to_string()).collect()
    }
}

/// 校验策略
#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    /// 每个 Section 至少一个 Visual Cue
    pub require_cues: bool,
    /// 已知图标集合；None 表示只检查引用格式
    pub known_icons: Option<HashSet<String>>,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            require_cues: true,
            known_icons: None,
        }
    }
}

/// 文档校验器
#[derive(Debug, Clone, Default)]
pub struct Validator {
    policy: ValidationPolicy,
}

impl Validator {
    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    pub fn validate(&self, document: &ExplanationDocument) -> ValidationResult {
        let mut violations = Vec::new();
        self.check_structure(document, &mut violations);
        self.check_cues(document, &mut violations);
        check_identity(document, &mut violations);
        check_ordering(document, &mut violations);

        if violations.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid(violations)
        }
    }

    /// 核对场景代码声明使用的 cue 是否都存在于源文档
    pub fn check_cue_usage<'a>(
        &self,
        document: &ExplanationDocument,
        used: impl IntoIterator<Item = &'a str>,
    ) -> Vec<Violation> {
        used.into_iter()
            .filter(|id| document.find_cue(id).is_none())
            .map(|id| Violation {
                locator: Locator::Document,
                rule: Rule::UnknownCue(id.to_string()),
            })
            .collect()
    }

    fn check_structure(&self, document: &ExplanationDocument, out: &mut Vec<Violation>) {
        if document.sections.is_empty() {
            out.push(Violation {
                locator: Locator::Document,
                rule: Rule::NoSections,
            });
        }
        for (s, section) in document.sections.iter().enumerate() {
            if section.id.trim().is_empty() {
                out.push(violation(Locator::Section(s), Rule::EmptySectionId));
            }
            if section.narration.trim().is_empty() {
                out.push(violation(Locator::Section(s), Rule::EmptyNarration));
            }
            if section.references.is_empty() {
                out.push(violation(Locator::Section(s), Rule::MissingReference));
            }
            if self.policy.require_cues && section.cues.is_empty() {
                out.push(violation(Locator::Section(s), Rule::MissingCue));
            }
            for (r, reference) in section.references.iter().enumerate() {
                if reference.source.trim().is_empty() || reference.locator.trim().is_empty() {
                    out.push(violation(Locator::Reference(s, r), Rule::EmptyReferenceField));
                }
            }
        }
    }

    fn check_cues(&self, document: &ExplanationDocument, out: &mut Vec<Violation>) {
        for (s, section) in document.sections.iter().enumerate() {
            for (c, cue) in section.cues.iter().enumerate() {
                if let Some(rule) = self.cue_defect(cue) {
                    out.push(violation(Locator::Cue(s, c), rule));
                }
            }
        }
    }

    fn cue_defect(&self, cue: &VisualCue) -> Option<Rule> {
        let payload = cue.payload.trim();
        match cue.kind {
            CueKind::Equation => {
                if payload.is_empty() {
                    Some(Rule::EmptyLatex)
                } else if !braces_balanced(payload) {
                    Some(Rule::UnbalancedLatex)
                } else {
                    None
                }
            }
            CueKind::Icon => {
                // 按规范化后的 slug 判断
                let slug = slugify(payload);
                if slug.is_empty() {
                    return Some(Rule::EmptyIconReference);
                }
                match &self.policy.known_icons {
                    Some(known) if !known.contains(&slug) => Some(Rule::UnknownIcon(slug)),
                    _ => None,
                }
            }
            CueKind::Diagram | CueKind::Transition => {
                if payload.is_empty() {
                    Some(Rule::EmptyDirective)
                } else {
                    None
                }
            }
        }
    }
}

/// 使用默认策略校验
pub fn validate(document: &ExplanationDocument) -> ValidationResult {
    Validator::default().validate(document)
}

fn violation(locator: Locator, rule: Rule) -> Violation {
    Violation { locator, rule }
}

/// id 比较忽略首尾空白，与 normalize 一致
fn check_identity(document: &ExplanationDocument, out: &mut Vec<Violation>) {
    let mut section_ids = HashSet::new();
    let mut cue_ids = HashSet::new();
    for (s, section) in document.sections.iter().enumerate() {
        let id = section.id.trim();
        if !id.is_empty() && !section_ids.insert(id) {
            out.push(violation(
                Locator::Section(s),
                Rule::DuplicateSectionId(id.to_string()),
            ));
        }
        for (c, cue) in section.cues.iter().enumerate() {
            let id = cue.id.trim();
            if !cue_ids.insert(id) {
                out.push(violation(Locator::Cue(s, c), Rule::DuplicateCueId(id.to_string())));
            }
        }
    }
}

fn check_ordering(document: &ExplanationDocument, out: &mut Vec<Violation>) {
    for (s, section) in document.sections.iter().enumerate() {
        if let Some(d) = section.duration_secs {
            if d <= 0.0 || !d.is_finite() {
                out.push(violation(Locator::Section(s), Rule::InvalidDuration));
            }
        }
        let mut last_exclusive: Option<f64> = None;
        for (c, cue) in section.cues.iter().enumerate() {
            let Some(at) = cue.at_secs else { continue };
            if at < 0.0 || !at.is_finite() {
                out.push(violation(Locator::Cue(s, c), Rule::NegativeTiming));
                continue;
            }
            if cue.overlay {
                continue;
            }
            if let Some(prev) = last_exclusive {
                if at < prev {
                    out.push(violation(Locator::Cue(s, c), Rule::NonMonotonicTiming));
                }
            }
            last_exclusive = Some(at);
        }
    }
}

/// 忽略 `\{` `\}` 转义后，花括号是否配对
fn braces_balanced(latex: &str) -> bool {
    let mut depth: i64 = 0;
    let mut escaped = false;
    for c in latex.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::document::{normalize, Reference, Section};

    fn cue(id: &str, kind: CueKind, payload: &str) -> VisualCue {
        VisualCue {
            id: id.into(),
            kind,
            payload: payload.into(),
            at_secs: None,
            overlay: false,
        }
    }

    fn section(id: &str, cues: Vec<VisualCue>) -> Section {
        Section {
            id: id.into(),
            title: format!("Title {id}"),
            narration: "The chain rule composes derivatives.".into(),
            cues,
            references: vec![Reference {
                source: "S1".into(),
                locator: "https://en.wikipedia.org/wiki/Chain_rule".into(),
            }],
            duration_secs: None,
        }
    }

    fn valid_doc() -> ExplanationDocument {
        ExplanationDocument {
            question: "Explain the chain rule".into(),
            sections: vec![
                section("s1", vec![cue("c1", CueKind::Equation, r"\frac{dy}{dx}")]),
                section(
                    "s2",
                    vec![
                        cue("c2", CueKind::Diagram, "two nested boxes g then f"),
                        cue("c3", CueKind::Icon, "gear"),
                    ],
                ),
            ],
        }
    }

    #[test]
    fn test_valid_document() {
        let doc = valid_doc();
        assert_eq!(validate(&doc), ValidationResult::Valid);
        let normalized = normalize(&doc);
        assert!(validate(&normalized).is_valid());
        assert_eq!(normalize(&normalized), normalized);
    }

    #[test]
    fn test_normalize_preserves_validity_on_edge_cases() {
        let padded = |doc: &mut ExplanationDocument| {
            doc.sections[0].id = "  s1 ".into();
            doc.sections[1].cues[0].id = " c2\t".into();
            doc.sections[1].cues[1].payload = "  Gear Wheel ".into();
            doc.sections[0].references[0].locator = " https://example.org ".into();
            doc.sections[0].cues[0].payload = format!("  {}  ", doc.sections[0].cues[0].payload);
        };
        let symbol_icon = |doc: &mut ExplanationDocument| {
            doc.sections[1].cues[1].payload = "!!!".into();
        };
        let near_duplicate_cues = |doc: &mut ExplanationDocument| {
            doc.sections[1].cues[0].id = "c1 ".into();
        };
        let near_duplicate_sections = |doc: &mut ExplanationDocument| {
            doc.sections[1].id = " s1".into();
        };
        let unicode_icon = |doc: &mut ExplanationDocument| {
            doc.sections[1].cues[1].payload = "Ångström ruler".into();
        };
        let edits: Vec<&dyn Fn(&mut ExplanationDocument)> = vec![
            &padded,
            &symbol_icon,
            &near_duplicate_cues,
            &near_duplicate_sections,
            &unicode_icon,
        ];

        let known = Validator::new(ValidationPolicy {
            require_cues: true,
            known_icons: Some(["gear", "gear-wheel"].iter().map(|s| s.to_string()).collect()),
        });
        for (i, edit) in edits.iter().enumerate() {
            let mut doc = valid_doc();
            edit(&mut doc);
            let normalized = normalize(&doc);
            assert_eq!(normalize(&normalized), normalized, "case {i}");
            for validator in [Validator::default(), known.clone()] {
                assert_eq!(
                    validator.validate(&doc).is_valid(),
                    validator.validate(&normalized).is_valid(),
                    "case {i}: {:?} vs {:?}",
                    validator.validate(&doc),
                    validator.validate(&normalized)
                );
            }
        }

        let mut doc = valid_doc();
        symbol_icon(&mut doc);
        assert_eq!(
            validate(&doc).violations(),
            &[Violation {
                locator: Locator::Cue(1, 1),
                rule: Rule::EmptyIconReference,
            }]
        );
        let mut doc = valid_doc();
        near_duplicate_cues(&mut doc);
        assert_eq!(
            validate(&doc).violations()[0].rule,
            Rule::DuplicateCueId("c1".into())
        );
    }

    #[test]
    fn test_missing_reference_cites_section() {
        let mut doc = valid_doc();
        doc.sections[1].references.clear();
        let result = validate(&doc);
        assert_eq!(
            result.violations(),
            &[Violation {
                locator: Locator::Section(1),
                rule: Rule::MissingReference,
            }]
        );
        assert_eq!(result.feedback(), vec!["sections[1]: section has no references"]);
    }

    #[test]
    fn test_structural_checks_come_first() {
        let mut doc = valid_doc();
        doc.sections[0].narration = "   ".into();
        doc.sections[1].cues[0].payload = String::new();
        let result = validate(&doc);
        let rules: Vec<&Rule> = result.violations().iter().map(|v| &v.rule).collect();
        assert_eq!(rules, vec![&Rule::EmptyNarration, &Rule::EmptyDirective]);
    }

    #[test]
    fn test_latex_braces() {
        assert!(braces_balanced(r"\frac{a}{b}"));
        assert!(braces_balanced(r"\{ x \}"));
        assert!(!braces_balanced(r"\frac{a}{b"));
        assert!(!braces_balanced("}{"));

        let mut doc = valid_doc();
        doc.sections[0].cues[0].payload = r"\frac{dy}{dx".into();
        assert_eq!(
            validate(&doc).violations()[0],
            Violation {
                locator: Locator::Cue(0, 0),
                rule: Rule::UnbalancedLatex,
            }
        );
    }

    #[test]
    fn test_known_icons() {
        let doc = valid_doc();
        let validator = Validator::new(ValidationPolicy {
            require_cues: true,
            known_icons: Some(["arrow".to_string()].into_iter().collect()),
        });
        let result = validator.validate(&doc);
        assert_eq!(
            result.violations(),
            &[Violation {
                locator: Locator::Cue(1, 1),
                rule: Rule::UnknownIcon("gear".into()),
            }]
        );
    }

    #[test]
    fn test_duplicate_ids() {
        let mut doc = valid_doc();
        doc.sections[1].cues[1].id = "c1".into();
        doc.sections[1].id = "s1".into();
        let rules: Vec<Rule> = validate(&doc)
            .violations()
            .iter()
            .map(|v| v.rule.clone())
            .collect();
        assert!(rules.contains(&Rule::DuplicateCueId("c1".into())));
        assert!(rules.contains(&Rule::DuplicateSectionId("s1".into())));
    }

    #[test]
    fn test_timing_order() {
        let mut doc = valid_doc();
        doc.sections[1].cues[0].at_secs = Some(3.0);
        doc.sections[1].cues[1].at_secs = Some(1.0);
        assert_eq!(
            validate(&doc).violations(),
            &[Violation {
                locator: Locator::Cue(1, 1),
                rule: Rule::NonMonotonicTiming,
            }]
        );

        doc.sections[1].cues[1].overlay = true;
        assert!(validate(&doc).is_valid());

        doc.sections[0].duration_secs = Some(0.0);
        assert_eq!(validate(&doc).violations()[0].rule, Rule::InvalidDuration);
    }

    #[test]
    fn test_cue_requirement_follows_policy() {
        let mut doc = valid_doc();
        doc.sections[0].cues.clear();
        assert!(!validate(&doc).is_valid());

        let lenient = Validator::new(ValidationPolicy {
            require_cues: false,
            known_icons: None,
        });
        assert!(lenient.validate(&doc).is_valid());
    }

    #[test]
    fn test_check_cue_usage() {
        let doc = valid_doc();
        let validator = Validator::default();
        assert!(validator.check_cue_usage(&doc, ["c1", "c3"]).is_empty());
        let unknown = validator.check_cue_usage(&doc, ["c1", "c9"]);
        assert_eq!(unknown.len(), 1);
        assert_eq!(unknown[0].rule, Rule::UnknownCue("c9".into()));
    }
}
