//! 研究规划：在调用 LLM 之前，按问题的字面特征决定要用哪些工具
//!
//! 数学特征 → 数值计算；提到源码文件 → 代码分析；
//! 概念类问题默认开启文献检索（平凡算术与无理论关键词的数学题除外）；乱码输入直接判定为无法解释。

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::tools::compute::MAX_EXPRESSION_CHARS;

const MATH_KEYWORDS: &[&str] = &[
    "integrate",
    "differentiate",
    "solve",
    "simplify",
    "limit",
    "series",
    "matrix",
    "determinant",
    "eigen",
    "gradient",
    "derivative",
    "converge",
    "proof",
];

const THEORY_TRIGGERS: &[&str] = &["proof", "theorem", "convergence", "bound", "rate"];

const VISUAL_TRIGGERS: &[&str] = &[
    "icon",
    "diagram",
    "visual",
    "animation",
    "illustration",
    "figure",
    "sketch",
    "draw",
    "picture",
    "image",
    "graphic",
];

static MATH_SYMBOLS: OnceLock<Option<Regex>> = OnceLock::new();
static EXPR_SPANS: OnceLock<Option<Regex>> = OnceLock::new();
static BOILERPLATE: OnceLock<Option<Regex>> = OnceLock::new();
static EXPLAIN_WITH: OnceLock<Option<Regex>> = OnceLock::new();
static CODE_PATH: OnceLock<Option<Regex>> = OnceLock::new();

fn regex(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

/// 研究计划
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResearchPlan {
    pub question: String,
    /// 问题无法理解，直接失败
    pub unintelligible: bool,
    pub is_math: bool,
    pub trivial_arithmetic: bool,
    pub literature_search: bool,
    /// 需要数值验证的表达式
    pub compute_expression: Option<String>,
    /// 问题提到的源码文件
    pub code_path: Option<String>,
    /// 提问方明确要求画面 / 图标
    pub wants_visuals: bool,
}

impl ResearchPlan {
    pub fn build(question: &str) -> Self {
        let is_math = looks_like_math(question);
        let trivial_arithmetic = is_trivial_arithmetic(question);
        let literature_search = needs_literature(question, is_math, trivial_arithmetic);
        let compute_expression = if is_math {
            extract_math_expr(question)
        } else {
            None
        };
        Self {
            question: question.to_string(),
            unintelligible: needs_clarification(question),
            is_math,
            trivial_arithmetic,
            literature_search,
            compute_expression,
            code_path: extract_code_path(question),
            wants_visuals: wants_visuals(question),
        }
    }

    /// 计划要求的工具步骤（日志用）
    pub fn steps(&self) -> Vec<&'static str> {
        let mut steps = Vec::new();
        if self.compute_expression.is_some() {
            steps.push("compute");
        }
        if self.code_path.is_some() {
            steps.push("code_analysis");
        }
        if self.literature_search {
            steps.push("search");
        }
        steps.push("draft");
        steps
    }
}

pub fn looks_like_math(text: &str) -> bool {
    let lower = text.to_lowercase();
    if MATH_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return true;
    }
    if text.chars().any(|c| matches!(c, '∫' | 'Σ' | '√' | '≈' | '≤' | '≥')) {
        return true;
    }
    // 运算符两侧都有操作数；连字符单词（state-of-the-art）不算
    regex(
        &MATH_SYMBOLS,
        r"[0-9)]\s*[-+*/^=]\s*[0-9a-zA-Z(]|[a-zA-Z)]\s*[+*^=]\s*[0-9a-zA-Z(]|[a-zA-Z)]\s+-\s+[0-9a-zA-Z(]",
    )
    .is_some_and(|re| re.is_match(text))
}

/// 问题中最长的数字 / 运算符片段（超长片段不参与计算）
pub fn extract_math_expr(text: &str) -> Option<String> {
    let re = regex(&EXPR_SPANS, r"[0-9.\s+\-*/^()]+")?;
    re.find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| s.chars().any(|c| c.is_ascii_digit()))
        .filter(|s| s.chars().count() <= MAX_EXPRESSION_CHARS)
        .max_by_key(|s| s.len())
        .map(String::from)
}

/// 问题中第一个形如 `dir/file.py` 的源码路径
pub fn extract_code_path(text: &str) -> Option<String> {
    let re = regex(
        &CODE_PATH,
        r"(?:^|[\s`'\x22(])([\w./-]*\w\.(?:py|js|ts|java|cpp|cs|go|rs|php|rb|swift|kt|scala|sql|sh|html|css|c|r|m))\b",
    )?;
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// 去掉 what is / calculate / compute 前缀后只剩数字与运算符，且不超过 30 字符
pub fn is_trivial_arithmetic(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    let stripped = match regex(&BOILERPLATE, r"^(what\s+is\s+|calculate\s+|compute\s+)") {
        Some(re) => re.replace(&lower, "").into_owned(),
        None => lower,
    };
    let t = stripped.trim_end_matches(['?', '.', '!', ' ']);
    !t.is_empty()
        && t.chars().count() <= 30
        && t.chars().any(|c| c.is_ascii_digit())
        && t
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_whitespace() || "()+-*/^.".contains(c))
}

/// 乱码判定：过短、只有符号、无元音且较长、单个无意义长词
pub fn needs_clarification(text: &str) -> bool {
    let t = text.trim();
    if t.chars().count() < 3 {
        return true;
    }
    if t.chars().all(|c| !c.is_alphanumeric()) {
        return true;
    }
    let has_vowel = t.chars().any(|c| "aeiouAEIOU".contains(c));
    let is_ascii_text = t.is_ascii();
    if is_ascii_text && !has_vowel && t.chars().count() > 6 && !is_trivial_arithmetic(t) {
        return true;
    }
    let single_word = t.chars().count() >= 6 && t.chars().all(|c| c.is_ascii_alphabetic());
    if single_word {
        let lower = t.to_lowercase();
        let meaningful = ["math", "code", "explain", "what", "why", "how"]
            .iter()
            .any(|w| lower.contains(w));
        return !meaningful;
    }
    false
}

pub fn needs_literature(text: &str, is_math: bool, trivial_arithmetic: bool) -> bool {
    if trivial_arithmetic {
        return false;
    }
    if is_math {
        let lower = text.to_lowercase();
        return THEORY_TRIGGERS.iter().any(|k| lower.contains(k));
    }
    true
}

pub fn wants_visuals(text: &str) -> bool {
    let lower = text.to_lowercase();
    if VISUAL_TRIGGERS.iter().any(|k| lower.contains(k)) {
        return true;
    }
    regex(
        &EXPLAIN_WITH,
        r"\b(explain|illustrate|visuali[sz]e|show|teach)\b.*\b(with|using)\b",
    )
    .is_some_and(|re| re.is_match(&lower))
}
