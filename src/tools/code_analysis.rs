//! 代码分析：读取问题中提到的源文件，给出语言、规模与定义大纲
//!
//! 只允许访问配置的代码根目录之内的文件。非 UTF-8 内容按有损方式解码。

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::tools::ToolError;

/// 识别的源码扩展名与语言
const LANGUAGES: &[(&str, &str)] = &[
    ("py", "Python"),
    ("js", "JavaScript"),
    ("ts", "TypeScript"),
    ("java", "Java"),
    ("cpp", "C++"),
    ("c", "C"),
    ("cs", "C#"),
    ("go", "Go"),
    ("rs", "Rust"),
    ("php", "PHP"),
    ("rb", "Ruby"),
    ("swift", "Swift"),
    ("kt", "Kotlin"),
    ("scala", "Scala"),
    ("r", "R"),
    ("m", "MATLAB"),
    ("sql", "SQL"),
    ("sh", "Shell Script"),
    ("html", "HTML"),
    ("css", "CSS"),
];

const MAX_OUTLINE: usize = 40;

static DEFINITION: OnceLock<Option<Regex>> = OnceLock::new();

/// 分析结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSummary {
    /// 相对代码根目录的路径
    pub path: String,
    pub language: String,
    pub lines: usize,
    pub chars: usize,
    /// 函数 / 类 / 结构体定义行
    pub outline: Vec<String>,
    /// 截断后的源码
    pub excerpt: String,
}

impl CodeSummary {
    /// 作为证据摘录的文本
    pub fn render(&self) -> String {
        format!(
            "{} file, {} lines\ndefinitions:\n{}\n---\n{}",
            self.language,
            self.lines,
            self.outline.join("\n"),
            self.excerpt
        )
    }
}

pub fn language_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    LANGUAGES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, lang)| *lang)
}

/// 源码文件分析器
#[derive(Debug, Clone)]
pub struct CodeAnalyzer {
    root: PathBuf,
    max_excerpt_chars: usize,
}

impl CodeAnalyzer {
    pub fn new(root: impl Into<PathBuf>, max_excerpt_chars: usize) -> Self {
        Self {
            root: root.into(),
            max_excerpt_chars,
        }
    }

    fn unavailable(reason: impl Into<String>) -> ToolError {
        ToolError::Unavailable {
            tool: "code_analysis".to_string(),
            reason: reason.into(),
        }
    }

    /// 解析到根目录内的真实路径
    fn resolve(&self, trimmed: &str) -> Result<PathBuf, ToolError> {
        let root = self
            .root
            .canonicalize()
            .map_err(|e| Self::unavailable(format!("code root {}: {e}", self.root.display())))?;
        let candidate = root.join(trimmed);
        let path = candidate
            .canonicalize()
            .map_err(|_| ToolError::NotFound(trimmed.to_string()))?;
        if !path.starts_with(&root) {
            return Err(ToolError::NotFound(trimmed.to_string()));
        }
        Ok(path)
    }

    pub async fn analyze(&self, requested: &str) -> Result<CodeSummary, ToolError> {
        let requested = requested.trim().trim_matches(|c: char| c == '"' || c == '\'' || c == '`');
        let path = self.resolve(requested)?;
        let Some(language) = language_for(&path) else {
            return Err(Self::unavailable(format!("{requested}: not a recognised source file")));
        };
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| Self::unavailable(format!("{requested}: {e}")))?;
        let code = String::from_utf8_lossy(&bytes);
        if code.trim().is_empty() {
            return Err(Self::unavailable(format!("{requested}: file is empty")));
        }
        Ok(CodeSummary {
            path: requested.to_string(),
            language: language.to_string(),
            lines: code.lines().count(),
            chars: code.chars().count(),
            outline: outline(&code),
            excerpt: code.chars().take(self.max_excerpt_chars).collect(),
        })
    }
}

/// 定义行大纲（行号: 内容）
pub fn outline(code: &str) -> Vec<String> {
    let Some(re) = DEFINITION
        .get_or_init(|| {
            Regex::new(
                r"^\s*(pub(\([^)]*\))?\s+)?(async\s+)?(def|class|fn|struct|enum|trait|impl|func|function|interface|module)\b",
            )
            .ok()
        })
        .as_ref()
    else {
        return Vec::new();
    };
    code.lines()
        .enumerate()
        .filter(|(_, line)| re.is_match(line))
        .take(MAX_OUTLINE)
        .map(|(i, line)| format!("{}: {}", i + 1, line.trim()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_analyze_python_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("algos")).unwrap();
        std::fs::write(
            dir.path().join("algos/sort.py"),
            "def bubble(xs):\n    for i in range(len(xs)):\n        pass\n\nclass Heap:\n    def push(self, x):\n        pass\n",
        )
        .unwrap();

        let analyzer = CodeAnalyzer::new(dir.path(), 20);
        let summary = analyzer.analyze("'algos/sort.py'").await.unwrap();
        assert_eq!(summary.path, "algos/sort.py");
        assert_eq!(summary.language, "Python");
        assert_eq!(summary.lines, 7);
        assert_eq!(
            summary.outline,
            vec!["1: def bubble(xs):", "5: class Heap:", "6: def push(self, x):"]
        );
        assert_eq!(summary.excerpt.chars().count(), 20);
        assert!(summary.render().starts_with("Python file, 7 lines"));
    }

    #[tokio::test]
    async fn test_paths_outside_root_are_refused() {
        let outer = tempfile::tempdir().unwrap();
        std::fs::write(outer.path().join("secret.py"), "x = 1\n").unwrap();
        let root = outer.path().join("repo");
        std::fs::create_dir(&root).unwrap();

        let analyzer = CodeAnalyzer::new(&root, 100);
        assert!(matches!(
            analyzer.analyze("../secret.py").await,
            Err(ToolError::NotFound(_))
        ));
        assert!(matches!(
            analyzer.analyze("missing.py").await,
            Err(ToolError::NotFound(_))
        ));
    }

    #[test]
    fn test_language_and_outline() {
        assert_eq!(language_for(Path::new("a/b.RS")), Some("Rust"));
        assert_eq!(language_for(Path::new("notes.txt")), None);
        assert_eq!(
            outline("pub(crate) async fn run() {}\nlet x = 1;\nimpl Foo {}"),
            vec!["1: pub(crate) async fn run() {}", "3: impl Foo {}"]
        );
    }
}
