//! 本地文档检索：扫描资料目录（pdf / txt / md），切块后按词项重叠打分
//!
//! PDF 文本由 pdf-extract 抽取，按换页符 `\x0c` 分页。索引在首次检索时构建并缓存。
//! 结果 id 形如 `file://<path>#page=<n>`，可直接作为 Reference 的 locator。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use walkdir::WalkDir;

use crate::tools::{DocumentSummary, SearchAdapter, ToolError};

const DOC_EXTENSIONS: &[&str] = &["pdf", "txt", "md"];
const CHUNK_CHARS: usize = 1000;
const CHUNK_OVERLAP: usize = 150;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "with", "that", "this", "what", "how", "why", "does", "from",
    "into", "explain", "about", "which", "when", "where", "is", "of", "to", "in", "a", "an",
];

/// 一个文本块
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub path: PathBuf,
    /// 1 起；纯文本文件恒为 1
    pub page: usize,
    pub text: String,
}

/// 本地资料检索适配器
pub struct LocalDocuments {
    dir: PathBuf,
    max_results: usize,
    max_summary_chars: usize,
    index: OnceCell<Arc<Vec<Chunk>>>,
}

impl LocalDocuments {
    pub fn new(dir: impl Into<PathBuf>, max_results: usize, max_summary_chars: usize) -> Self {
        Self {
            dir: dir.into(),
            max_results,
            max_summary_chars,
            index: OnceCell::new(),
        }
    }

    async fn chunks(&self) -> Result<Arc<Vec<Chunk>>, ToolError> {
        let dir = self.dir.clone();
        self.index
            .get_or_try_init(|| async move {
                tokio::task::spawn_blocking(move || index_dir(&dir))
                    .await
                    .map(Arc::new)
                    .map_err(|e| ToolError::Unavailable {
                        tool: "local_docs".to_string(),
                        reason: format!("indexing task failed: {e}"),
                    })
            })
            .await
            .cloned()
    }
}

#[async_trait]
impl SearchAdapter for LocalDocuments {
    fn name(&self) -> &str {
        "local_docs"
    }

    async fn search(&self, query: &str) -> Result<Vec<DocumentSummary>, ToolError> {
        let chunks = self.chunks().await?;
        Ok(rank(&chunks, query, self.max_results)
            .into_iter()
            .map(|chunk| {
                let url = format!("file://{}#page={}", chunk.path.display(), chunk.page);
                let name = chunk
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                DocumentSummary {
                    id: url.clone(),
                    title: format!("{name} (p. {})", chunk.page),
                    summary: chunk.text.chars().take(self.max_summary_chars).collect(),
                    url,
                    authors: Vec::new(),
                }
            })
            .collect())
    }
}

/// 扫描目录并切块；无法读取的文件跳过
pub fn index_dir(dir: &Path) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    if !dir.exists() {
        tracing::warn!(dir = %dir.display(), "local document directory not found");
        return chunks;
    }
    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()).map(str::to_lowercase) else {
            continue;
        };
        if !DOC_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }
        let pages = match read_pages(path, &ext) {
            Ok(pages) => pages,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "document skipped");
                continue;
            }
        };
        for (i, page) in pages.iter().enumerate() {
            let blocks: Vec<&str> = page
                .split("\n\n")
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .collect();
            for text in chunk_texts(&blocks, CHUNK_CHARS, CHUNK_OVERLAP) {
                chunks.push(Chunk {
                    path: path.to_path_buf(),
                    page: i + 1,
                    text,
                });
            }
        }
    }
    tracing::debug!(dir = %dir.display(), chunks = chunks.len(), "local documents indexed");
    chunks
}

fn read_pages(path: &Path, ext: &str) -> Result<Vec<String>, String> {
    if ext == "pdf" {
        let text = pdf_extract::extract_text(path).map_err(|e| e.to_string())?;
        Ok(text.split('\x0c').map(String::from).collect())
    } else {
        std::fs::read_to_string(path)
            .map(|t| vec![t])
            .map_err(|e| e.to_string())
    }
}

/// 把段落拼成约 `target` 字符的块，相邻块保留 `overlap` 字符重叠
pub fn chunk_texts(blocks: &[&str], target: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buf: Vec<String> = Vec::new();
    let mut total = 0;
    for block in blocks {
        let len = block.chars().count();
        if total + len > target && !buf.is_empty() {
            let text = buf.join("\n");
            let count = text.chars().count();
            let tail: String = text.chars().skip(count.saturating_sub(overlap)).collect();
            chunks.push(text);
            total = tail.chars().count();
            buf = if tail.is_empty() { Vec::new() } else { vec![tail] };
        }
        buf.push(block.to_string());
        total += len;
    }
    if !buf.is_empty() {
        chunks.push(buf.join("\n"));
    }
    chunks
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// 按查询词命中数排序，零命中不返回
pub fn rank<'a>(chunks: &'a [Chunk], query: &str, limit: usize) -> Vec<&'a Chunk> {
    let wanted = terms(query);
    if wanted.is_empty() {
        return Vec::new();
    }
    let mut scored: Vec<(usize, &Chunk)> = chunks
        .iter()
        .map(|chunk| (terms(&chunk.text).intersection(&wanted).count(), chunk))
        .filter(|(score, _)| *score > 0)
        .collect();
    // 稳定排序：同分保持文件顺序
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().take(limit).map(|(_, c)| c).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_overlap() {
        let a = "a".repeat(600);
        let b = "b".repeat(600);
        let chunks = chunk_texts(&[&a, &b], 1000, 150);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], a);
        assert!(chunks[1].starts_with(&"a".repeat(150)));
        assert!(chunks[1].ends_with(&b));
    }

    #[tokio::test]
    async fn test_search_ranks_matching_chunks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("calculus.md"),
            "The chain rule differentiates composite functions.\n\nIt multiplies derivatives.",
        )
        .unwrap();
        std::fs::write(dir.path().join("biology.txt"), "Mitochondria produce energy.").unwrap();
        std::fs::write(dir.path().join("notes.docx"), "chain rule").unwrap();

        let docs = LocalDocuments::new(dir.path(), 5, 40);
        let hits = docs.search("Explain the chain rule").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].id.starts_with("file://"));
        assert!(hits[0].id.ends_with("calculus.md#page=1"));
        assert_eq!(hits[0].title, "calculus.md (p. 1)");
        assert_eq!(hits[0].summary.chars().count(), 40);

        assert!(docs.search("photosynthesis").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_dir_is_empty() {
        let docs = LocalDocuments::new("/nonexistent/visocode-docs", 5, 100);
        assert!(docs.search("anything").await.unwrap().is_empty());
    }
}
