//! 文献检索适配器：arXiv（Atom feed，quick-xml 解析）与 Wikipedia（REST summary）
//!
//! GET 请求带超时与 User-Agent；摘要超过 max_summary_chars 时截断并追加 ...[truncated]。
//! 网络错误或非 2xx 响应统一报告为 ToolError::Unavailable，由 Toolbox 切换到下一个适配器。

use std::time::Duration;

use async_trait::async_trait;
use quick_xml::events::Event;
use reqwest::Client;
use serde::Deserialize;

use crate::tools::{DocumentSummary, SearchAdapter, ToolError};

const USER_AGENT: &str = "visocode/0.1 (+https://github.com/visocode)";

const TIME_KEYWORDS: &[&str] = &[
    "latest",
    "recent",
    "current",
    "new",
    "state-of-the-art",
    "cutting-edge",
    "emerging",
];

const QUALITY_KEYWORDS: &[&str] = &[
    "best",
    "most important",
    "seminal",
    "influential",
    "foundational",
    "top",
    "highly cited",
    "landmark",
    "classic",
];

fn build_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_default()
}

fn truncate(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > max_chars {
        format!(
            "{}...[truncated]",
            collapsed.chars().take(max_chars).collect::<String>()
        )
    } else {
        collapsed
    }
}

/// arXiv 排序策略：时效型查询按提交时间，其余按相关度
pub fn arxiv_sort_by(query: &str) -> &'static str {
    let lower = query.to_lowercase();
    let time_focused = TIME_KEYWORDS.iter().any(|k| lower.contains(k));
    let quality_focused = QUALITY_KEYWORDS.iter().any(|k| lower.contains(k));
    if time_focused && !quality_focused {
        "submittedDate"
    } else {
        "relevance"
    }
}

/// arXiv 检索
pub struct ArxivSearch {
    client: Client,
    endpoint: String,
    max_results: usize,
    max_summary_chars: usize,
}

impl ArxivSearch {
    pub fn new(
        endpoint: impl Into<String>,
        max_results: usize,
        max_summary_chars: usize,
        timeout_secs: u64,
    ) -> Self {
        Self {
            client: build_client(timeout_secs),
            endpoint: endpoint.into(),
            max_results,
            max_summary_chars,
        }
    }

    fn unavailable(&self, reason: impl Into<String>) -> ToolError {
        ToolError::Unavailable {
            tool: "arxiv".to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl SearchAdapter for ArxivSearch {
    fn name(&self) -> &str {
        "arxiv"
    }

    async fn search(&self, query: &str) -> Result<Vec<DocumentSummary>, ToolError> {
        let search_query = format!("all:{}", query.trim());
        let max_results = self.max_results.to_string();
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("search_query", search_query.as_str()),
                ("start", "0"),
                ("max_results", max_results.as_str()),
                ("sortBy", arxiv_sort_by(query)),
                ("sortOrder", "descending"),
            ])
            .send()
            .await
            .map_err(|e| self.unavailable(format!("request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(self.unavailable(format!("HTTP {}", resp.status())));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| self.unavailable(format!("read body: {e}")))?;
        parse_arxiv_feed(&body, self.max_summary_chars).map_err(|e| self.unavailable(e))
    }
}

#[derive(Default)]
struct EntryBuilder {
    id: String,
    title: String,
    summary: String,
    url: Option<String>,
    authors: Vec<String>,
}

/// 解析 arXiv Atom feed
pub fn parse_arxiv_feed(xml: &str, max_summary_chars: usize) -> Result<Vec<DocumentSummary>, String> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut out = Vec::new();
    let mut entry: Option<EntryBuilder> = None;
    let mut field: Option<String> = None;
    let mut in_author = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let local = e.local_name();
                let name = std::str::from_utf8(local.as_ref()).unwrap_or("");
                match name {
                    "entry" => entry = Some(EntryBuilder::default()),
                    "author" => in_author = true,
                    "id" | "title" | "summary" | "name" if entry.is_some() => {
                        field = Some(name.to_string());
                        if name == "name" && in_author {
                            if let Some(ent) = entry.as_mut() {
                                ent.authors.push(String::new());
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(ref e)) => {
                let local = e.local_name();
                if local.as_ref() == b"link" {
                    if let Some(ent) = entry.as_mut() {
                        let mut href = None;
                        let mut alternate = false;
                        for attr in e.attributes().flatten() {
                            let value = attr.unescape_value().map(|v| v.into_owned()).ok();
                            match attr.key.as_ref() {
                                b"href" => href = value,
                                b"rel" => alternate = value.as_deref() == Some("alternate"),
                                _ => {}
                            }
                        }
                        if alternate && ent.url.is_none() {
                            ent.url = href;
                        }
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                if let (Some(ent), Some(f)) = (entry.as_mut(), field.as_deref()) {
                    let text = e.unescape().map_err(|e| format!("XML text error: {e}"))?;
                    match f {
                        "id" => ent.id.push_str(&text),
                        "title" => ent.title.push_str(&text),
                        "summary" => ent.summary.push_str(&text),
                        "name" if in_author => {
                            if let Some(last) = ent.authors.last_mut() {
                                last.push_str(&text);
                            }
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let local = e.local_name();
                match local.as_ref() {
                    b"entry" => {
                        if let Some(ent) = entry.take() {
                            let id = ent.id.trim().to_string();
                            out.push(DocumentSummary {
                                url: ent.url.unwrap_or_else(|| id.clone()),
                                id,
                                title: truncate(&ent.title, 300),
                                summary: truncate(&ent.summary, max_summary_chars),
                                authors: ent
                                    .authors
                                    .into_iter()
                                    .map(|a| a.trim().to_string())
                                    .filter(|a| !a.is_empty())
                                    .collect(),
                            });
                        }
                    }
                    b"author" => in_author = false,
                    _ => {}
                }
                field = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML parse error: {e}")),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// Wikipedia REST summary 检索：以查询作为页面标题
pub struct WikipediaSearch {
    client: Client,
    endpoint: String,
    max_summary_chars: usize,
}

#[derive(Debug, Deserialize)]
struct WikiSummary {
    title: String,
    #[serde(default)]
    extract: String,
    #[serde(default)]
    content_urls: Option<WikiUrls>,
}

#[derive(Debug, Deserialize)]
struct WikiUrls {
    desktop: WikiPage,
}

#[derive(Debug, Deserialize)]
struct WikiPage {
    page: String,
}

impl WikipediaSearch {
    pub fn new(endpoint: impl Into<String>, max_summary_chars: usize, timeout_secs: u64) -> Self {
        Self {
            client: build_client(timeout_secs),
            endpoint: endpoint.into(),
            max_summary_chars,
        }
    }

    fn unavailable(&self, reason: impl Into<String>) -> ToolError {
        ToolError::Unavailable {
            tool: "wikipedia".to_string(),
            reason: reason.into(),
        }
    }
}

/// 页面标题：首字母大写，空格转下划线
pub fn wiki_title(query: &str) -> String {
    let joined = query.split_whitespace().collect::<Vec<_>>().join("_");
    let mut chars = joined.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[async_trait]
impl SearchAdapter for WikipediaSearch {
    fn name(&self) -> &str {
        "wikipedia"
    }

    async fn search(&self, query: &str) -> Result<Vec<DocumentSummary>, ToolError> {
        let title = wiki_title(query);
        if title.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/{}", self.endpoint.trim_end_matches('/'), title);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.unavailable(format!("request failed: {e}")))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !resp.status().is_success() {
            return Err(self.unavailable(format!("HTTP {}", resp.status())));
        }
        let summary: WikiSummary = resp
            .json()
            .await
            .map_err(|e| self.unavailable(format!("decode: {e}")))?;
        if summary.extract.trim().is_empty() {
            return Ok(Vec::new());
        }
        let page = summary
            .content_urls
            .map(|u| u.desktop.page)
            .unwrap_or(url);
        Ok(vec![DocumentSummary {
            id: page.clone(),
            title: summary.title,
            summary: truncate(&summary.extract, self.max_summary_chars),
            url: page,
            authors: Vec::new(),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>ArXiv Query</title>
  <entry>
    <id>http://arxiv.org/abs/1234.5678v1</id>
    <title>The Chain
      Rule Revisited</title>
    <summary>We study  composition &amp; derivatives.</summary>
    <author><name>Ada Lovelace</name></author>
    <author><name>Alan Turing</name></author>
    <link href="http://arxiv.org/abs/1234.5678v1" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/1234.5678v1" rel="related"/>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_arxiv_feed() {
        let docs = parse_arxiv_feed(FEED, 1200).unwrap();
        assert_eq!(docs.len(), 1);
        let d = &docs[0];
        assert_eq!(d.id, "http://arxiv.org/abs/1234.5678v1");
        assert_eq!(d.title, "The Chain Rule Revisited");
        assert_eq!(d.summary, "We study composition & derivatives.");
        assert_eq!(d.authors, vec!["Ada Lovelace", "Alan Turing"]);
        assert_eq!(d.url, "http://arxiv.org/abs/1234.5678v1");
    }

    #[test]
    fn test_truncate_summary() {
        let docs = parse_arxiv_feed(FEED, 8).unwrap();
        assert_eq!(docs[0].summary, "We study...[truncated]");
    }

    #[test]
    fn test_sort_strategy() {
        assert_eq!(arxiv_sort_by("latest diffusion models"), "submittedDate");
        assert_eq!(arxiv_sort_by("seminal papers on backprop"), "relevance");
        assert_eq!(arxiv_sort_by("chain rule"), "relevance");
    }

    #[test]
    fn test_wiki_title() {
        assert_eq!(wiki_title("chain rule"), "Chain_rule");
        assert_eq!(wiki_title("  "), "");
    }
}
