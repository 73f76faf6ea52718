//! 图标查找：扫描本地图标目录（walkdir），按概念 slug 匹配
//!
//! 文件名形如 `neural_network_icon_1.png` 索引为 `neural-network`；
//! 先做精确匹配，再退化为「图标 slug 的词包含概念的全部词」。

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::schema::slugify;
use crate::tools::ToolError;

const ICON_EXTENSIONS: &[&str] = &["png", "svg", "jpg", "jpeg"];

/// 已解析的图标
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconReference {
    /// 图标 slug，即 icon cue 的载荷
    pub id: String,
    pub path: PathBuf,
}

/// 图标查找接口
#[async_trait]
pub trait IconLookup: Send + Sync {
    async fn lookup(&self, concept: &str) -> Result<IconReference, ToolError>;

    /// 图标 id → 文件路径
    fn paths(&self) -> BTreeMap<String, PathBuf>;

    /// 全部已知图标 id，供校验器检查 icon cue
    fn known_icons(&self) -> HashSet<String> {
        self.paths().into_keys().collect()
    }
}

/// 本地图标库
#[derive(Debug, Clone, Default)]
pub struct IconLibrary {
    index: BTreeMap<String, PathBuf>,
}

impl IconLibrary {
    /// 扫描目录；目录不存在时返回空库
    pub fn scan(dir: &Path) -> Self {
        let mut index = BTreeMap::new();
        if !dir.exists() {
            tracing::warn!(dir = %dir.display(), "icon directory not found, icon lookup disabled");
            return Self { index };
        }
        for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            let ext_ok = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| ICON_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                .unwrap_or(false);
            if !ext_ok {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                let slug = icon_slug(stem);
                if !slug.is_empty() {
                    index.entry(slug).or_insert_with(|| path.to_path_buf());
                }
            }
        }
        tracing::debug!(count = index.len(), "icon library indexed");
        Self { index }
    }

    pub fn from_entries<I, S, P>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, P)>,
        S: AsRef<str>,
        P: Into<PathBuf>,
    {
        Self {
            index: entries
                .into_iter()
                .map(|(name, path)| (slugify(name.as_ref()), path.into()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn find(&self, concept: &str) -> Option<IconReference> {
        let wanted = slugify(concept);
        if wanted.is_empty() {
            return None;
        }
        if let Some(path) = self.index.get(&wanted) {
            return Some(IconReference {
                id: wanted,
                path: path.clone(),
            });
        }
        let words: Vec<&str> = wanted.split('-').collect();
        self.index
            .iter()
            .find(|(slug, _)| {
                let have: HashSet<&str> = slug.split('-').collect();
                words.iter().all(|w| have.contains(w))
            })
            .map(|(slug, path)| IconReference {
                id: slug.clone(),
                path: path.clone(),
            })
    }
}

/// 去掉生成器追加的 `_icon_<n>` 后缀
fn icon_slug(stem: &str) -> String {
    let base = match stem.rfind("_icon") {
        Some(idx) if stem[idx + 5..].trim_start_matches('_').chars().all(|c| c.is_ascii_digit()) => {
            &stem[..idx]
        }
        _ => stem,
    };
    slugify(base)
}

#[async_trait]
impl IconLookup for IconLibrary {
    async fn lookup(&self, concept: &str) -> Result<IconReference, ToolError> {
        self.find(concept)
            .ok_or_else(|| ToolError::NotFound(concept.to_string()))
    }

    fn paths(&self) -> BTreeMap<String, PathBuf> {
        self.index.clone()
    }
}
