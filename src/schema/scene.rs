//! Scene Code：CodeAgent 产出的可执行场景程序
//!
//! 生成后不可修改，只能整体重新生成。

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneCode {
    /// Manim Scene 类名
    pub scene_name: String,
    /// Python 源码
    pub code: String,
}

impl SceneCode {
    pub fn new(scene_name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            scene_name: scene_name.into(),
            code: code.into(),
        }
    }

    /// 内容摘要（sha256 hex），渲染缓存键
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.scene_name.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.code.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// 按出现顺序提取 `# <tag>: <id>` 标记
    pub fn markers(&self, tag: &str) -> Vec<String> {
        let prefix = format!("# {tag}:");
        self.code
            .lines()
            .filter_map(|line| line.trim().strip_prefix(prefix.as_str()))
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect()
    }
}
