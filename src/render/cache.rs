//! 渲染缓存：同一份 Scene Code（按 sha256 摘要）只渲染一次
//!
//! 只缓存成功结果；编译错误与超时不入缓存，重新生成的代码摘要不同也不会命中。
//! 同一摘要的并发请求共用一个 OnceCell，只有一个调用真正进入后端。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OnceCell};

use crate::render::{RenderBackend, RenderResult};
use crate::schema::SceneCode;

pub struct CachedRenderer<B> {
    inner: B,
    entries: Mutex<HashMap<String, Arc<OnceCell<RenderResult>>>>,
}

impl<B: RenderBackend> CachedRenderer<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// 已缓存的成功结果数
    pub async fn cached(&self) -> usize {
        self.entries
            .lock()
            .await
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    async fn slot(&self, key: &str) -> Arc<OnceCell<RenderResult>> {
        self.entries
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl<B: RenderBackend> RenderBackend for CachedRenderer<B> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn render(&self, scene: &SceneCode) -> RenderResult {
        let key = scene.digest();
        let slot = self.slot(&key).await;
        if let Some(hit) = slot.get() {
            tracing::info!(scene = %scene.scene_name, digest = %&key[..12], "render cache hit");
            return hit.clone();
        }
        // 失败结果以 Err 返回，不写入 cell，等待者随后自行重试
        let outcome = slot
            .get_or_try_init(|| async {
                let result = self.inner.render(scene).await;
                if result.is_success() {
                    Ok(result)
                } else {
                    Err(result)
                }
            })
            .await;
        match outcome {
            Ok(result) => result.clone(),
            Err(failure) => failure,
        }
    }
}
