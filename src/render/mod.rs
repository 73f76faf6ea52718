//! Render Backend：把 Scene Code 渲染为视频
//!
//! - `RenderBackend`：渲染端抽象，同一份 Scene Code 的结果必须一致（幂等）
//! - `ManimRenderer`：调用 manim 子进程
//! - `CachedRenderer`：按场景代码摘要缓存成功结果
//! - `RenderPool`：渲染槽位准入控制（有界等待队列 + 背压）
//! - `subtitles`：按 Sync Manifest 生成 SRT 字幕

pub mod admission;
pub mod cache;
pub mod manim;
pub mod subtitles;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::schema::SceneCode;

pub use admission::{AdmissionError, RenderPool, RenderSlot};
pub use cache::CachedRenderer;
pub use manim::ManimRenderer;
pub use subtitles::{srt_timestamp, write_srt};

/// 一次渲染的结果
#[derive(Debug, Clone, PartialEq)]
pub enum RenderResult {
    Success {
        artifact_path: PathBuf,
        duration_rendered: f64,
    },
    /// 场景代码无法编译 / 执行，附渲染端诊断
    CompileError(String),
    /// 超时或只产出了部分结果
    Timeout,
    ResourceExhausted,
}

impl RenderResult {
    pub fn is_success(&self) -> bool {
        matches!(self, RenderResult::Success { .. })
    }
}

/// 渲染端
#[async_trait]
pub trait RenderBackend: Send + Sync {
    fn name(&self) -> &str {
        "render"
    }

    async fn render(&self, scene: &SceneCode) -> RenderResult;
}
