//! Manim 渲染端：写出场景文件，调用 `manim -q<quality>` 子进程，定位成品并用 ffprobe 取时长
//!
//! 场景目录以代码摘要命名，同一份代码总是落在同一位置。

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use walkdir::WalkDir;

use crate::config::RenderSection;
use crate::render::{RenderBackend, RenderResult};
use crate::schema::SceneCode;

const DIAGNOSTIC_TAIL: usize = 4000;

pub struct ManimRenderer {
    command: String,
    quality: String,
    timeout: Duration,
    work_dir: PathBuf,
    duration_command: String,
}

impl ManimRenderer {
    pub fn new(command: impl Into<String>, quality: impl Into<String>, timeout_secs: u64, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            quality: quality.into(),
            timeout: Duration::from_secs(timeout_secs.max(1)),
            work_dir: work_dir.into(),
            duration_command: "ffprobe".to_string(),
        }
    }

    pub fn from_config(cfg: &RenderSection) -> Self {
        Self::new(&cfg.command, &cfg.quality, cfg.timeout_secs, &cfg.work_dir)
    }

    pub fn with_duration_command(mut self, duration_command: impl Into<String>) -> Self {
        self.duration_command = duration_command.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn scene_dir(&self, scene: &SceneCode) -> PathBuf {
        let digest = scene.digest();
        self.work_dir.join(&digest[..16])
    }

    async fn measure_duration(&self, video: &Path) -> Option<f64> {
        let output = Command::new(&self.duration_command)
            .args(["-v", "error", "-show_entries", "format=duration", "-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(video)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8_lossy(&output.stdout).trim().parse::<f64>().ok()
    }
}

/// 在 media 目录下找 `<scene>.mp4` 成品（排除 partial_movie_files）
fn find_video(media_dir: &Path, scene_name: &str) -> Option<PathBuf> {
    let file_name = format!("{scene_name}.mp4");
    WalkDir::new(media_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_string_lossy() == file_name)
        .filter(|e| {
            !e.path()
                .components()
                .any(|c| c.as_os_str() == "partial_movie_files")
        })
        .map(|e| e.into_path())
        .next()
}

fn is_resource_exhaustion(stderr: &str, status: &std::process::ExitStatus) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if status.signal() == Some(9) {
            return true;
        }
    }
    #[cfg(not(unix))]
    let _ = status;
    stderr.contains("MemoryError") || stderr.contains("No space left on device") || stderr.contains("Killed")
}

fn tail(text: &str) -> String {
    let count = text.chars().count();
    if count <= DIAGNOSTIC_TAIL {
        return text.trim().to_string();
    }
    text.chars().skip(count - DIAGNOSTIC_TAIL).collect::<String>().trim().to_string()
}

#[async_trait]
impl RenderBackend for ManimRenderer {
    fn name(&self) -> &str {
        "manim"
    }

    async fn render(&self, scene: &SceneCode) -> RenderResult {
        let dir = self.scene_dir(scene);
        let media_dir = dir.join("media");
        let scene_file = dir.join("scene.py");
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            tracing::error!(dir = %dir.display(), error = %e, "cannot create render dir");
            return RenderResult::ResourceExhausted;
        }
        if let Err(e) = tokio::fs::write(&scene_file, &scene.code).await {
            tracing::error!(file = %scene_file.display(), error = %e, "cannot write scene file");
            return RenderResult::ResourceExhausted;
        }

        let start = Instant::now();
        let child = Command::new(&self.command)
            .arg(format!("-q{}", self.quality))
            .arg("--media_dir")
            .arg(&media_dir)
            .arg(&scene_file)
            .arg(&scene.scene_name)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(command = %self.command, error = %e, "cannot launch renderer");
                return RenderResult::ResourceExhausted;
            }
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "renderer process failed");
                return RenderResult::ResourceExhausted;
            }
            Err(_) => {
                tracing::warn!(scene = %scene.scene_name, timeout_secs = self.timeout.as_secs(), "render timed out");
                return RenderResult::Timeout;
            }
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            if is_resource_exhaustion(&stderr, &output.status) {
                tracing::warn!(scene = %scene.scene_name, elapsed_ms, "render ran out of resources");
                return RenderResult::ResourceExhausted;
            }
            let stdout = String::from_utf8_lossy(&output.stdout);
            let diagnostics = if stderr.trim().is_empty() { stdout.to_string() } else { stderr.to_string() };
            tracing::warn!(scene = %scene.scene_name, elapsed_ms, "scene failed to compile");
            return RenderResult::CompileError(tail(&diagnostics));
        }

        let Some(video) = find_video(&media_dir, &scene.scene_name) else {
            tracing::warn!(scene = %scene.scene_name, "renderer exited without a final video");
            return RenderResult::Timeout;
        };
        let duration = match self.measure_duration(&video).await {
            Some(d) => d,
            None => {
                tracing::warn!(video = %video.display(), "ffprobe unavailable, duration unknown");
                0.0
            }
        };
        tracing::info!(scene = %scene.scene_name, video = %video.display(), duration, elapsed_ms, "render finished");
        RenderResult::Success {
            artifact_path: video,
            duration_rendered: duration,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    fn scene() -> SceneCode {
        SceneCode::new("Explainer", "class Explainer: pass\n")
    }

    #[tokio::test]
    async fn test_success_finds_video() {
        let tmp = tempfile::tempdir().unwrap();
        // $3 = media dir, $5 = scene name
        let manim = script(
            tmp.path(),
            "fake-manim",
            "mkdir -p \"$3/videos/scene/720p30/partial_movie_files/$5\" && \
             touch \"$3/videos/scene/720p30/partial_movie_files/$5/$5.mp4\" && \
             touch \"$3/videos/scene/720p30/$5.mp4\"",
        );
        let ffprobe = script(tmp.path(), "fake-ffprobe", "echo 12.5");
        let renderer = ManimRenderer::new(manim, "m", 10, tmp.path().join("work")).with_duration_command(ffprobe);
        match renderer.render(&scene()).await {
            RenderResult::Success {
                artifact_path,
                duration_rendered,
            } => {
                assert!(artifact_path.ends_with("videos/scene/720p30/Explainer.mp4"));
                assert_eq!(duration_rendered, 12.5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_compile_error_carries_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let manim = script(
            tmp.path(),
            "fake-manim",
            "echo \"NameError: name 'Foo' is not defined\" >&2; exit 1",
        );
        let renderer = ManimRenderer::new(manim, "l", 10, tmp.path().join("work"));
        match renderer.render(&scene()).await {
            RenderResult::CompileError(diag) => assert!(diag.contains("NameError")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_memory_error_is_resource_exhaustion() {
        let tmp = tempfile::tempdir().unwrap();
        let manim = script(tmp.path(), "fake-manim", "echo MemoryError >&2; exit 1");
        let renderer = ManimRenderer::new(manim, "l", 10, tmp.path().join("work"));
        assert_eq!(renderer.render(&scene()).await, RenderResult::ResourceExhausted);
    }

    #[tokio::test]
    async fn test_timeout_and_missing_output() {
        let tmp = tempfile::tempdir().unwrap();
        let slow = script(tmp.path(), "slow-manim", "sleep 5");
        let renderer = ManimRenderer::new(slow, "l", 10, tmp.path().join("work"))
            .with_timeout(Duration::from_millis(200));
        assert_eq!(renderer.render(&scene()).await, RenderResult::Timeout);

        let silent = script(tmp.path(), "silent-manim", "exit 0");
        let renderer = ManimRenderer::new(silent, "l", 10, tmp.path().join("work"));
        assert_eq!(renderer.render(&scene()).await, RenderResult::Timeout);
    }
}
