//! Run 持久化：每个 run 一个目录 `<root>/<run_id>/`
//!
//! - run.json：完整 PipelineRun 快照（恢复用）
//! - explanation.json / scene.py / manifest.json：最新产物
//! - history.json：诊断历史
//! - subtitles.srt：成功后写出
//!
//! 写入先落临时文件再 rename，进程中断不会留下半个 JSON。

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::core::state::{PipelineRun, RunId};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("run '{0}' not found")]
    NotFound(String),
}

#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.root.join(run_id.as_str())
    }

    /// 写出 run 快照与各阶段最新产物
    pub async fn save(&self, run: &PipelineRun) -> Result<(), StoreError> {
        let dir = self.run_dir(&run.run_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;

        write_json(&dir.join("run.json"), run).await?;
        write_json(&dir.join("history.json"), &run.history).await?;
        if let Some(document) = &run.artifacts.document {
            write_json(&dir.join("explanation.json"), document).await?;
        }
        if let Some(scene) = &run.artifacts.scene {
            write_atomic(&dir.join("scene.py"), scene.code.as_bytes()).await?;
        }
        if let Some(manifest) = &run.artifacts.manifest {
            write_json(&dir.join("manifest.json"), manifest).await?;
        }
        Ok(())
    }

    pub async fn write_subtitles(&self, run_id: &RunId, srt: &str) -> Result<PathBuf, StoreError> {
        let dir = self.run_dir(run_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
        let path = dir.join("subtitles.srt");
        write_atomic(&path, srt.as_bytes()).await?;
        Ok(path)
    }

    /// 读取已持久化的 run
    pub async fn load(&self, run_id: &str) -> Result<PipelineRun, StoreError> {
        let path = self.root.join(run_id).join("run.json");
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(run_id.to_string()))
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(serde_json::from_str(&raw)?)
    }

    /// 已持久化的 run id（按名称排序）
    pub async fn list(&self) -> Result<Vec<RunId>, StoreError> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.root.clone(),
                    source,
                })
            }
        };
        while let Some(entry) = entries.next_entry().await.map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })? {
            if entry.path().join("run.json").is_file() {
                ids.push(RunId::from(entry.file_name().to_string_lossy().into_owned()));
            }
        }
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes).await
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
}
