//! 并发 run 提交队列
//!
//! 有界 mpsc 通道 + Semaphore 限制同时执行的 run 数。队列满时 `try_submit` 立即返回 `Busy`。
//! 每个 run 拿到一个子 CancellationToken：关闭队列会取消全部 run，单个 ticket 也可单独取消。

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::core::orchestrator::{Orchestrator, RunReport};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("run queue is full")]
    Busy,
    #[error("run queue is closed")]
    Closed,
}

struct Job {
    question: String,
    cancel: CancellationToken,
    reply: oneshot::Sender<RunReport>,
}

/// 已提交 run 的句柄
pub struct RunTicket {
    cancel: CancellationToken,
    report: oneshot::Receiver<RunReport>,
}

impl RunTicket {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 等待 run 结束；执行任务异常退出时返回 None
    pub async fn wait(self) -> Option<RunReport> {
        self.report.await.ok()
    }
}

pub struct RunQueue {
    tx: mpsc::Sender<Job>,
    shutdown: CancellationToken,
}

impl RunQueue {
    /// 启动调度任务；`capacity` 为等待中的 run 上限，`max_concurrent` 为同时执行的 run 数
    pub fn start(orchestrator: Arc<Orchestrator>, capacity: usize, max_concurrent: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let shutdown = CancellationToken::new();
        let running = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let stop = shutdown.clone();

        tokio::spawn(async move {
            loop {
                // 先拿执行许可再取任务，等待中的 run 始终留在通道里
                let permit = tokio::select! {
                    _ = stop.cancelled() => break,
                    permit = running.clone().acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => break,
                    },
                };
                let job = tokio::select! {
                    _ = stop.cancelled() => break,
                    job = rx.recv() => match job {
                        Some(job) => job,
                        None => break,
                    },
                };
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    let report = orchestrator.run(&job.question, job.cancel).await;
                    let _ = job.reply.send(report);
                    drop(permit);
                });
            }
            // 通道里尚未开始的 run 直接丢弃，ticket 的 wait 返回 None
            rx.close();
            tracing::info!("run queue stopped");
        });

        Self { tx, shutdown }
    }

    pub fn try_submit(&self, question: impl Into<String>) -> Result<RunTicket, SubmitError> {
        let cancel = self.shutdown.child_token();
        let (reply, report) = oneshot::channel();
        let job = Job {
            question: question.into(),
            cancel: cancel.clone(),
            reply,
        };
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubmitError::Busy,
            mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
        })?;
        Ok(RunTicket { cancel, report })
    }

    /// 停止调度并取消所有执行中的 run
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
