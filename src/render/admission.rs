//! 渲染准入控制
//!
//! 固定数量的渲染槽位加一个有界等待队列。槽位空闲时立即放行；
//! 否则进入等待队列，队列已满时返回 `QueueFull`，由调用方退避后重试。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("render queue is full")]
    QueueFull,
    #[error("cancelled while waiting for a render slot")]
    Cancelled,
    #[error("render pool closed")]
    Closed,
}

/// 持有期间占用一个渲染槽位，drop 即释放
#[derive(Debug)]
pub struct RenderSlot {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug)]
pub struct RenderPool {
    slots: Arc<Semaphore>,
    waiting: AtomicUsize,
    queue_capacity: usize,
}

/// 离开等待队列时递减计数
struct WaitTicket<'a>(&'a AtomicUsize);

impl Drop for WaitTicket<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RenderPool {
    pub fn new(max_concurrent: usize, queue_capacity: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent.max(1))),
            waiting: AtomicUsize::new(0),
            queue_capacity,
        }
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// 申请渲染槽位
    pub async fn reserve(&self, cancel: &CancellationToken) -> Result<RenderSlot, AdmissionError> {
        if let Ok(permit) = self.slots.clone().try_acquire_owned() {
            return Ok(RenderSlot { _permit: permit });
        }

        let queued = self.waiting.fetch_add(1, Ordering::SeqCst);
        let _ticket = WaitTicket(&self.waiting);
        if queued >= self.queue_capacity {
            tracing::debug!(waiting = queued, capacity = self.queue_capacity, "render queue full");
            return Err(AdmissionError::QueueFull);
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(AdmissionError::Cancelled),
            permit = self.slots.clone().acquire_owned() => permit
                .map(|permit| RenderSlot { _permit: permit })
                .map_err(|_| AdmissionError::Closed),
        }
    }
}
