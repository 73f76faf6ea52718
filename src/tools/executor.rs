//! 工具执行器
//!
//! 所有 run 共享同一个执行器：Semaphore 限制并发工具调用数，每次调用施加超时，
//! 超时转为 ToolError::Timeout；每次调用输出结构化审计日志（JSON）。

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::tools::ToolError;

/// 工具执行器：并发上限 + 超时 + 审计
#[derive(Clone)]
pub struct ToolExecutor {
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(max_concurrent: usize, timeout_secs: u64) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 当前可用的并发额度
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// 在并发额度与超时内执行一次工具调用；输出 JSON 审计日志
    pub async fn execute<T, F>(
        &self,
        tool_name: &str,
        args: serde_json::Value,
        call: F,
    ) -> Result<T, ToolError>
    where
        F: Future<Output = Result<T, ToolError>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ToolError::Unavailable {
                tool: tool_name.to_string(),
                reason: "executor closed".to_string(),
            })?;

        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, call).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(ToolError::NotFound(_))) => (false, "not_found"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(inner) => inner,
            Err(_) => Err(ToolError::Timeout(tool_name.to_string())),
        }
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
