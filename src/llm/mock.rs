//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按脚本顺序返回预置回复，并记录每次调用收到的消息，便于断言 prompt 中的修正反馈。

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::llm::{JsonShape, LlmClient, LlmError, Message};

/// Mock 客户端：脚本耗尽后返回 ScriptExhausted
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<Vec<Vec<Message>>>,
    /// 每次 complete_json 请求的 shape 名称
    shapes: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以一组成功回复构造
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            ..Self::default()
        }
    }

    /// 每次回复前等待，用于超时测试
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn push_reply(&self, reply: impl Into<String>) {
        self.script.lock().await.push_back(Ok(reply.into()));
    }

    pub async fn push_error(&self, error: LlmError) {
        self.script.lock().await.push_back(Err(error));
    }

    /// 已收到的调用（每次调用的完整消息列表）
    pub async fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    pub async fn requested_shapes(&self) -> Vec<String> {
        self.shapes.lock().await.clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.lock().await.push(messages.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .lock()
            .await
            .pop_front()
            .unwrap_or(Err(LlmError::ScriptExhausted))
    }

    async fn complete_json(
        &self,
        messages: &[Message],
        shape: &JsonShape,
    ) -> Result<String, LlmError> {
        self.shapes.lock().await.push(shape.name.clone());
        self.complete(messages).await
    }
}
