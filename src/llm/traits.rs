//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient::complete（非流式）。
//! Agent 只依赖本 trait，超时与取消由调用方（Orchestrator）施加。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 对话角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// 单条对话消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// LLM 调用错误
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM returned an empty response")]
    EmptyResponse,

    #[error("mock script exhausted")]
    ScriptExhausted,
}

/// 期望的输出结构：名称 + JSON Schema
#[derive(Debug, Clone, PartialEq)]
pub struct JsonShape {
    /// 仅 a-z A-Z 0-9 _ -，不超过 64 字符
    pub name: String,
    pub schema: serde_json::Value,
}

impl JsonShape {
    pub fn new(name: impl Into<String>, schema: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 要求按 `shape` 返回 JSON；不支持结构化输出的后端退化为普通完成
    async fn complete_json(
        &self,
        messages: &[Message],
        shape: &JsonShape,
    ) -> Result<String, LlmError> {
        let _ = shape;
        self.complete(messages).await
    }
}
