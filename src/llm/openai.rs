//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）。
//! `complete_json` 按 [`JsonMode`] 设置 `response_format`：支持 Structured Outputs 的端点
//! 直接收到 schema，只支持 JSON 模式的端点（如 DeepSeek）收到 `json_object`。

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ResponseFormat,
    ResponseFormatJsonSchema,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{JsonShape, LlmClient, LlmError, Message, Role};

/// 结构化输出方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonMode {
    /// `json_schema`，附带完整 schema
    #[default]
    Schema,
    /// `json_object`，schema 只出现在 prompt 中
    Object,
    /// 不设置 response_format
    Off,
}

impl JsonMode {
    /// 配置值：schema / object / off
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "schema" | "json_schema" => Some(Self::Schema),
            "object" | "json_object" => Some(Self::Object),
            "off" | "none" => Some(Self::Off),
            _ => None,
        }
    }

    fn response_format(self, shape: &JsonShape) -> Option<ResponseFormat> {
        match self {
            Self::Schema if shape.schema.is_object() => Some(ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    description: None,
                    name: shape.name.clone(),
                    schema: Some(shape.schema.clone()),
                    // schemars 生成的 schema 含可选字段，不满足 strict 子集
                    strict: Some(false),
                },
            }),
            Self::Schema | Self::Object => Some(ResponseFormat::JsonObject),
            Self::Off => None,
        }
    }
}

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: Option<f32>,
    json_mode: JsonMode,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = match base_url {
            Some(url) if !url.is_empty() => OpenAIConfig::new()
                .with_api_base(url)
                .with_api_key(api_key),
            _ => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            temperature: None,
            json_mode: JsonMode::default(),
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_json_mode(mut self, mode: JsonMode) -> Self {
        self.json_mode = mode;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn json_mode(&self) -> JsonMode {
        self.json_mode
    }

    fn to_openai_messages(
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        messages
            .iter()
            .map(|m| {
                let built = match m.role {
                    Role::System => ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::System),
                    Role::User => ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::User),
                    Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::Assistant),
                };
                built.map_err(|e| LlmError::Request(e.to_string()))
            })
            .collect()
    }

    /// 组装请求；`shape` 为 None 时不设置 response_format
    pub fn build_request(
        &self,
        messages: &[Message],
        shape: Option<&JsonShape>,
    ) -> Result<CreateChatCompletionRequest, LlmError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.clone());
        args.messages(Self::to_openai_messages(messages)?);
        if let Some(t) = self.temperature {
            args.temperature(t);
        }
        if let Some(format) = shape.and_then(|s| self.json_mode.response_format(s)) {
            args.response_format(format);
        }
        args.build().map_err(|e| LlmError::Request(e.to_string()))
    }

    async fn send(&self, request: CreateChatCompletionRequest) -> Result<String, LlmError> {
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        if let Some(usage) = &response.usage {
            tracing::debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "chat completion"
            );
        }

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let request = self.build_request(messages, None)?;
        self.send(request).await
    }

    async fn complete_json(
        &self,
        messages: &[Message],
        shape: &JsonShape,
    ) -> Result<String, LlmError> {
        let request = self.build_request(messages, Some(shape))?;
        self.send(request).await
    }
}
