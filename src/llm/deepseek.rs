//! DeepSeek 端点（OpenAI 兼容格式，Base URL: https://api.deepseek.com）
//!
//! DeepSeek 只支持 `json_object` 模式，结构化输出的 schema 由 prompt 携带。

use crate::llm::{JsonMode, OpenAiClient};

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// 创建 DeepSeek 客户端
///
/// 模型优先级：参数 > `DEEPSEEK_MODEL` 环境变量 > deepseek-chat
pub fn create_deepseek_client(model: Option<&str>, api_key: &str) -> OpenAiClient {
    let model = model
        .filter(|m| !m.is_empty())
        .map(String::from)
        .or_else(|| std::env::var("DEEPSEEK_MODEL").ok())
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string());

    OpenAiClient::new(Some(DEEPSEEK_BASE_URL), &model, Some(api_key)).with_json_mode(JsonMode::Object)
}
