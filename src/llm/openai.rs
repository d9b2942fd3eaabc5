//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、OpenAI、Azure 代理等。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::error::{ApiError, OpenAIError};
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{ChatMessage, ChatRole, LlmClient, LlmError};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 Client 与 model 名，complete 时转换消息格式并取首条 content
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();

        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            usage: TokenUsage::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn to_openai_messages(
        &self,
        messages: &[ChatMessage],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let build_err = |e: async_openai::error::OpenAIError| LlmError::ApiError(e.to_string());
        messages
            .iter()
            .map(|m| match m.role {
                ChatRole::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(m.content.clone())
                    .build()
                    .map(ChatCompletionRequestMessage::System)
                    .map_err(build_err),
                ChatRole::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(m.content.clone())
                    .build()
                    .map(ChatCompletionRequestMessage::User)
                    .map_err(build_err),
                ChatRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(m.content.clone())
                    .build()
                    .map(ChatCompletionRequestMessage::Assistant)
                    .map_err(build_err),
            })
            .collect()
    }
}

/// 按 async_openai 的错误变体归类；文本匹配只作为兜底
fn classify_openai_error(err: OpenAIError) -> LlmError {
    match err {
        OpenAIError::Reqwest(e) => {
            if e.is_timeout() {
                return LlmError::Timeout;
            }
            if let Some(status) = e.status() {
                return match status.as_u16() {
                    429 => LlmError::RateLimited { retry_after_ms: 1000 },
                    401 | 403 => LlmError::Auth(e.to_string()),
                    code if code >= 500 => LlmError::ServerError(e.to_string()),
                    _ => LlmError::ApiError(e.to_string()),
                };
            }
            if e.is_connect() || e.is_request() || e.is_body() {
                return LlmError::Network(e.to_string());
            }
            LlmError::classify(&e.to_string())
        }
        OpenAIError::ApiError(api) => classify_api_error(api),
        OpenAIError::JSONDeserialize(e, _) => LlmError::InvalidResponse(e.to_string()),
        OpenAIError::StreamError(e) => LlmError::Network(e.to_string()),
        other => LlmError::ApiError(other.to_string()),
    }
}

/// 错误体中的 type / code 优先于 message
fn classify_api_error(api: ApiError) -> LlmError {
    let kinds = [api.r#type.as_deref(), api.code.as_deref()];
    let has = |names: &[&str]| kinds.iter().flatten().any(|k| names.contains(k));
    if has(&["rate_limit_exceeded", "rate_limit_error"]) {
        LlmError::RateLimited { retry_after_ms: 1000 }
    } else if has(&["invalid_api_key", "authentication_error", "permission_error"]) {
        LlmError::Auth(api.message)
    } else if has(&["server_error", "service_unavailable"]) {
        LlmError::ServerError(api.message)
    } else {
        LlmError::classify(&api.message)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(messages)?)
            .build()
            .map_err(|e| LlmError::ApiError(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(classify_openai_error)?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| LlmError::InvalidResponse("response has no message content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_conversion_keeps_order() {
        let client = OpenAiClient::new(Some("http://localhost:1"), "gpt-4o-mini", Some("sk-test"));
        let converted = client
            .to_openai_messages(&[
                ChatMessage::system("sys"),
                ChatMessage::user("2+2?"),
                ChatMessage::assistant("4"),
            ])
            .unwrap();
        assert_eq!(converted.len(), 3);
        assert!(matches!(converted[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(converted[2], ChatCompletionRequestMessage::Assistant(_)));
        assert_eq!(client.model(), "gpt-4o-mini");
    }

    fn api_error(message: &str, kind: Option<&str>, code: Option<&str>) -> OpenAIError {
        OpenAIError::ApiError(ApiError {
            message: message.to_string(),
            r#type: kind.map(str::to_string),
            param: None,
            code: code.map(str::to_string),
        })
    }

    #[test]
    fn test_server_error_body_is_transient() {
        let err = classify_openai_error(api_error(
            "The server had an error while processing your request. Sorry about that!",
            Some("server_error"),
            None,
        ));
        assert!(matches!(err, LlmError::ServerError(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_api_error_codes_are_classified() {
        let limited = classify_openai_error(api_error(
            "You exceeded your current request quota",
            Some("requests"),
            Some("rate_limit_exceeded"),
        ));
        assert!(matches!(limited, LlmError::RateLimited { .. }));

        let auth = classify_openai_error(api_error(
            "Incorrect key provided",
            Some("invalid_request_error"),
            Some("invalid_api_key"),
        ));
        assert!(matches!(auth, LlmError::Auth(_)));
        assert!(!auth.is_transient());

        let unknown = classify_openai_error(api_error(
            "The model `gpt-9` does not exist",
            Some("invalid_request_error"),
            Some("model_not_found"),
        ));
        assert!(!unknown.is_transient());
    }

    #[test]
    fn test_undecodable_response_is_invalid() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = classify_openai_error(OpenAIError::JSONDeserialize(json_err, "{".to_string()));
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }

    #[test]
    fn test_token_usage_accumulates() {
        let usage = TokenUsage::new();
        usage.add(10, 5);
        usage.add(1, 1);
        assert_eq!(usage.get(), (11, 6, 17));
    }
}
