//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient::complete（非流式）。
//! 错误统一为 LlmError，并区分可重试（网络、超时、限流、服务端错误）与不可重试（鉴权、请求或响应不合法）。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 发给模型的消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// 发给模型的单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// LLM 调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Rate limited (retry after {retry_after_ms}ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("API error: {0}")]
    ApiError(String),
}

impl LlmError {
    /// 是否值得按重试策略再次尝试
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout | Self::RateLimited { .. } | Self::ServerError(_)
        )
    }

    /// 按错误文本归类（适配各家 OpenAI 兼容端点的错误描述）
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("rate limit") || lower.contains("429") || lower.contains("too many requests") {
            Self::RateLimited { retry_after_ms: 1000 }
        } else if lower.contains("api key")
            || lower.contains("unauthorized")
            || lower.contains("authentication")
            || lower.contains("401")
            || lower.contains("403")
        {
            Self::Auth(message.to_string())
        } else if lower.contains("timed out") || lower.contains("timeout") {
            Self::Timeout
        } else if lower.contains("error sending request")
            || lower.contains("connection")
            || lower.contains("dns")
        {
            Self::Network(message.to_string())
        } else if lower.contains("server error")
            || lower.contains("server had an error")
            || lower.contains("overloaded")
            || lower.contains("502")
            || lower.contains("503")
            || lower.contains("504")
        {
            Self::ServerError(message.to_string())
        } else if lower.contains("deserialize") || lower.contains("json") {
            Self::InvalidResponse(message.to_string())
        } else {
            Self::ApiError(message.to_string())
        }
    }
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_transient_errors() {
        assert!(LlmError::classify("Rate limit reached for requests").is_transient());
        assert!(LlmError::classify("error sending request for url").is_transient());
        assert!(LlmError::classify("operation timed out").is_transient());
        assert!(LlmError::classify("The server is overloaded").is_transient());
        assert!(LlmError::classify("The server had an error while processing your request")
            .is_transient());
    }

    #[test]
    fn test_classify_fatal_errors() {
        let auth = LlmError::classify("Incorrect API key provided: sk-***");
        assert!(matches!(auth, LlmError::Auth(_)));
        assert!(!auth.is_transient());
        assert!(matches!(
            LlmError::classify("failed to deserialize api response"),
            LlmError::InvalidResponse(_)
        ));
        assert!(!LlmError::classify("model not found").is_transient());
    }
}
