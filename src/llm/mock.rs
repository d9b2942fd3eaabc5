//! Mock LLM 客户端（无需 API）
//!
//! MockLlmClient：最后一条是工具观察结果时直接作为最终回复，否则请求 echo 工具回显用户输入，
//! 便于本地跑通「模型 -> 工具 -> 模型」流程。
//! ScriptedLlmClient：按顺序返回预设回复并记录每次收到的消息，供测试使用。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{ChatMessage, ChatRole, LlmClient, LlmError};

/// 工具观察结果消息的前缀（与 ModelCallActivity 的转换一致）
const OBSERVATION_PREFIX: &str = "Observation from ";

#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let last = messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        if let Some(observation) = last.strip_prefix(OBSERVATION_PREFIX) {
            let result = observation
                .split_once(": ")
                .map(|(_, content)| content)
                .unwrap_or(observation);
            return Ok(format!("Mock agent: {result}"));
        }

        Ok(serde_json::json!({
            "tool": "echo",
            "args": { "text": last }
        })
        .to_string())
    }
}

/// 预设回复的 Mock：回复用尽后返回 InvalidResponse
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlmClient {
    pub fn new<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = Result<String, LlmError>>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// 全部为成功回复的便捷构造
    pub fn replying<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(replies.into_iter().map(|r| Ok(r.into())))
    }

    /// 已收到的调用次数
    pub fn calls(&self) -> usize {
        self.seen.lock().map(|seen| seen.len()).unwrap_or(0)
    }

    /// 每次调用收到的消息（含 system）
    pub fn seen(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages.to_vec());
        }
        self.replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front())
            .unwrap_or_else(|| Err(LlmError::InvalidResponse("script exhausted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_requests_echo_then_answers() {
        let mock = MockLlmClient;
        let first = mock.complete(&[ChatMessage::user("hello")]).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&first).unwrap();
        assert_eq!(parsed["tool"], "echo");
        assert_eq!(parsed["args"]["text"], "hello");

        let second = mock
            .complete(&[
                ChatMessage::user("hello"),
                ChatMessage::user("Observation from echo (call_0_0): hello"),
            ])
            .await
            .unwrap();
        assert_eq!(second, "Mock agent: hello");
    }

    #[tokio::test]
    async fn test_scripted_replies_in_order() {
        let scripted = ScriptedLlmClient::new(vec![
            Err(LlmError::Timeout),
            Ok("4".to_string()),
        ]);
        assert_eq!(scripted.complete(&[]).await, Err(LlmError::Timeout));
        assert_eq!(scripted.complete(&[]).await, Ok("4".to_string()));
        assert!(scripted.complete(&[]).await.is_err());
        assert_eq!(scripted.calls(), 3);
    }
}
