//! ModelCall 活动：用会话快照调用模型，并把回复解析为最终回复或工具调用请求
//!
//! system prompt 拼入可用工具列表与 tool call JSON Schema；
//! 模型回复以 `{` 开头或包含 ```json 代码块时按工具调用解析，解析失败视为不可重试的格式错误。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::activities::ModelActivity;
use crate::core::{ActivityError, ModelResponse, TaskId};
use crate::llm::{ChatMessage, LlmClient, LlmError};
use crate::memory::{ConversationState, Role, ToolCallRequest};
use crate::tools::{tool_call_schema_json, ToolCallBatchFormat, ToolCallFormat};

/// 默认系统提示词
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are Bee, a helpful AI assistant. Answer directly when you can; call tools when you need them.";

/// 工具观察结果在模型上下文中的写法
pub fn observation_text(name: &str, call_id: &str, content: &str) -> String {
    format!("Observation from {name} ({call_id}): {content}")
}

/// 模型可能输出的两种工具调用写法
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawToolCalls {
    Batch(ToolCallBatchFormat),
    Single(ToolCallFormat),
}

/// 从模型回复中提取 JSON 片段；无 JSON 迹象时返回 None
///
/// 以 `{` 开头但没有闭合的回复原样返回，交给 serde 报格式错误。
fn extract_json(trimmed: &str) -> Option<&str> {
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    if trimmed.starts_with('{') {
        return Some(match trimmed.rfind('}') {
            Some(end) => &trimmed[..=end],
            None => trimmed,
        });
    }
    None
}

/// 解析模型回复；工具调用 ID 为 `call_<任务序号>_<下标>`，保证重放时不变
pub fn parse_model_output(task_id: TaskId, output: &str) -> Result<ModelResponse, ActivityError> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Err(ActivityError::Fatal("Model returned an empty response".to_string()));
    }

    let Some(json_str) = extract_json(trimmed) else {
        return Ok(ModelResponse::Final {
            content: trimmed.to_string(),
        });
    };

    let raw: RawToolCalls = serde_json::from_str(json_str).map_err(|e| {
        ActivityError::Fatal(format!("Malformed tool call JSON: {e}: {json_str}"))
    })?;
    let formats = match raw {
        RawToolCalls::Batch(batch) => batch.tool_calls,
        RawToolCalls::Single(single) => vec![single],
    };
    if formats.is_empty() || formats.iter().any(|f| f.tool.trim().is_empty()) {
        return Err(ActivityError::Fatal(format!(
            "Tool call batch is empty or unnamed: {json_str}"
        )));
    }

    let calls = formats
        .into_iter()
        .enumerate()
        .map(|(index, format)| ToolCallRequest {
            id: format!("call_{}_{}", task_id.0, index),
            name: format.tool.trim().to_string(),
            arguments: format.args,
        })
        .collect();
    Ok(ModelResponse::ToolCalls { calls })
}

/// 会话状态转为模型消息：工具请求写回为 JSON，工具结果写为 Observation
pub fn to_chat_messages(system_prompt: &str, state: &ConversationState) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(state.len() + 1);
    messages.push(ChatMessage::system(system_prompt));
    for msg in state.messages() {
        match msg.role {
            Role::User => messages.push(ChatMessage::user(msg.content.clone())),
            Role::Agent if msg.tool_calls.is_empty() => {
                messages.push(ChatMessage::assistant(msg.content.clone()));
            }
            Role::Agent => {
                let batch = ToolCallBatchFormat {
                    tool_calls: msg
                        .tool_calls
                        .iter()
                        .map(|c| ToolCallFormat {
                            tool: c.name.clone(),
                            args: c.arguments.clone(),
                        })
                        .collect(),
                };
                let content = serde_json::to_string(&batch).unwrap_or_default();
                messages.push(ChatMessage::assistant(content));
            }
            Role::Tool => messages.push(ChatMessage::user(observation_text(
                msg.name.as_deref().unwrap_or("tool"),
                msg.tool_call_id.as_deref().unwrap_or("-"),
                &msg.content,
            ))),
        }
    }
    messages
}

fn to_activity_error(err: LlmError) -> ActivityError {
    if err.is_transient() {
        ActivityError::Transient(err.to_string())
    } else {
        ActivityError::Fatal(err.to_string())
    }
}

/// 基于 LlmClient 的模型调用活动；无状态，可在任意实例间共享
pub struct ModelCallActivity {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl ModelCallActivity {
    /// `tools` 为 (name, description) 列表，`tool_schemas` 为各工具参数 schema 的 JSON，都会写入 system prompt
    pub fn new(
        llm: Arc<dyn LlmClient>,
        base_prompt: &str,
        tools: &[(String, String)],
        tool_schemas: &str,
    ) -> Self {
        let tool_list = tools
            .iter()
            .map(|(name, desc)| format!("- {name}: {desc}"))
            .collect::<Vec<_>>()
            .join("\n");
        let system_prompt = format!(
            "{base_prompt}\n\nAvailable tools:\n{tool_list}\n\n\
             Tool parameters (JSON Schema per tool):\n{tool_schemas}\n\n\
             To call tools, reply with ONLY a JSON object matching this schema \
             (several calls run concurrently):\n{schema}\n\
             A single call may also be written as {{\"tool\": \"name\", \"args\": {{...}}}}.\n\
             Tool results come back as messages starting with \"Observation from\". \
             When you have the final answer, reply with plain text only.",
            schema = tool_call_schema_json(),
        );
        Self { llm, system_prompt }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }
}

#[async_trait]
impl ModelActivity for ModelCallActivity {
    async fn call_model(
        &self,
        task_id: TaskId,
        state: &ConversationState,
    ) -> Result<ModelResponse, ActivityError> {
        let messages = to_chat_messages(&self.system_prompt, state);
        let reply = self.llm.complete(&messages).await.map_err(to_activity_error)?;
        let response = parse_model_output(task_id, &reply)?;
        let (prompt_tokens, completion_tokens, _) = self.llm.token_usage();
        tracing::debug!(
            task = %task_id,
            prompt_tokens,
            completion_tokens,
            tool_calls = matches!(response, ModelResponse::ToolCalls { .. }),
            "model call finished"
        );
        Ok(response)
    }
}
