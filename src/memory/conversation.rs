//! 会话状态：单个编排实例内的对话记录
//!
//! 只追加不修改；重放时由历史中的活动结果重建，绝不通过再次调用模型推导。
//! 活动只拿到只读快照（克隆值），返回一条新结果，由编排器写回。

use serde::{Deserialize, Serialize};

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    Tool,
}

/// 模型请求的一次工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// 确定性 ID：`call_<模型调用任务 ID>_<序号>`
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Agent 消息：本轮请求的工具调用
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Tool 消息：对应的调用 ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool 消息：工具名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    /// 模型请求工具时记录的 Agent 消息（content 为空）
    pub fn agent_tool_request(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Agent,
            content: String::new(),
            tool_calls: calls,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn tool(call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
            name: Some(name.into()),
        }
    }
}

/// 对话状态：消息序列 + 待完成的工具调用批次 + 轮次计数
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pending_tool_calls: Option<Vec<ToolCallRequest>>,
    /// 已调度的模型调用次数
    #[serde(default)]
    turn: u32,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn turn(&self) -> u32 {
        self.turn
    }

    /// 调度一次模型调用前递增
    pub fn begin_turn(&mut self) {
        self.turn += 1;
    }

    pub fn pending_tool_calls(&self) -> Option<&[ToolCallRequest]> {
        self.pending_tool_calls.as_deref()
    }

    /// 记录模型的工具请求：追加 Agent 消息并挂起该批次
    pub fn request_tools(&mut self, calls: Vec<ToolCallRequest>) {
        self.pending_tool_calls = Some(calls.clone());
        self.messages.push(Message::agent_tool_request(calls));
    }

    /// 工具批次全部返回后清除挂起标记
    pub fn resolve_tools(&mut self) {
        self.pending_tool_calls = None;
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
