//! 活动任务：ModelCall / ToolCall 请求记录与结果，以及工具活动的并发限制
//!
//! TaskId 由编排器按调度顺序分配（每次执行从 0 开始），不依赖任何运行时值，
//! 重放时据此把已完成的结果对应回正确的调度点。

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::recovery::RetryPolicy;
use crate::memory::{ConversationState, ToolCallRequest};

/// 任务类型
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum TaskKind {
    ModelCall,
    ToolCall,
}

/// 任务 ID：在调度序列中的位置
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 活动输入
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityInput {
    /// 当前会话状态快照
    Model { state: ConversationState },
    Tool { call: ToolCallRequest },
}

/// 编排器产生的活动请求
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityTask {
    pub id: TaskId,
    pub kind: TaskKind,
    pub input: ActivityInput,
    pub retry: RetryPolicy,
}

impl ActivityTask {
    pub fn model_call(id: TaskId, state: ConversationState, retry: RetryPolicy) -> Self {
        Self {
            id,
            kind: TaskKind::ModelCall,
            input: ActivityInput::Model { state },
            retry,
        }
    }

    pub fn tool_call(id: TaskId, call: ToolCallRequest, retry: RetryPolicy) -> Self {
        Self {
            id,
            kind: TaskKind::ToolCall,
            input: ActivityInput::Tool { call },
            retry,
        }
    }

    /// 用于日志与确定性校验的简短标识，如 `model_call` / `tool_call:calculator`
    pub fn label(&self) -> String {
        match &self.input {
            ActivityInput::Model { .. } => "model_call".to_string(),
            ActivityInput::Tool { call } => format!("tool_call:{}", call.name),
        }
    }
}

/// 模型输出：最终回复或工具调用请求
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelResponse {
    Final { content: String },
    ToolCalls { calls: Vec<ToolCallRequest> },
}

/// 工具执行结果；工具自身报告的业务错误也作为数据返回
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub call_id: String,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

/// 活动输出
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ActivityOutput {
    Model(ModelResponse),
    Tool(ToolOutcome),
}

/// 工具活动并发限制
#[derive(Clone, Debug)]
pub struct TaskScheduler {
    tool_semaphore: Arc<Semaphore>,
}

impl TaskScheduler {
    pub fn new(max_concurrent_tools: usize) -> Self {
        Self {
            tool_semaphore: Arc::new(Semaphore::new(max_concurrent_tools.max(1))),
        }
    }

    /// 获取工具执行许可；信号量不会被关闭，失败时返回 None
    pub async fn acquire_tool(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.tool_semaphore).acquire_owned().await.ok()
    }

    pub fn available_tool_permits(&self) -> usize {
        self.tool_semaphore.available_permits()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_label() {
        let call = ToolCallRequest {
            id: "call_0_0".to_string(),
            name: "calculator".to_string(),
            arguments: serde_json::json!({}),
        };
        let task = ActivityTask::tool_call(TaskId(1), call, RetryPolicy::default());
        assert_eq!(task.label(), "tool_call:calculator");
        assert_eq!(TaskId(7).to_string(), "#7");
    }

    #[tokio::test]
    async fn test_tool_permits_are_bounded() {
        let scheduler = TaskScheduler::new(2);
        let first = scheduler.acquire_tool().await;
        let second = scheduler.acquire_tool().await;
        assert!(first.is_some() && second.is_some());
        assert_eq!(scheduler.available_tool_permits(), 0);
        drop(first);
        assert_eq!(scheduler.available_tool_permits(), 1);
    }

    #[test]
    fn test_model_response_is_tagged() {
        let json = serde_json::to_value(ModelResponse::Final {
            content: "4".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "final");
    }
}
