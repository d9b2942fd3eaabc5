//! 编排器：确定性的会话状态机
//!
//! `replay(input, history, options)` 是纯函数：每次都从头执行同一段控制逻辑，
//! 历史中已有结果的调度点立即取回结果，遇到第一个未完成的调度点即挂起。
//! 本模块不接触时钟、随机数、LLM 或工具客户端，所有非确定性操作都以 ActivityTask 形式交给宿主。
//!
//! 流程：追加用户消息 -> 调度 ModelCall -> 最终回复则完成；
//! 请求工具则并发调度所有 ToolCall（fan-out），全部返回后（fan-in）按调度顺序追加结果，再回到 ModelCall。
//! 启用审批时，最终回复先等待外部审批事件，与持久定时器竞争：通过则完成，带意见则回到 ModelCall，超时则失败。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{ActivityFailure, OrchestrationError, OrchestrationFailure};
use crate::core::history::{EventRace, HistoryEvent, HistoryIndex, RecordedResult};
use crate::core::recovery::RetryPolicy;
use crate::core::task_scheduler::{
    ActivityOutput, ActivityTask, ModelResponse, TaskId, TaskKind, ToolOutcome,
};
use crate::memory::{ConversationState, Message, ToolCallRequest};

/// 实例输入：用户提示词、调用方元数据；continue-as-new 时携带上一段执行的会话状态
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationInput {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carried_state: Option<ConversationState>,
}

impl OrchestrationInput {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            metadata: None,
            carried_state: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// 同一批工具调用中出现失败时的处理方式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOutPolicy {
    /// 等待整批返回，再按调度顺序报告第一个失败
    #[default]
    WaitForAll,
    /// 任一调用失败即终止，其余结果丢弃
    FailFast,
}

/// 最终回复的审批：等待名为 `event_name` 的外部事件，最长 `timeout`
#[derive(Clone, Debug, PartialEq)]
pub struct ApprovalOptions {
    pub event_name: String,
    pub timeout: Duration,
}

/// 审批事件负载的解读
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    /// 拒绝并给出修改意见，回到模型重新作答
    Feedback(String),
    Rejected,
}

impl ApprovalDecision {
    /// `true`、`"approve"`、`{"approved": true}` 为通过；
    /// `{"feedback": ".."}` 或其他非空文本为修改意见；其余视为拒绝
    pub fn from_payload(payload: &Value) -> Self {
        match payload {
            Value::Bool(true) => Self::Approved,
            Value::String(text) => {
                let text = text.trim();
                match text.to_lowercase().as_str() {
                    "" => Self::Rejected,
                    "approve" | "approved" | "yes" | "ok" => Self::Approved,
                    _ => Self::Feedback(text.to_string()),
                }
            }
            Value::Object(map) => {
                if map.get("approved").and_then(Value::as_bool) == Some(true) {
                    return Self::Approved;
                }
                match map.get("feedback").and_then(Value::as_str).map(str::trim) {
                    Some(feedback) if !feedback.is_empty() => Self::Feedback(feedback.to_string()),
                    _ => Self::Rejected,
                }
            }
            _ => Self::Rejected,
        }
    }
}

/// 请宿主创建的持久定时器
#[derive(Clone, Debug, PartialEq)]
pub struct TimerRequest {
    pub id: TaskId,
    pub delay: Duration,
}

/// 编排器参数
#[derive(Clone, Debug, PartialEq)]
pub struct OrchestratorOptions {
    /// 模型调用总轮数上限（跨 continue-as-new 累计）
    pub max_turns: u32,
    pub fan_out_policy: FanOutPolicy,
    /// 单次执行内模型轮数达到该值后 continue-as-new；0 表示不启用
    pub continue_as_new_after_turns: u32,
    pub model_retry: RetryPolicy,
    pub tool_retry: RetryPolicy,
    /// None 表示最终回复直接完成实例
    pub approval: Option<ApprovalOptions>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_turns: 10,
            fan_out_policy: FanOutPolicy::WaitForAll,
            continue_as_new_after_turns: 0,
            model_retry: RetryPolicy::default(),
            tool_retry: RetryPolicy::default(),
            approval: None,
        }
    }
}

/// 编排器状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestratorState {
    AwaitingModelResponse,
    AwaitingToolResult,
    AwaitingExternalEvent,
    Completed,
    Failed,
}

/// 一次重放的结论
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    /// 调度 `new_tasks` 与 `new_timers`（历史中尚未记录的），等待 `awaiting` 中的任务或定时器
    Suspend {
        state: OrchestratorState,
        new_tasks: Vec<ActivityTask>,
        new_timers: Vec<TimerRequest>,
        awaiting: Vec<TaskId>,
        custom_status: String,
    },
    Complete {
        output: String,
        conversation: ConversationState,
    },
    Fail {
        failure: OrchestrationFailure,
    },
    /// 以截断的历史重新开始，输入携带当前会话状态
    ContinueAsNew {
        input: OrchestrationInput,
    },
}

impl Decision {
    pub fn state(&self) -> Option<OrchestratorState> {
        match self {
            Self::Suspend { state, .. } => Some(*state),
            Self::Complete { .. } => Some(OrchestratorState::Completed),
            Self::Fail { .. } => Some(OrchestratorState::Failed),
            Self::ContinueAsNew { .. } => None,
        }
    }
}

/// 按调度位置分配 TaskId，并与历史中已记录的调度比对
struct ScheduleCursor<'h> {
    index: HistoryIndex<'h>,
    next_id: u64,
    new_tasks: Vec<ActivityTask>,
    new_timers: Vec<TimerRequest>,
}

impl<'h> ScheduleCursor<'h> {
    fn new(history: &'h [HistoryEvent]) -> Self {
        Self {
            index: HistoryIndex::build(history),
            next_id: 0,
            new_tasks: Vec::new(),
            new_timers: Vec::new(),
        }
    }

    fn next_id(&mut self) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        id
    }

    fn schedule(&mut self, task: ActivityTask) -> Result<TaskId, OrchestrationError> {
        let id = task.id;
        if self.index.timer(id).is_some() {
            return Err(OrchestrationError::Nondeterminism {
                id,
                recorded: "timer".to_string(),
                replayed: task.label(),
            });
        }
        match self.index.scheduled(id) {
            Some(recorded) if recorded.kind != task.kind || recorded.label() != task.label() => {
                Err(OrchestrationError::Nondeterminism {
                    id,
                    recorded: recorded.label(),
                    replayed: task.label(),
                })
            }
            Some(_) => Ok(id),
            None => {
                self.new_tasks.push(task);
                Ok(id)
            }
        }
    }

    fn schedule_timer(&mut self, timer: TimerRequest) -> Result<TaskId, OrchestrationError> {
        let id = timer.id;
        if let Some(recorded) = self.index.scheduled(id) {
            return Err(OrchestrationError::Nondeterminism {
                id,
                recorded: recorded.label(),
                replayed: "timer".to_string(),
            });
        }
        if self.index.timer(id).is_none() {
            self.new_timers.push(timer);
        }
        Ok(id)
    }

    fn result(&self, id: TaskId) -> Option<RecordedResult<'h>> {
        self.index.result(id)
    }

    fn race(&self, event_name: &str, round: usize, timer: TaskId) -> EventRace<'h> {
        self.index.race(event_name, round, timer)
    }

    fn suspend(
        self,
        state: OrchestratorState,
        awaiting: Vec<TaskId>,
        custom_status: String,
    ) -> Decision {
        Decision::Suspend {
            state,
            new_tasks: self.new_tasks,
            new_timers: self.new_timers,
            awaiting,
            custom_status,
        }
    }
}

fn activity_failed(id: TaskId, kind: TaskKind, failure: &ActivityFailure) -> Decision {
    Decision::Fail {
        failure: OrchestrationFailure::ActivityFailed {
            task_id: id,
            kind,
            reason: failure.reason,
            message: failure.message.clone(),
            attempts: failure.attempts,
        },
    }
}

fn tool_message(outcome: &ToolOutcome) -> Message {
    let content = if outcome.is_error {
        format!("Error: {}", outcome.content)
    } else {
        outcome.content.clone()
    };
    Message::tool(outcome.call_id.clone(), outcome.name.clone(), content)
}

fn tools_status(calls: &[ToolCallRequest], turn: u32) -> String {
    let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
    format!(
        "Running {} tool call(s): {} (turn {})",
        calls.len(),
        names.join(", "),
        turn
    )
}

/// 根据输入与历史决定下一步；相同输入与历史总是得到相同结论
pub fn replay(
    input: &OrchestrationInput,
    history: &[HistoryEvent],
    options: &OrchestratorOptions,
) -> Result<Decision, OrchestrationError> {
    if let Some(reason) = history.iter().find_map(|event| match event {
        HistoryEvent::TerminateRequested { reason } => Some(reason.clone()),
        _ => None,
    }) {
        return Ok(Decision::Fail {
            failure: OrchestrationFailure::Terminated { reason },
        });
    }

    let mut cursor = ScheduleCursor::new(history);
    let mut state = match &input.carried_state {
        Some(carried) => carried.clone(),
        None => {
            let mut fresh = ConversationState::new();
            fresh.push(Message::user(input.prompt.clone()));
            fresh
        }
    };
    let mut turns_this_execution = 0u32;
    let mut approval_rounds = 0usize;

    loop {
        if state.turn() >= options.max_turns {
            return Ok(Decision::Fail {
                failure: OrchestrationFailure::TurnLimitExceeded {
                    max_turns: options.max_turns,
                },
            });
        }
        if options.continue_as_new_after_turns > 0
            && turns_this_execution >= options.continue_as_new_after_turns
        {
            return Ok(Decision::ContinueAsNew {
                input: OrchestrationInput {
                    prompt: input.prompt.clone(),
                    metadata: input.metadata.clone(),
                    carried_state: Some(state),
                },
            });
        }

        state.begin_turn();
        turns_this_execution += 1;
        let model_id = cursor.next_id();
        cursor.schedule(ActivityTask::model_call(
            model_id,
            state.clone(),
            options.model_retry.clone(),
        ))?;

        let calls = match cursor.result(model_id) {
            None => {
                let status = format!("Awaiting model response (turn {})", state.turn());
                return Ok(cursor.suspend(
                    OrchestratorState::AwaitingModelResponse,
                    vec![model_id],
                    status,
                ));
            }
            Some(RecordedResult::Failed(failure)) => {
                return Ok(activity_failed(model_id, TaskKind::ModelCall, failure));
            }
            Some(RecordedResult::Completed(ActivityOutput::Model(ModelResponse::Final {
                content,
            }))) => {
                state.push(Message::agent(content.clone()));
                let Some(approval) = &options.approval else {
                    return Ok(Decision::Complete {
                        output: content.clone(),
                        conversation: state,
                    });
                };

                let timer_id = cursor.next_id();
                cursor.schedule_timer(TimerRequest {
                    id: timer_id,
                    delay: approval.timeout,
                })?;
                let round = approval_rounds;
                approval_rounds += 1;
                match cursor.race(&approval.event_name, round, timer_id) {
                    EventRace::Pending => {
                        let status = format!(
                            "Awaiting '{}' event for the answer (turn {})",
                            approval.event_name,
                            state.turn()
                        );
                        return Ok(cursor.suspend(
                            OrchestratorState::AwaitingExternalEvent,
                            vec![timer_id],
                            status,
                        ));
                    }
                    EventRace::TimedOut => {
                        return Ok(Decision::Fail {
                            failure: OrchestrationFailure::ApprovalTimedOut {
                                event: approval.event_name.clone(),
                                timeout_ms: approval.timeout.as_millis() as u64,
                            },
                        });
                    }
                    EventRace::Received(payload) => match ApprovalDecision::from_payload(payload) {
                        ApprovalDecision::Approved => {
                            return Ok(Decision::Complete {
                                output: content.clone(),
                                conversation: state,
                            });
                        }
                        ApprovalDecision::Rejected => {
                            return Ok(Decision::Fail {
                                failure: OrchestrationFailure::ApprovalRejected {
                                    event: approval.event_name.clone(),
                                },
                            });
                        }
                        ApprovalDecision::Feedback(feedback) => {
                            state.push(Message::user(format!("User feedback: {feedback}")));
                            continue;
                        }
                    },
                }
            }
            Some(RecordedResult::Completed(ActivityOutput::Model(ModelResponse::ToolCalls {
                calls,
            }))) => calls.clone(),
            Some(RecordedResult::Completed(ActivityOutput::Tool(_))) => {
                return Err(OrchestrationError::UnexpectedResult {
                    id: model_id,
                    expected: TaskKind::ModelCall,
                });
            }
        };

        state.request_tools(calls.clone());
        let mut tool_ids = Vec::with_capacity(calls.len());
        for call in &calls {
            let id = cursor.next_id();
            cursor.schedule(ActivityTask::tool_call(
                id,
                call.clone(),
                options.tool_retry.clone(),
            ))?;
            tool_ids.push(id);
        }

        // 按调度顺序（而非完成顺序）收集结果
        let mut outcomes = Vec::with_capacity(tool_ids.len());
        let mut waiting = Vec::new();
        let mut first_failure = None;
        for &id in &tool_ids {
            match cursor.result(id) {
                None => waiting.push(id),
                Some(RecordedResult::Completed(ActivityOutput::Tool(outcome))) => {
                    outcomes.push(outcome);
                }
                Some(RecordedResult::Failed(failure)) => {
                    if first_failure.is_none() {
                        first_failure = Some(activity_failed(id, TaskKind::ToolCall, failure));
                    }
                }
                Some(RecordedResult::Completed(ActivityOutput::Model(_))) => {
                    return Err(OrchestrationError::UnexpectedResult {
                        id,
                        expected: TaskKind::ToolCall,
                    });
                }
            }
        }

        if let Some(failed) = first_failure {
            if options.fan_out_policy == FanOutPolicy::FailFast || waiting.is_empty() {
                return Ok(failed);
            }
        }
        if !waiting.is_empty() {
            let status = tools_status(&calls, state.turn());
            return Ok(cursor.suspend(OrchestratorState::AwaitingToolResult, waiting, status));
        }

        for outcome in outcomes {
            state.push(tool_message(outcome));
        }
        state.resolve_tools();
    }
}
