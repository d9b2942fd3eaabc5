//! 活动层：所有非确定性操作（调用模型、执行工具）都在这里完成
//!
//! 编排器只产出 ActivityTask；宿主把任务交给 ActivityWorker，
//! 由它按任务类型分派到 ModelActivity / ToolActivity，并按任务附带的 RetryPolicy 重试。

pub mod model_call;
pub mod tool_call;

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{
    run_with_retry, ActivityError, ActivityFailure, ActivityInput, ActivityOutput, ActivityTask,
    ModelResponse, TaskId, TaskScheduler, ToolOutcome,
};
use crate::memory::{ConversationState, ToolCallRequest};

pub use model_call::{parse_model_output, ModelCallActivity, DEFAULT_SYSTEM_PROMPT};
pub use tool_call::ToolCallActivity;

/// 模型调用：输入为会话快照，返回最终回复或工具调用请求
#[async_trait]
pub trait ModelActivity: Send + Sync {
    async fn call_model(
        &self,
        task_id: TaskId,
        state: &ConversationState,
    ) -> Result<ModelResponse, ActivityError>;
}

/// 工具调用：业务错误以 `is_error` 的 ToolOutcome 返回
#[async_trait]
pub trait ToolActivity: Send + Sync {
    async fn call_tool(&self, call: &ToolCallRequest) -> Result<ToolOutcome, ActivityError>;

    /// 重复执行是否安全；仅用于重试时的日志
    fn is_idempotent(&self, _name: &str) -> bool {
        true
    }
}

/// 活动执行器：按类型分派并施加重试策略与工具并发上限
#[derive(Clone)]
pub struct ActivityWorker {
    model: Arc<dyn ModelActivity>,
    tools: Arc<dyn ToolActivity>,
    scheduler: TaskScheduler,
}

impl ActivityWorker {
    pub fn new(
        model: Arc<dyn ModelActivity>,
        tools: Arc<dyn ToolActivity>,
        scheduler: TaskScheduler,
    ) -> Self {
        Self {
            model,
            tools,
            scheduler,
        }
    }

    /// 单次尝试，不重试，也不占用工具并发许可
    pub async fn execute_once(&self, task: &ActivityTask) -> Result<ActivityOutput, ActivityError> {
        match &task.input {
            ActivityInput::Model { state } => self
                .model
                .call_model(task.id, state)
                .await
                .map(ActivityOutput::Model),
            ActivityInput::Tool { call } => self.tools.call_tool(call).await.map(ActivityOutput::Tool),
        }
    }

    /// 按任务的 RetryPolicy 执行，返回最终结果或失败详情
    ///
    /// 工具任务先在计时之外取得并发许可，并在整个重试序列中持有；排队时间不计入单次尝试超时。
    pub async fn execute(&self, task: &ActivityTask) -> Result<ActivityOutput, ActivityFailure> {
        let label = task.label();
        let (non_idempotent, _permit) = match &task.input {
            ActivityInput::Tool { call } => (
                !self.tools.is_idempotent(&call.name),
                self.scheduler.acquire_tool().await,
            ),
            ActivityInput::Model { .. } => (false, None),
        };
        let label_ref = label.as_str();
        run_with_retry(&task.retry, label_ref, |attempt| async move {
            if attempt > 1 && non_idempotent {
                tracing::warn!(task = %task.id, activity = %label_ref, attempt, "retrying non-idempotent tool");
            }
            self.execute_once(task).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use crate::core::{FailureReason, RetryPolicy};
    use crate::memory::Message;

    /// 前 `failures` 次返回瞬时错误，之后给出最终回复
    struct FlakyModel {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ModelActivity for FlakyModel {
        async fn call_model(
            &self,
            _task_id: TaskId,
            _state: &ConversationState,
        ) -> Result<ModelResponse, ActivityError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                Err(ActivityError::Transient(format!("503 on call {n}")))
            } else {
                Ok(ModelResponse::Final {
                    content: "4".to_string(),
                })
            }
        }
    }

    struct UpperTool;

    /// 每次调用耗时固定的工具
    struct SteadyTool(Duration);

    #[async_trait]
    impl ToolActivity for SteadyTool {
        async fn call_tool(&self, call: &ToolCallRequest) -> Result<ToolOutcome, ActivityError> {
            tokio::time::sleep(self.0).await;
            Ok(ToolOutcome {
                call_id: call.id.clone(),
                name: call.name.clone(),
                content: "done".to_string(),
                is_error: false,
            })
        }
    }

    #[async_trait]
    impl ToolActivity for UpperTool {
        async fn call_tool(&self, call: &ToolCallRequest) -> Result<ToolOutcome, ActivityError> {
            Ok(ToolOutcome {
                call_id: call.id.clone(),
                name: call.name.clone(),
                content: call.arguments.to_string().to_uppercase(),
                is_error: false,
            })
        }
    }

    fn worker(failures: u32) -> (ActivityWorker, Arc<FlakyModel>) {
        let model = Arc::new(FlakyModel {
            failures,
            calls: AtomicU32::new(0),
        });
        let worker = ActivityWorker::new(model.clone(), Arc::new(UpperTool), TaskScheduler::new(2));
        (worker, model)
    }

    fn model_task(max_attempts: u32) -> ActivityTask {
        let mut state = ConversationState::new();
        state.push(Message::user("2+2?"));
        ActivityTask::model_call(
            TaskId(0),
            state,
            RetryPolicy::new(max_attempts, Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn test_model_task_retried_until_success() {
        let (worker, model) = worker(2);
        let output = worker.execute(&model_task(3)).await.unwrap();
        assert_eq!(
            output,
            ActivityOutput::Model(ModelResponse::Final {
                content: "4".to_string()
            })
        );
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_model_task_exhausts_retries() {
        let (worker, model) = worker(10);
        let failure = worker.execute(&model_task(3)).await.unwrap_err();
        assert_eq!(failure.reason, FailureReason::RetriesExhausted);
        assert_eq!(failure.attempts, 3);
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_tool_task_dispatch() {
        let (worker, _) = worker(0);
        let task = ActivityTask::tool_call(
            TaskId(1),
            ToolCallRequest {
                id: "call_0_0".to_string(),
                name: "upper".to_string(),
                arguments: serde_json::json!("hi"),
            },
            RetryPolicy::default(),
        );
        match worker.execute(&task).await.unwrap() {
            ActivityOutput::Tool(outcome) => assert_eq!(outcome.content, "\"HI\""),
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_permit_queueing_does_not_count_against_attempt_timeout() {
        let model = Arc::new(FlakyModel {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let worker = ActivityWorker::new(
            model,
            Arc::new(SteadyTool(Duration::from_millis(60))),
            TaskScheduler::new(1),
        );
        let tasks: Vec<ActivityTask> = (0..4)
            .map(|i| {
                ActivityTask::tool_call(
                    TaskId(i),
                    ToolCallRequest {
                        id: format!("call_0_{i}"),
                        name: "steady".to_string(),
                        arguments: serde_json::json!({}),
                    },
                    RetryPolicy::new(2, Duration::from_millis(1))
                        .with_attempt_timeout(Duration::from_millis(100)),
                )
            })
            .collect();

        let results =
            futures_util::future::join_all(tasks.iter().map(|task| worker.execute(task))).await;
        for result in results {
            assert!(result.is_ok(), "{result:?}");
        }
    }
}
