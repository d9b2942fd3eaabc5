//! ToolCall 活动：按名称执行一个工具

use std::sync::Arc;

use async_trait::async_trait;

use crate::activities::ToolActivity;
use crate::core::{ActivityError, ToolOutcome};
use crate::memory::ToolCallRequest;
use crate::tools::ToolExecutor;

pub struct ToolCallActivity {
    executor: Arc<ToolExecutor>,
}

impl ToolCallActivity {
    pub fn new(executor: Arc<ToolExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ToolActivity for ToolCallActivity {
    async fn call_tool(&self, call: &ToolCallRequest) -> Result<ToolOutcome, ActivityError> {
        self.executor.execute(call).await
    }

    fn is_idempotent(&self, name: &str) -> bool {
        self.executor
            .get_tool(name)
            .map(|tool| tool.is_idempotent())
            .unwrap_or(true)
    }
}
