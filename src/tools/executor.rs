//! 工具执行器
//!
//! 持有 ToolRegistry 与单次调用超时。工具返回的业务错误与未知工具名都整理为 `is_error` 的 ToolOutcome，
//! 交还给模型处理；超时与工具报告的传输故障（`ToolError::Transient`）视为瞬时错误，交由重试策略处理。
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::{ActivityError, ToolOutcome};
use crate::memory::ToolCallRequest;
use crate::tools::{Tool, ToolError, ToolRegistry};

pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn with_timeout(registry: ToolRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub async fn execute(&self, call: &ToolCallRequest) -> Result<ToolOutcome, ActivityError> {
        let start = Instant::now();
        let result = timeout(
            self.timeout,
            self.registry.execute(&call.name, call.arguments.clone()),
        )
        .await;

        let outcome = match &result {
            Ok(Ok(_)) => "ok",
            Ok(Err(ToolError::Domain(_))) => "error",
            Ok(Err(ToolError::Transient(_))) => "transient",
            Err(_) => "timeout",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "call_id": call.id,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.arguments),
        });
        tracing::info!(audit = %audit, "tool");

        match result {
            Ok(Ok(content)) => Ok(ToolOutcome {
                call_id: call.id.clone(),
                name: call.name.clone(),
                content,
                is_error: false,
            }),
            Ok(Err(ToolError::Domain(message))) => Ok(ToolOutcome {
                call_id: call.id.clone(),
                name: call.name.clone(),
                content: message,
                is_error: true,
            }),
            Ok(Err(ToolError::Transient(message))) => Err(ActivityError::Transient(format!(
                "Tool {} failed: {message}",
                call.name
            ))),
            Err(_) => Err(ActivityError::Transient(format!(
                "Tool {} timed out after {}s",
                call.name,
                self.timeout.as_secs()
            ))),
        }
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.registry.tool_descriptions()
    }

    /// 各工具参数 schema 的 JSON，写入 system prompt
    pub fn schema_json(&self) -> String {
        self.registry.to_schema_json()
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
