//! 实例状态：OrchestrationInstance 与对外的 InstanceStatus 投影
//!
//! 实例只由宿主修改；进入终态后不可再变。状态接口只读取投影，不产生副作用。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::OrchestrationFailure;
use crate::core::orchestrator::OrchestrationInput;

/// 实例运行状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeStatus {
    Running,
    Completed,
    Failed,
    Terminated,
}

impl RuntimeStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// 一个编排实例
#[derive(Clone, Debug)]
pub struct OrchestrationInstance {
    pub instance_id: String,
    pub runtime_status: RuntimeStatus,
    /// continue-as-new 时递增，从 1 开始
    pub execution_id: u64,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub custom_status: Option<serde_json::Value>,
    pub input: OrchestrationInput,
    pub output: Option<String>,
    pub failure: Option<OrchestrationFailure>,
}

impl OrchestrationInstance {
    pub fn new(instance_id: impl Into<String>, input: OrchestrationInput) -> Self {
        let now = Utc::now();
        Self {
            instance_id: instance_id.into(),
            runtime_status: RuntimeStatus::Running,
            execution_id: 1,
            created_at: now,
            last_updated_at: now,
            custom_status: None,
            input,
            output: None,
            failure: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.runtime_status.is_terminal()
    }

    /// 投影为状态接口返回的视图
    pub fn project(&self) -> InstanceStatus {
        InstanceStatus {
            instance_id: self.instance_id.clone(),
            runtime_status: self.runtime_status,
            workflow_status: self.custom_status.clone(),
            created_at: self.created_at,
            last_updated_at: self.last_updated_at,
            input: serde_json::Value::String(self.input.prompt.clone()),
            metadata: self.input.metadata.clone(),
            output: self.output.clone(),
            failure_details: self.failure.clone(),
        }
    }
}

/// 状态接口视图（JSON 字段为 camelCase）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    pub instance_id: String,
    pub runtime_status: RuntimeStatus,
    /// 编排器写入的进度信息
    pub workflow_status: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_details: Option<OrchestrationFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_instance_is_running() {
        let instance = OrchestrationInstance::new("abc", OrchestrationInput::new("2+2?"));
        assert_eq!(instance.runtime_status, RuntimeStatus::Running);
        assert!(!instance.is_terminal());
        assert_eq!(instance.execution_id, 1);
    }

    #[test]
    fn test_status_projection_uses_camel_case() {
        let mut instance = OrchestrationInstance::new("abc", OrchestrationInput::new("2+2?"));
        instance.runtime_status = RuntimeStatus::Completed;
        instance.output = Some("4".to_string());
        let json = serde_json::to_value(instance.project()).unwrap();
        assert_eq!(json["instanceId"], "abc");
        assert_eq!(json["runtimeStatus"], "Completed");
        assert_eq!(json["output"], "4");
        assert_eq!(json["input"], "2+2?");
        assert!(json.get("failureDetails").is_none());
    }
}
