//! 对外客户端：启动实例、查询状态、发送外部事件、终止实例
//!
//! HTTP 层与测试都只通过 DurableClient 访问宿主。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::error::HostError;
use crate::core::orchestrator::OrchestrationInput;
use crate::core::runtime::DurableRuntime;
use crate::core::state::{InstanceStatus, OrchestrationInstance};

/// 启动请求
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl StartRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            metadata: None,
        }
    }
}

/// 启动结果：实例 ID 与状态查询地址
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub instance_id: String,
    pub status_query_uri: String,
}

/// 状态查询地址：`{base}/api/agent/status/{id}`
pub fn status_query_uri(base_url: &str, instance_id: &str) -> String {
    format!(
        "{}/api/agent/status/{}",
        base_url.trim_end_matches('/'),
        instance_id
    )
}

#[derive(Clone)]
pub struct DurableClient {
    runtime: Arc<DurableRuntime>,
    max_prompt_chars: usize,
    retention: Duration,
}

impl DurableClient {
    pub fn new(runtime: Arc<DurableRuntime>, max_prompt_chars: usize, retention: Duration) -> Self {
        Self {
            runtime,
            max_prompt_chars,
            retention,
        }
    }

    pub fn runtime(&self) -> &Arc<DurableRuntime> {
        &self.runtime
    }

    fn validate(&self, request: &StartRequest) -> Result<(), HostError> {
        if request.prompt.trim().is_empty() {
            return Err(HostError::Validation("Prompt must not be empty.".to_string()));
        }
        let chars = request.prompt.chars().count();
        if chars > self.max_prompt_chars {
            return Err(HostError::Validation(format!(
                "Prompt is too long ({chars} > {} characters).",
                self.max_prompt_chars
            )));
        }
        Ok(())
    }

    /// 校验输入并创建实例；返回时实例已可查询
    pub async fn start_new(
        &self,
        request: StartRequest,
        base_url: &str,
    ) -> Result<StartResponse, HostError> {
        self.validate(&request).map_err(|err| {
            tracing::warn!(error = %err, "rejected start request");
            err
        })?;
        let mut input = OrchestrationInput::new(request.prompt);
        if let Some(metadata) = request.metadata {
            input = input.with_metadata(metadata);
        }
        let instance_id = self.runtime.create_instance(input).await;
        Ok(StartResponse {
            status_query_uri: status_query_uri(base_url, &instance_id),
            instance_id,
        })
    }

    fn is_expired(&self, instance: &OrchestrationInstance) -> bool {
        let Ok(retention) = chrono::Duration::from_std(self.retention) else {
            return false;
        };
        instance.is_terminal() && instance.last_updated_at < Utc::now() - retention
    }

    /// 只读：未知实例或保留期已过的终态实例返回 InstanceNotFound
    pub async fn get_status(&self, instance_id: &str) -> Result<InstanceStatus, HostError> {
        match self.runtime.store().get(instance_id).await {
            Some(instance) if !self.is_expired(&instance) => Ok(instance.project()),
            _ => Err(HostError::InstanceNotFound(instance_id.to_string())),
        }
    }

    /// 终止实例；已终态的实例原样返回
    pub async fn terminate(
        &self,
        instance_id: &str,
        reason: &str,
    ) -> Result<InstanceStatus, HostError> {
        self.get_status(instance_id).await?;
        let instance = self.runtime.terminate(instance_id, reason).await?;
        Ok(instance.project())
    }

    /// 向运行中的实例发送事件；未知实例 InstanceNotFound，已终态 InstanceNotRunning
    pub async fn raise_event(
        &self,
        instance_id: &str,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<(), HostError> {
        if name.trim().is_empty() {
            return Err(HostError::Validation("Event name must not be empty.".to_string()));
        }
        self.get_status(instance_id).await?;
        self.runtime.raise_event(instance_id, name, payload).await
    }

    pub async fn purge_expired(&self) -> usize {
        let purged = self.runtime.store().purge_expired(self.retention).await;
        if purged > 0 {
            tracing::info!(purged, "purged expired instances");
        }
        purged
    }

    /// 轮询直到实例进入终态或超时，返回最后一次查询到的状态
    pub async fn wait_for_completion(
        &self,
        instance_id: &str,
        timeout: Duration,
    ) -> Result<InstanceStatus, HostError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status = self.get_status(instance_id).await?;
            if status.runtime_status.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
