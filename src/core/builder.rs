//! 宿主构建器：按配置组装工具注册表、模型活动、ActivityWorker 与 DurableRuntime
//!
//! HTTP 服务与测试共用同一套组装逻辑，测试可替换 LLM 或工具注册表。

use std::sync::Arc;

use crate::activities::{ActivityWorker, ModelCallActivity, ToolCallActivity, DEFAULT_SYSTEM_PROMPT};
use crate::config::AppConfig;
use crate::core::client::DurableClient;
use crate::core::runtime::DurableRuntime;
use crate::core::task_scheduler::TaskScheduler;
use crate::llm::{create_llm_from_config, LlmClient};
use crate::tools::{CalculatorTool, EchoTool, FetchTool, ToolExecutor, ToolRegistry};

pub struct RuntimeBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    registry: Option<ToolRegistry>,
}

impl RuntimeBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            registry: None,
        }
    }

    /// 使用指定的 LLM 客户端，而不是按配置创建
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 内置工具：calculator、echo、fetch
    pub fn default_registry(config: &AppConfig) -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(CalculatorTool);
        tools.register(EchoTool);
        tools.register(FetchTool::new(
            config.tools.fetch.allowed_domains.clone(),
            config.tools.fetch.timeout_secs,
            config.tools.fetch.max_result_chars,
        ));
        tools
    }

    pub fn build(self) -> Arc<DurableRuntime> {
        let registry = self
            .registry
            .unwrap_or_else(|| Self::default_registry(&self.config));
        let llm = self
            .llm
            .unwrap_or_else(|| create_llm_from_config(&self.config));

        let executor = Arc::new(ToolExecutor::new(
            registry,
            self.config.tools.tool_timeout_secs,
        ));
        let base_prompt = self
            .config
            .app
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let model = ModelCallActivity::new(
            llm,
            base_prompt,
            &executor.tool_descriptions(),
            &executor.schema_json(),
        );
        tracing::info!(tools = ?executor.tool_names(), "activity worker ready");

        let worker = ActivityWorker::new(
            Arc::new(model),
            Arc::new(ToolCallActivity::new(executor)),
            TaskScheduler::new(self.config.tools.max_concurrent),
        );
        Arc::new(DurableRuntime::new(
            worker,
            self.config.orchestration.options(),
        ))
    }

    /// 构建宿主并返回客户端
    pub fn build_client(self) -> DurableClient {
        let max_prompt_chars = self.config.orchestration.max_prompt_chars;
        let retention = self.config.orchestration.retention();
        DurableClient::new(self.build(), max_prompt_chars, retention)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_has_builtin_tools() {
        let registry = RuntimeBuilder::default_registry(&AppConfig::default());
        assert_eq!(
            registry.tool_names(),
            vec!["calculator".to_string(), "echo".to_string(), "fetch".to_string()]
        );
    }

    #[tokio::test]
    async fn test_build_uses_orchestration_options() {
        let mut config = AppConfig::default();
        config.orchestration.max_turns = 3;
        let runtime = RuntimeBuilder::new(config).build();
        assert_eq!(runtime.options().max_turns, 3);
    }
}
