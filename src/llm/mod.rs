//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock），以及按配置选择后端

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

use crate::config::AppConfig;

pub use deepseek::{create_deepseek_client, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{ChatMessage, ChatRole, LlmClient, LlmError};

const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）
///
/// provider 为 mock 或找不到任何 API Key 时使用 Mock。
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let has_openai_key = std::env::var("OPENAI_API_KEY").is_ok();
    let has_deepseek_key = std::env::var("DEEPSEEK_API_KEY").is_ok();
    let base_url = cfg.llm.base_url.as_deref();
    let model = cfg.llm.model.as_deref();

    match provider.as_str() {
        "deepseek" if has_deepseek_key || has_openai_key => {
            tracing::info!(model = ?model, "Using DeepSeek LLM");
            Arc::new(create_deepseek_client(model, base_url))
        }
        "openai" if has_openai_key => {
            let model = model.unwrap_or(DEFAULT_OPENAI_MODEL);
            tracing::info!(model = %model, base_url = ?base_url, "Using OpenAI-compatible LLM");
            Arc::new(OpenAiClient::new(base_url, model, None))
        }
        "mock" => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient)
        }
        _ => {
            tracing::warn!(provider = %provider, "No API key set or provider unknown, using Mock LLM");
            Arc::new(MockLlmClient)
        }
    }
}
