//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE__*` 覆盖（双下划线表示嵌套，如 `BEE__LLM__PROVIDER=openai`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{ApprovalOptions, FanOutPolicy, OrchestratorOptions, RetryPolicy};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub orchestration: OrchestrationSection,
    pub web: WebSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 覆盖默认系统提示词
    pub system_prompt: Option<String>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "bee-durable".to_string(),
            system_prompt: None,
        }
    }
}

/// [llm] 段：provider 为 openai / deepseek / mock
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: None,
            base_url: None,
        }
    }
}

/// [tools] 段：工具超时、并发上限、fetch 白名单
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 同时执行的工具活动上限
    pub max_concurrent: usize,
    pub fetch: FetchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            max_concurrent: 4,
            fetch: FetchSection::default(),
        }
    }
}

/// [tools.fetch] 段：抓取 URL 的超时、最大字符数、允许的域名白名单
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    pub timeout_secs: u64,
    pub max_result_chars: usize,
    pub allowed_domains: Vec<String>,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_result_chars: 8000,
            allowed_domains: vec![
                "en.wikipedia.org".into(),
                "github.com".into(),
                "raw.githubusercontent.com".into(),
                "docs.rs".into(),
                "crates.io".into(),
                "doc.rust-lang.org".into(),
                "developer.mozilla.org".into(),
                "arxiv.org".into(),
                "news.ycombinator.com".into(),
                "api.open-meteo.com".into(),
            ],
        }
    }
}

/// [orchestration] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestrationSection {
    /// 单个实例最多调用模型的次数
    pub max_turns: u32,
    pub fan_out_policy: FanOutPolicy,
    /// 每段执行调用模型多少次后 continue-as-new，0 表示不启用
    pub continue_as_new_after_turns: u32,
    /// 终态实例保留时间（秒），过期后状态查询返回 not found
    pub retention_secs: u64,
    pub max_prompt_chars: usize,
    pub model_retry: RetryPolicy,
    pub tool_retry: RetryPolicy,
    pub approval: ApprovalSection,
}

/// [orchestration.approval] 段：最终回复是否需要外部事件审批
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApprovalSection {
    pub enabled: bool,
    pub event_name: String,
    /// 等待审批的上限（毫秒），超时视为拒绝
    pub timeout_ms: u64,
}

impl Default for ApprovalSection {
    fn default() -> Self {
        Self {
            enabled: false,
            event_name: "approval".to_string(),
            timeout_ms: 3_600_000,
        }
    }
}

impl Default for OrchestrationSection {
    fn default() -> Self {
        Self {
            max_turns: 10,
            fan_out_policy: FanOutPolicy::default(),
            continue_as_new_after_turns: 0,
            retention_secs: 3600,
            max_prompt_chars: 16_000,
            model_retry: RetryPolicy::default().with_attempt_timeout(Duration::from_secs(120)),
            tool_retry: RetryPolicy::new(3, Duration::from_millis(500))
                .with_max_retry_interval(Duration::from_secs(10)),
            approval: ApprovalSection::default(),
        }
    }
}

impl OrchestrationSection {
    pub fn options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            max_turns: self.max_turns,
            fan_out_policy: self.fan_out_policy,
            continue_as_new_after_turns: self.continue_as_new_after_turns,
            model_retry: self.model_retry.clone(),
            tool_retry: self.tool_retry.clone(),
            approval: self.approval.enabled.then(|| ApprovalOptions {
                event_name: self.approval.event_name.clone(),
                timeout: Duration::from_millis(self.approval.timeout_ms),
            }),
        }
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// [web] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub host: String,
    pub port: u16,
    /// 状态查询地址的前缀；未设置时取请求的 Host 头
    pub public_base_url: Option<String>,
    /// 清理过期实例的间隔（秒）
    pub purge_interval_secs: u64,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7071,
            public_base_url: None,
            purge_interval_secs: 60,
        }
    }
}

/// 从 config 目录加载配置，环境变量 BEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path.filter(|p| p.exists()) {
        builder = builder.add_source(config::File::from(path).required(false));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
