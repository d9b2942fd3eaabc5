//! Bee Durable - 可恢复的智能体编排
//!
//! 模块划分：
//! - **activities**: 活动执行（ModelCall / ToolCall）与重试分派
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排器（纯重放状态机）、历史、重试策略、实例状态、进程内宿主与客户端
//! - **http**: 启动 / 状态 / 终止接口（feature `server`）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 会话状态
//! - **observability**: 日志初始化
//! - **tools**: 工具箱（calculator、echo、fetch）与执行器

pub mod activities;
pub mod config;
pub mod core;
#[cfg(feature = "server")]
pub mod http;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;
