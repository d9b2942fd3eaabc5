//! 工具调用 JSON Schema 生成（schemars）
//!
//! 将合法 tool call 的 JSON 结构注入 system prompt，减少 LLM 输出格式错误。
//! 支持单个调用 `{"tool": .., "args": {..}}` 与批量 `{"tool_calls": [..]}` 两种写法。

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

/// 单个工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ToolCallFormat {
    /// 工具名，如 calculator、echo、fetch
    pub tool: String,
    /// 工具参数，依工具不同而不同
    #[serde(default)]
    pub args: serde_json::Value,
}

/// 一次请求多个工具（并发执行，结果按顺序返回）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ToolCallBatchFormat {
    pub tool_calls: Vec<ToolCallFormat>,
}

/// 返回批量工具调用的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallBatchFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
