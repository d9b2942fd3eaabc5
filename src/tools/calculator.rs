//! Calculator 工具：对两个数做四则运算
//!
//! 参数 `{"a": 2, "b": 2, "op": "add"}`，op 缺省为 add；纯函数，可安全重试。

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::{Tool, ToolError};

#[derive(Debug, Deserialize)]
struct CalculatorArgs {
    a: f64,
    b: f64,
    #[serde(default = "default_op")]
    op: String,
}

fn default_op() -> String {
    "add".to_string()
}

/// 整数结果不带小数点（4.0 -> "4"）
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Arithmetic on two numbers. Args: {\"a\": number, \"b\": number, \"op\": \"add\"|\"sub\"|\"mul\"|\"div\"} (op defaults to add)."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "a": { "type": "number" },
                "b": { "type": "number" },
                "op": { "type": "string", "enum": ["add", "sub", "mul", "div"] }
            },
            "required": ["a", "b"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: CalculatorArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::Domain(format!("Invalid arguments: {e}")))?;
        let value = match args.op.as_str() {
            "add" | "+" => args.a + args.b,
            "sub" | "-" => args.a - args.b,
            "mul" | "*" => args.a * args.b,
            "div" | "/" => {
                if args.b == 0.0 {
                    return Err(ToolError::Domain("Division by zero".to_string()));
                }
                args.a / args.b
            }
            other => return Err(ToolError::Domain(format!("Unsupported op: {other}"))),
        };
        Ok(format_number(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_defaults() {
        let result = CalculatorTool
            .execute(serde_json::json!({"a": 2, "b": 2}))
            .await;
        assert_eq!(result, Ok("4".to_string()));
    }

    #[tokio::test]
    async fn test_division() {
        let tool = CalculatorTool;
        assert_eq!(
            tool.execute(serde_json::json!({"a": 7, "b": 2, "op": "div"})).await,
            Ok("3.5".to_string())
        );
        assert_eq!(
            tool.execute(serde_json::json!({"a": 1, "b": 0, "op": "div"})).await,
            Err(ToolError::Domain("Division by zero".to_string()))
        );
    }

    #[tokio::test]
    async fn test_invalid_args_are_domain_errors() {
        let err = CalculatorTool
            .execute(serde_json::json!({"a": "two"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Domain(m) if m.starts_with("Invalid arguments")));
    }
}
