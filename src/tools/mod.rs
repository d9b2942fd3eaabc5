//! 工具箱：calculator、echo、fetch，以及注册表、执行器与 tool call schema

pub mod calculator;
pub mod echo;
pub mod executor;
pub mod fetch;
pub mod registry;
pub mod schema;

pub use calculator::CalculatorTool;
pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use fetch::FetchTool;
pub use registry::{Tool, ToolError, ToolRegistry};
pub use schema::{tool_call_schema_json, ToolCallBatchFormat, ToolCallFormat};
