//! 记忆层：实例内的会话状态（只追加，由重放重建）

pub mod conversation;

pub use conversation::{ConversationState, Message, Role, ToolCallRequest};
