//! 错误类型：活动错误、编排错误、宿主（启动 / 查询）错误，以及写入实例的失败详情
//!
//! 活动的瞬时错误由重试机制吸收；重试耗尽或致命错误作为数据交给编排器，
//! 编排器据此优雅终止实例，而不是把错误抛出实例边界。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::task_scheduler::{TaskId, TaskKind};

/// 单次活动执行的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActivityError {
    /// 网络、限流、超时等，可按 RetryPolicy 重试
    #[error("Transient activity error: {0}")]
    Transient(String),

    /// 鉴权失败、模型输出不符合约定等，不可重试
    #[error("Fatal activity error: {0}")]
    Fatal(String),
}

impl ActivityError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(msg) | Self::Fatal(msg) => msg,
        }
    }
}

/// 活动最终失败的原因（写入历史）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// 重试预算耗尽
    RetriesExhausted,
    /// 不可重试的错误
    Fatal,
}

/// 历史中记录的活动失败
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityFailure {
    pub reason: FailureReason,
    pub message: String,
    pub attempts: u32,
}

/// 编排器重放时检测到的程序缺陷
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestrationError {
    /// 历史中该位置记录的任务与本次重放要调度的任务不一致
    #[error("Non-deterministic orchestration at task {id}: history has {recorded}, replay scheduled {replayed}")]
    Nondeterminism {
        id: TaskId,
        recorded: String,
        replayed: String,
    },

    /// 活动结果类型与任务类型不匹配
    #[error("Unexpected result for task {id}: expected {expected:?} output")]
    UnexpectedResult { id: TaskId, expected: TaskKind },
}

/// 实例失败详情（通过状态接口对外可见）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestrationFailure {
    ActivityFailed {
        task_id: TaskId,
        kind: TaskKind,
        reason: FailureReason,
        message: String,
        attempts: u32,
    },
    TurnLimitExceeded { max_turns: u32 },
    /// 等待审批事件超时，视为拒绝
    ApprovalTimedOut { event: String, timeout_ms: u64 },
    /// 审批事件拒绝了答案且未给出修改意见
    ApprovalRejected { event: String },
    Nondeterminism { detail: String },
    Terminated { reason: String },
}

impl std::fmt::Display for OrchestrationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ActivityFailed {
                task_id,
                kind,
                message,
                attempts,
                ..
            } => write!(f, "{kind:?} task {task_id} failed after {attempts} attempt(s): {message}"),
            Self::TurnLimitExceeded { max_turns } => {
                write!(f, "Conversation exceeded {max_turns} model turn(s)")
            }
            Self::ApprovalTimedOut { event, timeout_ms } => {
                write!(f, "No '{event}' event received within {timeout_ms}ms")
            }
            Self::ApprovalRejected { event } => {
                write!(f, "Answer rejected by '{event}' event without feedback")
            }
            Self::Nondeterminism { detail } => write!(f, "{detail}"),
            Self::Terminated { reason } => write!(f, "Terminated: {reason}"),
        }
    }
}

impl From<OrchestrationError> for OrchestrationFailure {
    fn from(err: OrchestrationError) -> Self {
        Self::Nondeterminism {
            detail: err.to_string(),
        }
    }
}

/// 启动器 / 状态查询接口的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// 输入为空或格式错误，实例未创建
    #[error("Validation error: {0}")]
    Validation(String),

    /// 未知或已过期的实例 ID
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// 实例已进入终态，不再接收事件
    #[error("Instance is not running: {0}")]
    InstanceNotRunning(String),
}
