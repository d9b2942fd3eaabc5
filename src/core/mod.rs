//! 核心编排层：编排器、历史、重试、实例状态与进程内宿主

pub mod builder;
pub mod client;
pub mod error;
pub mod history;
pub mod orchestrator;
pub mod recovery;
pub mod runtime;
pub mod session_supervisor;
pub mod state;
pub mod task_scheduler;

pub use builder::RuntimeBuilder;
pub use client::{status_query_uri, DurableClient, StartRequest, StartResponse};
pub use error::{
    ActivityError, ActivityFailure, FailureReason, HostError, OrchestrationError,
    OrchestrationFailure,
};
pub use history::{EventRace, HistoryEvent, HistoryIndex, RecordedResult};
pub use orchestrator::{
    replay, ApprovalDecision, ApprovalOptions, Decision, FanOutPolicy, OrchestrationInput,
    OrchestratorOptions, OrchestratorState, TimerRequest,
};
pub use recovery::{run_with_retry, RetryPolicy};
pub use runtime::{DurableRuntime, InstanceRecord, InstanceStore};
pub use session_supervisor::{InstanceHandle, SessionSupervisor};
pub use state::{InstanceStatus, OrchestrationInstance, RuntimeStatus};
pub use task_scheduler::{
    ActivityInput, ActivityOutput, ActivityTask, ModelResponse, TaskId, TaskKind, TaskScheduler,
    ToolOutcome,
};
