use chrono::{DateTime, Utc};
use offload_core::{TaskId, TaskKind, TaskOutput};
use serde::Serialize;

/// Which path produced a task's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutedBy {
    Worker,
    Fallback,
}

/// Why a task was routed to the inline fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Worker dispatch switched off by config.
    Disabled,
    /// No worker session attached.
    WorkerUnavailable,
    /// Health check saw no heartbeat within the threshold.
    WorkerUnhealthy,
    /// The worker session reported a transport fault.
    WorkerError,
    /// The scheduler was destroyed; nothing is dispatched any more.
    Destroyed,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::Disabled => "disabled",
            FallbackReason::WorkerUnavailable => "worker_unavailable",
            FallbackReason::WorkerUnhealthy => "worker_unhealthy",
            FallbackReason::WorkerError => "worker_error",
            FallbackReason::Destroyed => "destroyed",
        }
    }
}

/// A settled task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub output: TaskOutput,
    pub executed_by: ExecutedBy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    /// Compute time as reported by the executing path.
    pub processing_time_ms: u64,
}

impl TaskOutcome {
    pub fn is_fallback(&self) -> bool {
        self.executed_by == ExecutedBy::Fallback
    }
}

/// Read-only snapshot of worker health and queue state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatus {
    /// A healthy worker session is attached and the service is live.
    pub available: bool,
    pub healthy: bool,
    pub destroyed: bool,
    pub worker_name: Option<String>,
    /// Task currently dispatched to the worker.
    pub current_task: Option<TaskId>,
    /// Tasks waiting for dispatch.
    pub queue_length: usize,
    /// All tracked tasks, queued and dispatched.
    pub pending_tasks: usize,
    /// Outstanding timeout timers.
    pub active_timers: usize,
    pub last_heartbeat: Option<DateTime<Utc>>,
}
