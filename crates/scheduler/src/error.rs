use std::time::Duration;

use offload_core::{CodecError, TaskId};
use thiserror::Error;

/// Why a scheduled task did not produce a result.
///
/// Each variant is scoped to the one caller that receives it; sibling tasks
/// are never affected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("task {task_id} timed out after {timeout:?}")]
    Timeout { task_id: TaskId, timeout: Duration },

    #[error("task {task_id} failed in worker: {message}")]
    WorkerFailed { task_id: TaskId, message: String },

    #[error("task {0} cancelled")]
    Cancelled(TaskId),

    #[error("unsupported task kind: {0}")]
    UnsupportedKind(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("queue full ({0} pending tasks)")]
    QueueFull(usize),

    #[error("scheduler unavailable: service destroyed")]
    Unavailable,
}

impl From<CodecError> for SchedulerError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::UnsupportedKind(kind) => SchedulerError::UnsupportedKind(kind),
            other => SchedulerError::InvalidPayload(other.to_string()),
        }
    }
}

impl SchedulerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, SchedulerError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SchedulerError::Cancelled(_))
    }
}

/// Transport-level faults at the worker boundary.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker disconnected")]
    Disconnected,

    #[error("worker terminated")]
    Terminated,

    #[error("encode error: {0}")]
    Codec(#[from] CodecError),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
