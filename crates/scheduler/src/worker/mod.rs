//! The background worker boundary.
//!
//! The scheduler talks to a worker through [`TaskWorker::post`] and hears
//! back on an event stream carried by the [`WorkerSession`]. Responses are
//! matched to tasks by id, so a worker may answer late or not at all.

mod silent;
mod thread;

use std::sync::Arc;

use async_trait::async_trait;
use offload_core::{WorkerRequest, WorkerResponse};
use tokio::sync::mpsc;

use crate::error::WorkerError;

pub use silent::SilentWorker;
pub use thread::ThreadWorker;

/// Something a worker tells the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Answer for one posted task.
    Response(WorkerResponse),
    /// Liveness signal from an idle worker.
    Heartbeat,
    /// Transport-level fault. The session can no longer be trusted.
    Error(String),
}

pub type WorkerEventSender = mpsc::UnboundedSender<WorkerEvent>;
pub type WorkerEvents = mpsc::UnboundedReceiver<WorkerEvent>;

/// A background executor for accelerated task kernels.
#[async_trait]
pub trait TaskWorker: Send + Sync {
    /// Human-readable name for logging and status.
    fn name(&self) -> &str;

    /// Hand a task to the worker. Returns once the message is delivered, not
    /// when the task completes.
    async fn post(&self, request: WorkerRequest) -> Result<(), WorkerError>;

    /// Release the worker. Later posts fail.
    async fn terminate(&self);
}

/// A worker handle paired with the stream of events it produces.
pub struct WorkerSession {
    pub worker: Arc<dyn TaskWorker>,
    pub events: WorkerEvents,
}

impl WorkerSession {
    pub fn new(worker: Arc<dyn TaskWorker>, events: WorkerEvents) -> Self {
        Self { worker, events }
    }

    /// Channel a worker implementation uses to publish events.
    pub fn channel() -> (WorkerEventSender, WorkerEvents) {
        mpsc::unbounded_channel()
    }
}

impl std::fmt::Debug for WorkerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSession")
            .field("worker", &self.worker.name())
            .finish()
    }
}
