use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use offload_core::WorkerRequest;

use super::{TaskWorker, WorkerEventSender, WorkerSession};
use crate::error::WorkerError;

/// Accepts every task and never answers or heartbeats.
///
/// Stands in for a hung worker: every posted task can only settle through its
/// timeout. The event channel stays open until `terminate`.
#[derive(Debug)]
pub struct SilentWorker {
    name: String,
    posted: AtomicUsize,
    events: Mutex<Option<WorkerEventSender>>,
}

impl SilentWorker {
    /// Build a worker and its session. The returned handle lets callers
    /// inspect how many tasks were posted.
    pub fn session(name: impl Into<String>) -> (Arc<SilentWorker>, WorkerSession) {
        let (tx, rx) = WorkerSession::channel();
        let worker = Arc::new(SilentWorker {
            name: name.into(),
            posted: AtomicUsize::new(0),
            events: Mutex::new(Some(tx)),
        });
        let session = WorkerSession::new(worker.clone(), rx);
        (worker, session)
    }

    pub fn posted(&self) -> usize {
        self.posted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskWorker for SilentWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn post(&self, _request: WorkerRequest) -> Result<(), WorkerError> {
        if self.events.lock().unwrap_or_else(|e| e.into_inner()).is_none() {
            return Err(WorkerError::Terminated);
        }
        self.posted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn terminate(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}
