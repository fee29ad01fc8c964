use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use offload_core::{CodecError, WorkerConfig, WorkerRequest, WorkerResponse};
use tracing::{debug, info, warn};

use super::{TaskWorker, WorkerEvent, WorkerEventSender, WorkerSession};
use crate::error::WorkerError;

/// Runs accelerated kernels on a dedicated OS thread.
///
/// Requests cross the thread boundary JSON-encoded, as they would to an
/// out-of-process worker. The thread handles one request at a time and sends
/// a heartbeat whenever it has been idle for the configured interval.
pub struct ThreadWorker {
    name: String,
    requests: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadWorker {
    /// Start the worker thread and return its session.
    pub fn spawn(config: &WorkerConfig) -> Result<WorkerSession, WorkerError> {
        let (req_tx, req_rx) = mpsc::channel::<Vec<u8>>();
        let (events_tx, events_rx) = WorkerSession::channel();
        let heartbeat = config.heartbeat_interval();
        let thread_name = config.name.clone();

        let handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || worker_loop(&thread_name, req_rx, events_tx, heartbeat))?;

        info!(worker = %config.name, ?heartbeat, "worker thread started");

        let worker = Arc::new(ThreadWorker {
            name: config.name.clone(),
            requests: Mutex::new(Some(req_tx)),
            thread: Mutex::new(Some(handle)),
        });
        Ok(WorkerSession::new(worker, events_rx))
    }
}

#[async_trait]
impl TaskWorker for ThreadWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn post(&self, request: WorkerRequest) -> Result<(), WorkerError> {
        let bytes = request.to_bytes()?;
        let guard = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        let tx = guard.as_ref().ok_or(WorkerError::Terminated)?;
        tx.send(bytes).map_err(|_| WorkerError::Disconnected)
    }

    async fn terminate(&self) {
        // Dropping the sender ends the thread's receive loop.
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).take();
        let handle = self.thread.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let name = self.name.clone();
            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok(())) => info!(worker = %name, "worker thread stopped"),
                Ok(Err(_)) => warn!(worker = %name, "worker thread had panicked"),
                Err(e) => warn!(worker = %name, error = %e, "failed to join worker thread"),
            }
        }
    }
}

fn worker_loop(
    name: &str,
    requests: mpsc::Receiver<Vec<u8>>,
    events: WorkerEventSender,
    heartbeat: Duration,
) {
    loop {
        let event = match requests.recv_timeout(heartbeat) {
            Ok(bytes) => match panic::catch_unwind(AssertUnwindSafe(|| handle_request(&bytes))) {
                Ok(Ok(response)) => WorkerEvent::Response(response),
                Ok(Err(e)) => WorkerEvent::Error(format!("undecodable request: {e}")),
                Err(_) => {
                    warn!(worker = %name, "kernel panicked, worker exiting");
                    let _ = events.send(WorkerEvent::Error("worker panicked".into()));
                    return;
                }
            },
            Err(RecvTimeoutError::Timeout) => WorkerEvent::Heartbeat,
            Err(RecvTimeoutError::Disconnected) => {
                debug!(worker = %name, "request channel closed");
                return;
            }
        };

        if events.send(event).is_err() {
            debug!(worker = %name, "event receiver dropped");
            return;
        }
    }
}

/// Decode one request and run its accelerated kernel.
///
/// Only an undecodable envelope is an error here; kernel and payload failures
/// become `success: false` responses for that task.
fn handle_request(bytes: &[u8]) -> Result<WorkerResponse, CodecError> {
    let start = Instant::now();
    let request = WorkerRequest::from_bytes(bytes)?;
    let elapsed_ms = |start: Instant| start.elapsed().as_millis() as u64;

    let response = match request.task() {
        Ok(task) => match offload_kernels::execute(&task) {
            Ok(output) => WorkerResponse::success(request.id, &output, elapsed_ms(start))?,
            Err(e) => WorkerResponse::failure(request.id, e.to_string(), elapsed_ms(start)),
        },
        Err(e) => WorkerResponse::failure(request.id, e.to_string(), elapsed_ms(start)),
    };
    Ok(response)
}
