use std::sync::Weak;
use std::time::Duration;

use offload_core::{TaskOutput, WorkerResponse};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::core::Inner;
use crate::error::SchedulerError;
use crate::telemetry::{TelemetryEvent, WORKER_UNHEALTHY};
use crate::types::{ExecutedBy, FallbackReason, TaskOutcome};
use crate::worker::{WorkerEvent, WorkerEvents};

/// Consume one session's events until the stream closes.
///
/// A closed stream means the worker is gone and is handled like a transport
/// error.
pub(super) async fn run_event_loop(inner: Weak<Inner>, generation: u64, mut events: WorkerEvents) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match event {
            WorkerEvent::Response(response) => {
                inner.handle_response(generation, response);
                inner.process_queue().await;
            }
            WorkerEvent::Heartbeat => inner.record_heartbeat(generation),
            WorkerEvent::Error(message) => inner.handle_transport_error(generation, &message),
        }
    }

    if let Some(inner) = inner.upgrade() {
        inner.handle_transport_error(generation, "worker event stream closed");
    }
}

/// Periodically compare time since the last worker signal with the
/// configured threshold.
pub(super) async fn run_health_check(inner: Weak<Inner>, generation: u64, period: Duration) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if !inner.check_health(generation) {
            return;
        }
    }
}

impl Inner {
    pub(super) fn record_heartbeat(&self, generation: u64) {
        let mut state = self.lock_state();
        if let Some(session) = state.session.as_mut().filter(|s| s.generation == generation) {
            session.touch();
        }
    }

    /// Settle the task a response belongs to. Responses for tasks that have
    /// already settled are dropped.
    pub(super) fn handle_response(&self, generation: u64, response: WorkerResponse) {
        let task = {
            let mut state = self.lock_state();
            match state.session.as_mut().filter(|s| s.generation == generation) {
                Some(session) => session.touch(),
                None => return,
            }
            state.take_task(response.task_id)
        };
        let Some(task) = task else {
            debug!(task_id = %response.task_id, "ignoring response for settled task");
            return;
        };

        let kind = task.payload.kind();
        let result: Result<TaskOutput, SchedulerError> = if response.success {
            response.output(kind).map_err(|e| SchedulerError::WorkerFailed {
                task_id: task.id,
                message: format!("unexpected result: {e}"),
            })
        } else {
            Err(SchedulerError::WorkerFailed {
                task_id: task.id,
                message: response
                    .error
                    .clone()
                    .unwrap_or_else(|| "worker reported failure".to_string()),
            })
        };

        match result {
            Ok(output) => {
                let elapsed = Duration::from_millis(response.processing_time_ms);
                self.metrics_mut()
                    .record_execution(kind, ExecutedBy::Worker, elapsed);
                debug!(task_id = %task.id, kind = %kind, processing_ms = response.processing_time_ms, "task completed by worker");
                let _ = task.responder.send(Ok(TaskOutcome {
                    task_id: task.id,
                    kind,
                    output,
                    executed_by: ExecutedBy::Worker,
                    fallback_reason: None,
                    processing_time_ms: response.processing_time_ms,
                }));
            }
            Err(e) => {
                self.metrics_mut().worker_failures += 1;
                warn!(task_id = %task.id, kind = %kind, error = %e, "worker failed task");
                let _ = task.responder.send(Err(e));
            }
        }
    }

    /// The session can no longer be trusted: mark it unhealthy and finish
    /// the dispatched task and everything queued through the fallback.
    pub(super) fn handle_transport_error(&self, generation: u64, message: &str) {
        let (was_healthy, worker_name, tasks) = {
            let mut state = self.lock_state();
            let Some(session) = state.session.as_mut().filter(|s| s.generation == generation) else {
                return;
            };
            let was_healthy = std::mem::replace(&mut session.healthy, false);
            let worker_name = session.worker.name().to_string();
            (was_healthy, worker_name, state.drain_all())
        };

        if was_healthy {
            self.metrics_mut().worker_faults += 1;
            warn!(worker = %worker_name, error = message, "worker transport error, switching to fallback");
            self.emit(
                TelemetryEvent::new(WORKER_UNHEALTHY)
                    .field("worker", worker_name)
                    .field("reason", FallbackReason::WorkerError.as_str())
                    .field("error", message),
            );
        }
        self.fallback_all(tasks, FallbackReason::WorkerError);
    }

    /// Returns false once the session is gone or replaced.
    pub(super) fn check_health(&self, generation: u64) -> bool {
        let threshold = self.config.heartbeat_threshold();
        let (worker_name, silent_for, tasks) = {
            let mut state = self.lock_state();
            let Some(session) = state.session.as_mut().filter(|s| s.generation == generation) else {
                return false;
            };
            let silent_for = session.last_heartbeat.elapsed();
            if !session.healthy || silent_for <= threshold {
                return true;
            }
            session.healthy = false;
            let worker_name = session.worker.name().to_string();
            (worker_name, silent_for, state.drain_queued())
        };

        self.metrics_mut().worker_faults += 1;
        warn!(worker = %worker_name, ?silent_for, ?threshold, "worker missed heartbeat, marking unhealthy");
        self.emit(
            TelemetryEvent::new(WORKER_UNHEALTHY)
                .field("worker", worker_name)
                .field("reason", FallbackReason::WorkerUnhealthy.as_str())
                .field("silentMs", silent_for.as_millis() as u64)
                .field("thresholdMs", threshold.as_millis() as u64),
        );
        if !tasks.is_empty() {
            info!(count = tasks.len(), "rerouting queued tasks to fallback");
        }
        self.fallback_all(tasks, FallbackReason::WorkerUnhealthy);
        true
    }
}
