use std::sync::{Arc, Weak};
use std::time::Duration;

use offload_core::{CodecError, Priority, TaskId, TaskPayload, WorkerRequest};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::core::{Inner, PendingTask, TaskScheduler};
use crate::error::SchedulerError;
use crate::telemetry::{TelemetryEvent, TASK_FALLBACK, TASK_SCHEDULED, TASK_TIMEOUT};
use crate::types::{ExecutedBy, FallbackReason, TaskOutcome};
use crate::worker::TaskWorker;

/// What `enqueue` decided under the lock.
enum Admission {
    Fallback(FallbackReason, TaskPayload),
    Queued {
        receiver: oneshot::Receiver<Result<TaskOutcome, SchedulerError>>,
        queue_length: usize,
    },
}

/// What `process_queue` should do next.
enum Dispatch {
    Idle,
    Fallback(Vec<PendingTask>, FallbackReason),
    Invalid(PendingTask, CodecError),
    Post {
        worker: Arc<dyn TaskWorker>,
        generation: u64,
        request: WorkerRequest,
    },
}

impl TaskScheduler {
    /// Schedule a task and wait for it to settle.
    ///
    /// With worker dispatch disabled, no healthy worker attached, or the
    /// scheduler destroyed, the fallback kernel runs inline and the call
    /// returns immediately.
    /// Otherwise the task is queued and the returned future resolves on worker
    /// success, worker failure, timeout or cancellation, whichever comes
    /// first. `timeout` defaults to the configured task timeout.
    pub async fn enqueue(
        &self,
        payload: TaskPayload,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> Result<TaskOutcome, SchedulerError> {
        let inner = &self.inner;
        let id = TaskId::new();
        let kind = payload.kind();
        let timeout = timeout.unwrap_or_else(|| inner.config.default_timeout());

        let admission = {
            let mut state = inner.lock_state();
            let route = if state.destroyed {
                Some(FallbackReason::Destroyed)
            } else if !inner.config.worker_enabled {
                Some(FallbackReason::Disabled)
            } else {
                match state.session.as_ref().map(|s| s.healthy) {
                    None => Some(FallbackReason::WorkerUnavailable),
                    Some(false) => Some(FallbackReason::WorkerUnhealthy),
                    Some(true) => None,
                }
            };

            match route {
                Some(reason) => Admission::Fallback(reason, payload),
                None => {
                    let max = inner.config.max_pending;
                    if max > 0 && state.tasks.len() >= max {
                        return Err(SchedulerError::QueueFull(state.tasks.len()));
                    }

                    let seq = state.next_seq;
                    state.next_seq += 1;
                    let (responder, receiver) = oneshot::channel();
                    state.queue.push(id, priority, seq);
                    state.tasks.insert(
                        id,
                        PendingTask {
                            id,
                            payload,
                            priority,
                            seq,
                            enqueued_at: Instant::now(),
                            timeout,
                            responder,
                        },
                    );
                    let timer = spawn_timer(Arc::downgrade(inner), id, timeout);
                    state.timers.insert(id, timer);

                    Admission::Queued {
                        receiver,
                        queue_length: state.queue.len(),
                    }
                }
            }
        };

        let scheduled = TelemetryEvent::new(TASK_SCHEDULED)
            .field("taskId", id.to_string())
            .field("kind", kind.as_str())
            .field("priority", priority.as_str())
            .field("timeoutMs", timeout.as_millis() as u64);

        match admission {
            Admission::Fallback(reason, payload) => {
                inner.emit(
                    scheduled
                        .field("route", "fallback")
                        .field("queueLength", 0),
                );
                Ok(inner.run_fallback(id, &payload, reason))
            }
            Admission::Queued {
                receiver,
                queue_length,
            } => {
                debug!(task_id = %id, kind = %kind, priority = priority.as_str(), queue_length, "task queued");
                inner.emit(
                    scheduled
                        .field("route", "worker")
                        .field("queueLength", queue_length),
                );

                inner.process_queue().await;

                // The responder is only dropped without a send if the
                // scheduler itself is torn down.
                receiver.await.unwrap_or(Err(SchedulerError::Cancelled(id)))
            }
        }
    }

    /// Schedule a task given its kind name and JSON body.
    ///
    /// Unknown kinds fail with [`SchedulerError::UnsupportedKind`] and bodies
    /// that do not match the kind with [`SchedulerError::InvalidPayload`];
    /// neither reaches the queue.
    pub async fn enqueue_raw(
        &self,
        kind: &str,
        body: serde_json::Value,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> Result<TaskOutcome, SchedulerError> {
        let payload = TaskPayload::from_parts(kind, body)?;
        self.enqueue(payload, priority, timeout).await
    }
}

fn spawn_timer(inner: Weak<Inner>, id: TaskId, timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if let Some(inner) = inner.upgrade() {
            inner.expire(id).await;
        }
    })
}

impl Inner {
    /// Dispatch the next queued task if the worker is idle.
    ///
    /// Called after every event that can free the worker slot or add work:
    /// enqueue, worker response, timeout and session attach.
    pub(super) async fn process_queue(&self) {
        loop {
            match self.next_dispatch() {
                Dispatch::Idle => return,
                Dispatch::Fallback(tasks, reason) => {
                    self.fallback_all(tasks, reason);
                    return;
                }
                Dispatch::Invalid(task, err) => {
                    warn!(task_id = %task.id, error = %err, "task payload could not be encoded");
                    let _ = task.responder.send(Err(err.into()));
                }
                Dispatch::Post {
                    worker,
                    generation,
                    request,
                } => {
                    let task_id = request.id;
                    if let Err(e) = worker.post(request).await {
                        warn!(task_id = %task_id, worker = worker.name(), error = %e, "failed to post task");
                        self.handle_transport_error(generation, &e.to_string());
                    }
                    return;
                }
            }
        }
    }

    fn next_dispatch(&self) -> Dispatch {
        let mut state = self.lock_state();
        if state.destroyed || state.in_flight.is_some() || state.queue.is_empty() {
            return Dispatch::Idle;
        }

        let route = state
            .session
            .as_ref()
            .map(|s| (s.healthy, s.worker.clone(), s.generation));
        let (worker, generation) = match route {
            Some((true, worker, generation)) => (worker, generation),
            Some((false, _, _)) => {
                return Dispatch::Fallback(state.drain_queued(), FallbackReason::WorkerUnhealthy);
            }
            None => {
                return Dispatch::Fallback(state.drain_queued(), FallbackReason::WorkerUnavailable);
            }
        };

        let Some(id) = state.queue.pop() else {
            return Dispatch::Idle;
        };
        let encoded = match state.tasks.get(&id) {
            Some(task) => {
                debug!(
                    task_id = %id,
                    kind = %task.payload.kind(),
                    waited_ms = task.enqueued_at.elapsed().as_millis() as u64,
                    "dispatching task to worker"
                );
                WorkerRequest::new(id, &task.payload, task.priority)
            }
            None => return Dispatch::Idle,
        };

        match encoded {
            Ok(request) => {
                state.in_flight = Some(id);
                Dispatch::Post {
                    worker,
                    generation,
                    request,
                }
            }
            Err(err) => match state.take_task(id) {
                Some(task) => Dispatch::Invalid(task, err),
                None => Dispatch::Idle,
            },
        }
    }

    /// Settle a task with a timeout error and free its slot.
    pub(super) async fn expire(&self, id: TaskId) {
        let expired = {
            let mut state = self.lock_state();
            state.timers.forget(id);
            let dispatched = state.in_flight == Some(id);
            state.take_task(id).map(|task| (task, dispatched))
        };
        let Some((task, dispatched)) = expired else {
            return;
        };

        let kind = task.payload.kind();
        self.metrics_mut().timeouts += 1;
        warn!(task_id = %id, kind = %kind, timeout = ?task.timeout, dispatched, "task timed out");
        self.emit(
            TelemetryEvent::new(TASK_TIMEOUT)
                .field("taskId", id.to_string())
                .field("kind", kind.as_str())
                .field("timeoutMs", task.timeout.as_millis() as u64)
                .field("dispatched", dispatched),
        );
        let _ = task.responder.send(Err(SchedulerError::Timeout {
            task_id: id,
            timeout: task.timeout,
        }));

        self.process_queue().await;
    }

    pub(super) fn fallback_all(&self, tasks: Vec<PendingTask>, reason: FallbackReason) {
        if tasks.is_empty() {
            return;
        }
        debug!(count = tasks.len(), reason = reason.as_str(), "routing tasks to fallback");
        for task in tasks {
            let outcome = self.run_fallback(task.id, &task.payload, reason);
            let _ = task.responder.send(Ok(outcome));
        }
    }

    /// Run a task's fallback kernel inline.
    pub(super) fn run_fallback(&self, id: TaskId, payload: &TaskPayload, reason: FallbackReason) -> TaskOutcome {
        let kind = payload.kind();
        let start = std::time::Instant::now();
        let output = offload_kernels::execute_fallback(payload);
        let elapsed = start.elapsed();

        self.metrics_mut().record_execution(kind, ExecutedBy::Fallback, elapsed);
        debug!(task_id = %id, kind = %kind, reason = reason.as_str(), ?elapsed, "task executed by fallback");
        self.emit(
            TelemetryEvent::new(TASK_FALLBACK)
                .field("taskId", id.to_string())
                .field("kind", kind.as_str())
                .field("reason", reason.as_str()),
        );

        TaskOutcome {
            task_id: id,
            kind,
            output,
            executed_by: ExecutedBy::Fallback,
            fallback_reason: Some(reason),
            processing_time_ms: elapsed.as_millis() as u64,
        }
    }
}
