use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use offload_core::{Priority, SchedulerConfig, TaskId, TaskPayload};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::queue::TaskQueue;
use super::timers::TimerRegistry;
use crate::error::SchedulerError;
use crate::metrics::SchedulerMetrics;
use crate::telemetry::{TelemetryEvent, TelemetrySink, TracingTelemetry};
use crate::types::{TaskOutcome, WorkerStatus};
use crate::worker::TaskWorker;

pub(crate) type Responder = oneshot::Sender<Result<TaskOutcome, SchedulerError>>;

/// Schedules compute tasks onto a single background worker, falling back to
/// inline computation whenever the worker is disabled, missing or unhealthy.
///
/// Cheap to clone; clones share one queue and one worker session.
#[derive(Clone)]
pub struct TaskScheduler {
    pub(super) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(super) config: SchedulerConfig,
    pub(super) telemetry: Arc<dyn TelemetrySink>,
    /// All task bookkeeping. Never held across an await point.
    pub(super) state: Mutex<SchedulerState>,
    pub(super) metrics: RwLock<SchedulerMetrics>,
}

/// A task tracked from enqueue until it settles.
pub(crate) struct PendingTask {
    pub(super) id: TaskId,
    pub(super) payload: TaskPayload,
    pub(super) priority: Priority,
    pub(super) seq: u64,
    pub(super) enqueued_at: Instant,
    pub(super) timeout: Duration,
    pub(super) responder: Responder,
}

/// An attached worker and the background loops serving it.
pub(crate) struct Session {
    pub(super) worker: Arc<dyn TaskWorker>,
    /// Distinguishes this session's events from those of a replaced one.
    pub(super) generation: u64,
    pub(super) healthy: bool,
    pub(super) last_heartbeat: Instant,
    pub(super) last_heartbeat_at: DateTime<Utc>,
    pub(super) event_loop: JoinHandle<()>,
    pub(super) health_check: JoinHandle<()>,
}

impl Session {
    pub(super) fn touch(&mut self) {
        self.last_heartbeat = Instant::now();
        self.last_heartbeat_at = Utc::now();
    }

    pub(super) fn stop_loops(&self) {
        self.event_loop.abort();
        self.health_check.abort();
    }
}

#[derive(Default)]
pub(crate) struct SchedulerState {
    pub(super) queue: TaskQueue,
    pub(super) tasks: HashMap<TaskId, PendingTask>,
    /// The one task currently posted to the worker.
    pub(super) in_flight: Option<TaskId>,
    pub(super) timers: TimerRegistry,
    pub(super) session: Option<Session>,
    pub(super) generation: u64,
    pub(super) destroyed: bool,
    pub(super) next_seq: u64,
}

impl SchedulerState {
    /// Remove a task from every tracking structure and stop its timer.
    pub(super) fn take_task(&mut self, id: TaskId) -> Option<PendingTask> {
        let task = self.tasks.remove(&id)?;
        self.queue.remove(task.priority, task.seq);
        self.timers.cancel(id);
        if self.in_flight == Some(id) {
            self.in_flight = None;
        }
        Some(task)
    }

    /// Take every queued task, leaving the dispatched one in place.
    pub(super) fn drain_queued(&mut self) -> Vec<PendingTask> {
        let ids = self.queue.drain();
        ids.into_iter().filter_map(|id| self.take_task(id)).collect()
    }

    /// Take every tracked task: the dispatched one first, then the queue in
    /// dispatch order.
    pub(super) fn drain_all(&mut self) -> Vec<PendingTask> {
        let mut drained = Vec::with_capacity(self.tasks.len());
        if let Some(task) = self.in_flight.and_then(|id| self.take_task(id)) {
            drained.push(task);
        }
        drained.extend(self.drain_queued());
        // Anything left is untracked by the queue; it still has to settle.
        let stray: Vec<TaskId> = self.tasks.keys().copied().collect();
        drained.extend(stray.into_iter().filter_map(|id| self.take_task(id)));
        self.timers.cancel_all();
        drained
    }

    /// Put the dispatched task back at the head of its tier.
    pub(super) fn requeue_in_flight(&mut self) {
        if let Some(id) = self.in_flight.take() {
            if let Some(task) = self.tasks.get(&id) {
                self.queue.push(id, task.priority, task.seq);
            }
        }
    }
}

impl TaskScheduler {
    /// Create a scheduler that reports telemetry through `tracing`.
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_telemetry(config, Arc::new(TracingTelemetry))
    }

    pub fn with_telemetry(config: SchedulerConfig, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                telemetry,
                state: Mutex::new(SchedulerState::default()),
                metrics: RwLock::new(SchedulerMetrics::default()),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Snapshot of worker health and queue state.
    pub fn status(&self) -> WorkerStatus {
        let state = self.inner.lock_state();
        let session = state.session.as_ref();
        let healthy = session.is_some_and(|s| s.healthy);
        WorkerStatus {
            available: !state.destroyed && self.inner.config.worker_enabled && healthy,
            healthy,
            destroyed: state.destroyed,
            worker_name: session.map(|s| s.worker.name().to_string()),
            current_task: state.in_flight,
            queue_length: state.queue.len(),
            pending_tasks: state.tasks.len(),
            active_timers: state.timers.len(),
            last_heartbeat: session.map(|s| s.last_heartbeat_at),
        }
    }

    /// Snapshot of the scheduler's counters.
    pub fn metrics(&self) -> SchedulerMetrics {
        self.inner
            .metrics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Inner {
    pub(super) fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(super) fn metrics_mut(&self) -> RwLockWriteGuard<'_, SchedulerMetrics> {
        self.metrics.write().unwrap_or_else(|e| e.into_inner())
    }

    pub(super) fn emit(&self, event: TelemetryEvent) {
        self.telemetry.emit(event);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = state.session.take() {
            session.stop_loops();
        }
        state.timers.cancel_all();
    }
}
