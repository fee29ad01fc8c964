use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tracing::info;

use super::core::{Session, TaskScheduler};
use super::events::{run_event_loop, run_health_check};
use crate::error::SchedulerError;
use crate::worker::WorkerSession;

impl TaskScheduler {
    /// Attach a worker session and start serving it.
    ///
    /// Replaces any existing session; the old worker is terminated and a task
    /// it was running goes back to the head of the queue. With worker
    /// dispatch disabled the session is dropped untouched.
    pub async fn init(&self, session: WorkerSession) -> Result<(), SchedulerError> {
        let inner = &self.inner;
        if !inner.config.worker_enabled {
            if inner.lock_state().destroyed {
                return Err(SchedulerError::Unavailable);
            }
            info!("worker dispatch disabled, not attaching worker session");
            return Ok(());
        }

        let WorkerSession { worker, events } = session;
        let worker_name = worker.name().to_string();

        let (previous, generation) = {
            let mut state = inner.lock_state();
            if state.destroyed {
                return Err(SchedulerError::Unavailable);
            }
            state.generation += 1;
            let generation = state.generation;

            let weak = Arc::downgrade(inner);
            let event_loop = tokio::spawn(run_event_loop(weak.clone(), generation, events));
            let health_check = tokio::spawn(run_health_check(
                weak,
                generation,
                inner.config.health_check_interval(),
            ));

            state.requeue_in_flight();
            let previous = state.session.replace(Session {
                worker,
                generation,
                healthy: true,
                last_heartbeat: Instant::now(),
                last_heartbeat_at: Utc::now(),
                event_loop,
                health_check,
            });
            (previous, generation)
        };

        if let Some(previous) = previous {
            previous.stop_loops();
            info!(worker = previous.worker.name(), "replacing worker session");
            previous.worker.terminate().await;
        }
        info!(worker = %worker_name, generation, "worker session attached");

        inner.process_queue().await;
        Ok(())
    }

    /// Reject every pending task with [`SchedulerError::Cancelled`] and stop
    /// all timers. Returns the number of tasks cancelled.
    pub fn clear_queue(&self) -> usize {
        let tasks = self.inner.lock_state().drain_all();
        let count = tasks.len();
        if count > 0 {
            self.inner.metrics_mut().cancellations += count as u64;
            info!(count, "cancelling pending tasks");
        }
        for task in tasks {
            let _ = task.responder.send(Err(SchedulerError::Cancelled(task.id)));
        }
        count
    }

    /// Cancel everything, release the worker and refuse all further work.
    /// Calling it again is a no-op.
    pub async fn destroy(&self) {
        let session = {
            let mut state = self.inner.lock_state();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.session.take()
        };

        let cancelled = self.clear_queue();
        if let Some(session) = session {
            session.stop_loops();
            session.worker.terminate().await;
        }
        info!(cancelled, "scheduler destroyed");
    }
}
