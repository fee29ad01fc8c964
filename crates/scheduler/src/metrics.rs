use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use offload_core::TaskKind;
use serde::Serialize;

use crate::types::ExecutedBy;

/// Scheduler operational counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Tasks completed by the worker, per kind.
    pub worker_executions: HashMap<TaskKind, u64>,
    /// Tasks completed by the inline fallback, per kind.
    pub fallback_executions: HashMap<TaskKind, u64>,
    /// Average compute duration per kind, across both paths.
    pub avg_task_duration: HashMap<TaskKind, Duration>,
    pub timeouts: u64,
    pub worker_failures: u64,
    pub cancellations: u64,
    /// Worker sessions invalidated by transport errors or the health check.
    pub worker_faults: u64,
    pub last_completed: Option<DateTime<Utc>>,
}

impl SchedulerMetrics {
    /// Record a completed task.
    pub fn record_execution(&mut self, kind: TaskKind, executed_by: ExecutedBy, duration: Duration) {
        let counter = match executed_by {
            ExecutedBy::Worker => &mut self.worker_executions,
            ExecutedBy::Fallback => &mut self.fallback_executions,
        };
        *counter.entry(kind).or_default() += 1;
        self.last_completed = Some(Utc::now());

        let count = self.executions(kind);
        let prev_avg = self.avg_task_duration.get(&kind).copied().unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_task_duration.insert(kind, new_avg);
    }

    /// Completed executions of a kind on either path.
    pub fn executions(&self, kind: TaskKind) -> u64 {
        self.worker_executions.get(&kind).copied().unwrap_or(0)
            + self.fallback_executions.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_fallbacks(&self) -> u64 {
        self.fallback_executions.values().sum()
    }
}
