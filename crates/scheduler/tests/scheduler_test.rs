//! Integration tests for task scheduling against hand-driven workers.
//!
//! `ManualWorker` records every posted request and lets the test decide
//! when (and how) the worker answers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

use offload_core::{
    DataPoint, DownsamplePayload, Priority, QuantileBandsPayload, SchedulerConfig, TaskId,
    TaskKind, TaskOutput, TaskPayload, WorkerRequest, WorkerResponse,
};
use offload_scheduler::telemetry::{TASK_FALLBACK, TASK_SCHEDULED, TASK_TIMEOUT, WORKER_UNHEALTHY};
use offload_scheduler::{
    ExecutedBy, FallbackReason, RecordingTelemetry, SchedulerError, SilentWorker, TaskOutcome,
    TaskScheduler, TaskWorker, WorkerError, WorkerEvent, WorkerEventSender, WorkerSession,
};

const WAIT: Duration = Duration::from_secs(5);
const LONG: Option<Duration> = Some(Duration::from_secs(30));

// ── Test workers ─────────────────────────────────────────────────

struct ManualWorker {
    posted: Mutex<Vec<WorkerRequest>>,
    events: WorkerEventSender,
    terminated: AtomicUsize,
}

impl ManualWorker {
    fn session() -> (Arc<ManualWorker>, WorkerSession) {
        let (tx, rx) = WorkerSession::channel();
        let worker = Arc::new(ManualWorker {
            posted: Mutex::new(Vec::new()),
            events: tx,
            terminated: AtomicUsize::new(0),
        });
        (worker.clone(), WorkerSession::new(worker, rx))
    }

    fn posted(&self) -> Vec<WorkerRequest> {
        self.posted.lock().unwrap().clone()
    }

    async fn wait_for_posts(&self, n: usize) -> Vec<WorkerRequest> {
        timeout(WAIT, async {
            loop {
                let posted = self.posted();
                if posted.len() >= n {
                    return posted;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("worker never received enough posts")
    }

    /// Answer a request the way a real worker would.
    fn complete(&self, request: &WorkerRequest) {
        let task = request.task().unwrap();
        let output = offload_kernels::execute(&task).unwrap();
        let response = WorkerResponse::success(request.id, &output, 3).unwrap();
        self.events.send(WorkerEvent::Response(response)).unwrap();
    }

    fn fail(&self, request: &WorkerRequest, message: &str) {
        let response = WorkerResponse::failure(request.id, message, 1);
        self.events.send(WorkerEvent::Response(response)).unwrap();
    }

    fn break_transport(&self) {
        self.events
            .send(WorkerEvent::Error("pipe closed".into()))
            .unwrap();
    }
}

#[async_trait]
impl TaskWorker for ManualWorker {
    fn name(&self) -> &str {
        "manual"
    }

    async fn post(&self, request: WorkerRequest) -> Result<(), WorkerError> {
        self.posted.lock().unwrap().push(request);
        Ok(())
    }

    async fn terminate(&self) {
        self.terminated.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fails the test if the scheduler touches it at all.
struct UntouchableWorker;

#[async_trait]
impl TaskWorker for UntouchableWorker {
    fn name(&self) -> &str {
        panic!("worker name read while dispatch is disabled")
    }

    async fn post(&self, _request: WorkerRequest) -> Result<(), WorkerError> {
        panic!("task posted while dispatch is disabled")
    }

    async fn terminate(&self) {
        panic!("worker terminated while dispatch is disabled")
    }
}

// ── Helpers ──────────────────────────────────────────────────────

fn downsample(n: i64) -> TaskPayload {
    TaskPayload::Downsample(DownsamplePayload {
        points: (0..n).map(|i| DataPoint::new(i * 1_000, (i as f64).sin())).collect(),
        target: 5,
    })
}

fn bands() -> TaskPayload {
    TaskPayload::QuantileBands(QuantileBandsPayload {
        samples: vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]],
        quantiles: vec![0.1, 0.5, 0.9],
    })
}

fn spawn_enqueue(
    scheduler: &TaskScheduler,
    payload: TaskPayload,
    priority: Priority,
    task_timeout: Option<Duration>,
) -> JoinHandle<Result<TaskOutcome, SchedulerError>> {
    let s = scheduler.clone();
    tokio::spawn(async move { s.enqueue(payload, priority, task_timeout).await })
}

async fn wait_for_pending(scheduler: &TaskScheduler, n: usize) {
    timeout(WAIT, async {
        while scheduler.status().pending_tasks < n {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("tasks never became pending");
}

async fn attached(config: SchedulerConfig) -> (TaskScheduler, Arc<ManualWorker>, Arc<RecordingTelemetry>) {
    let telemetry = Arc::new(RecordingTelemetry::new());
    let scheduler = TaskScheduler::with_telemetry(config, telemetry.clone());
    let (worker, session) = ManualWorker::session();
    scheduler.init(session).await.unwrap();
    (scheduler, worker, telemetry)
}

// ── Tests ────────────────────────────────────────────────────────

#[tokio::test]
async fn silent_worker_task_times_out() {
    let telemetry = Arc::new(RecordingTelemetry::new());
    let scheduler = TaskScheduler::with_telemetry(SchedulerConfig::default(), telemetry.clone());
    let (worker, session) = SilentWorker::session("silent");
    scheduler.init(session).await.unwrap();

    let started = Instant::now();
    let err = scheduler
        .enqueue(downsample(20), Priority::Medium, Some(Duration::from_millis(100)))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout(), "expected timeout, got {err:?}");
    assert!(elapsed >= Duration::from_millis(95), "settled too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "settled too late: {elapsed:?}");
    assert_eq!(worker.posted(), 1);

    let status = scheduler.status();
    assert_eq!(status.queue_length, 0);
    assert_eq!(status.pending_tasks, 0);
    assert_eq!(status.active_timers, 0);
    assert_eq!(status.current_task, None);

    assert_eq!(scheduler.metrics().timeouts, 1);
    assert_eq!(telemetry.count(TASK_TIMEOUT), 1);
}

#[tokio::test]
async fn destroy_rejects_pending_and_falls_back_afterwards() {
    let scheduler = TaskScheduler::new(SchedulerConfig::default());
    let (worker, session) = SilentWorker::session("silent");
    scheduler.init(session).await.unwrap();

    let first = spawn_enqueue(&scheduler, downsample(20), Priority::Medium, LONG);
    wait_for_pending(&scheduler, 1).await;
    let second = spawn_enqueue(&scheduler, bands(), Priority::Medium, LONG);
    wait_for_pending(&scheduler, 2).await;

    scheduler.destroy().await;

    assert!(first.await.unwrap().unwrap_err().is_cancelled());
    assert!(second.await.unwrap().unwrap_err().is_cancelled());

    let status = scheduler.status();
    assert_eq!(status.queue_length, 0);
    assert_eq!(status.pending_tasks, 0);
    assert!(status.destroyed);

    let outcome = scheduler
        .enqueue(downsample(20), Priority::High, None)
        .await
        .unwrap();
    assert!(outcome.is_fallback());
    assert_eq!(outcome.fallback_reason, Some(FallbackReason::Destroyed));
    match outcome.output {
        TaskOutput::Downsample(result) => {
            assert!(result.fallback);
            assert_eq!(result.points.len(), 5);
        }
        other => panic!("unexpected output {other:?}"),
    }

    assert_eq!(worker.posted(), 1);
    assert_eq!(scheduler.status().pending_tasks, 0);
    assert_eq!(scheduler.metrics().cancellations, 2);
}

#[tokio::test]
async fn queued_task_times_out_while_worker_busy() {
    let (scheduler, worker, telemetry) = attached(SchedulerConfig::default()).await;

    let first = spawn_enqueue(&scheduler, downsample(20), Priority::Medium, LONG);
    let posted = worker.wait_for_posts(1).await;

    let err = scheduler
        .enqueue(bands(), Priority::High, Some(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "got {err:?}");

    let status = scheduler.status();
    assert_eq!(status.queue_length, 0);
    assert_eq!(status.pending_tasks, 1);
    assert_eq!(status.active_timers, 1);
    assert_eq!(status.current_task, Some(posted[0].id));

    let timeouts = telemetry.named(TASK_TIMEOUT);
    assert_eq!(timeouts.len(), 1);
    assert_eq!(timeouts[0].get("dispatched"), Some(&json!(false)));

    worker.complete(&posted[0]);
    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome.executed_by, ExecutedBy::Worker);
    assert_eq!(worker.posted().len(), 1);

    let status = scheduler.status();
    assert_eq!(status.pending_tasks, 0);
    assert_eq!(status.active_timers, 0);
}

#[tokio::test]
async fn one_task_at_a_time_in_priority_order() {
    let (scheduler, worker, _) = attached(SchedulerConfig::default()).await;

    let first = spawn_enqueue(&scheduler, downsample(10), Priority::Low, LONG);
    worker.wait_for_posts(1).await;

    let low = spawn_enqueue(&scheduler, downsample(11), Priority::Low, LONG);
    wait_for_pending(&scheduler, 2).await;
    let medium = spawn_enqueue(&scheduler, downsample(12), Priority::Medium, LONG);
    wait_for_pending(&scheduler, 3).await;
    let high_a = spawn_enqueue(&scheduler, downsample(13), Priority::High, LONG);
    wait_for_pending(&scheduler, 4).await;
    let high_b = spawn_enqueue(&scheduler, downsample(14), Priority::High, LONG);
    wait_for_pending(&scheduler, 5).await;

    // Still only the first task dispatched.
    assert_eq!(worker.posted().len(), 1);
    assert_eq!(scheduler.status().queue_length, 4);

    let mut completed = 0;
    for expected_points in [10, 13, 14, 12, 11] {
        let posted = worker.wait_for_posts(completed + 1).await;
        assert_eq!(posted.len(), completed + 1, "more than one task dispatched");
        let request = &posted[completed];
        let task = request.task().unwrap();
        match task {
            TaskPayload::Downsample(p) => assert_eq!(p.points.len(), expected_points),
            other => panic!("unexpected task {other:?}"),
        }
        assert_eq!(scheduler.status().current_task, Some(request.id));
        worker.complete(request);
        completed += 1;
    }

    for handle in [first, high_a, high_b, medium, low] {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.executed_by, ExecutedBy::Worker);
        assert!(!outcome.output.is_fallback());
    }
    assert_eq!(scheduler.metrics().worker_executions[&TaskKind::Downsample], 5);
    assert_eq!(scheduler.status().pending_tasks, 0);
}

#[tokio::test]
async fn transport_error_falls_back_for_everything() {
    let (scheduler, worker, telemetry) = attached(SchedulerConfig::default()).await;

    let dispatched = spawn_enqueue(&scheduler, downsample(20), Priority::Medium, LONG);
    worker.wait_for_posts(1).await;
    let queued_a = spawn_enqueue(&scheduler, bands(), Priority::High, LONG);
    let queued_b = spawn_enqueue(&scheduler, downsample(30), Priority::Low, LONG);
    wait_for_pending(&scheduler, 3).await;

    worker.break_transport();

    for handle in [dispatched, queued_a, queued_b] {
        let outcome = timeout(WAIT, handle).await.unwrap().unwrap().unwrap();
        assert_eq!(outcome.executed_by, ExecutedBy::Fallback);
        assert_eq!(outcome.fallback_reason, Some(FallbackReason::WorkerError));
        assert!(outcome.output.is_fallback());
    }

    let status = scheduler.status();
    assert!(!status.healthy);
    assert_eq!(status.pending_tasks, 0);
    assert_eq!(status.active_timers, 0);
    assert_eq!(worker.posted().len(), 1);
    assert_eq!(scheduler.metrics().worker_faults, 1);
    assert_eq!(telemetry.count(WORKER_UNHEALTHY), 1);
    assert_eq!(telemetry.count(TASK_FALLBACK), 3);

    // Later work skips the broken worker.
    let later = scheduler.enqueue(bands(), Priority::High, None).await.unwrap();
    assert_eq!(later.fallback_reason, Some(FallbackReason::WorkerUnhealthy));
    assert_eq!(worker.posted().len(), 1);

    // A fresh session restores dispatch.
    let (fresh, session) = ManualWorker::session();
    scheduler.init(session).await.unwrap();
    assert!(scheduler.status().healthy);
    assert_eq!(worker.terminated.load(Ordering::SeqCst), 1);

    let handle = spawn_enqueue(&scheduler, downsample(8), Priority::Medium, LONG);
    let posted = fresh.wait_for_posts(1).await;
    fresh.complete(&posted[0]);
    assert_eq!(handle.await.unwrap().unwrap().executed_by, ExecutedBy::Worker);
}

#[tokio::test]
async fn disabled_dispatch_never_touches_worker() {
    let scheduler = TaskScheduler::new(SchedulerConfig::disabled());
    let (_tx, rx) = WorkerSession::channel();
    scheduler
        .init(WorkerSession::new(Arc::new(UntouchableWorker), rx))
        .await
        .unwrap();

    for payload in [downsample(50), bands()] {
        let outcome = scheduler.enqueue(payload, Priority::High, None).await.unwrap();
        assert_eq!(outcome.fallback_reason, Some(FallbackReason::Disabled));
    }
    let outcome = scheduler
        .enqueue_raw(
            "forecast_blend",
            json!({ "forecasts": [{ "modelId": "m", "points": [{ "timestamp": 1, "value": 2.0 }] }] }),
            Priority::Low,
            None,
        )
        .await
        .unwrap();
    assert!(outcome.is_fallback());

    assert_eq!(scheduler.metrics().total_fallbacks(), 3);
    scheduler.destroy().await;
}

#[tokio::test]
async fn worker_failure_only_affects_its_task() {
    let (scheduler, worker, _) = attached(SchedulerConfig::default()).await;

    let failing = spawn_enqueue(&scheduler, downsample(20), Priority::Medium, LONG);
    worker.wait_for_posts(1).await;
    let sibling = spawn_enqueue(&scheduler, bands(), Priority::Medium, LONG);
    wait_for_pending(&scheduler, 2).await;

    let posted = worker.posted();
    worker.fail(&posted[0], "kernel exploded");

    match failing.await.unwrap() {
        Err(SchedulerError::WorkerFailed { task_id, message }) => {
            assert_eq!(task_id, posted[0].id);
            assert_eq!(message, "kernel exploded");
        }
        other => panic!("expected worker failure, got {other:?}"),
    }

    let posted = worker.wait_for_posts(2).await;
    worker.complete(&posted[1]);
    let outcome = sibling.await.unwrap().unwrap();
    assert_eq!(outcome.kind, TaskKind::QuantileBands);
    assert_eq!(outcome.executed_by, ExecutedBy::Worker);

    assert!(scheduler.status().healthy);
    assert_eq!(scheduler.metrics().worker_failures, 1);
}

#[tokio::test]
async fn result_of_wrong_kind_is_a_failure() {
    let (scheduler, worker, _) = attached(SchedulerConfig::default()).await;

    let handle = spawn_enqueue(&scheduler, downsample(20), Priority::Medium, LONG);
    let posted = worker.wait_for_posts(1).await;

    let wrong = offload_kernels::execute(&bands()).unwrap();
    let response = WorkerResponse::success(posted[0].id, &wrong, 1).unwrap();
    worker.events.send(WorkerEvent::Response(response)).unwrap();

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, SchedulerError::WorkerFailed { .. }), "got {err:?}");
}

#[tokio::test]
async fn clear_queue_cancels_everything() {
    let scheduler = TaskScheduler::new(SchedulerConfig::default());
    let (_worker, session) = SilentWorker::session("silent");
    scheduler.init(session).await.unwrap();

    let handles: Vec<_> = (0..3)
        .map(|i| spawn_enqueue(&scheduler, downsample(10 + i), Priority::Medium, LONG))
        .collect();
    wait_for_pending(&scheduler, 3).await;

    assert_eq!(scheduler.clear_queue(), 3);
    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert!(!err.is_timeout());
    }

    let status = scheduler.status();
    assert_eq!(status.queue_length, 0);
    assert_eq!(status.pending_tasks, 0);
    assert_eq!(status.active_timers, 0);
    assert!(!status.destroyed);
    assert_eq!(scheduler.metrics().cancellations, 3);
    assert_eq!(scheduler.clear_queue(), 0);
}

#[tokio::test]
async fn unknown_kind_and_bad_payload_are_rejected_up_front() {
    let (scheduler, worker, telemetry) = attached(SchedulerConfig::default()).await;

    let err = scheduler
        .enqueue_raw("fft", json!({}), Priority::Medium, None)
        .await
        .unwrap_err();
    assert_eq!(err, SchedulerError::UnsupportedKind("fft".into()));

    let err = scheduler
        .enqueue_raw("downsample", json!({ "points": "nope" }), Priority::Medium, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidPayload(_)), "got {err:?}");

    assert!(worker.posted().is_empty());
    assert_eq!(telemetry.count(TASK_SCHEDULED), 0);
    assert_eq!(scheduler.status().pending_tasks, 0);
}

#[tokio::test]
async fn non_finite_values_never_reach_the_worker() {
    let (scheduler, worker, _) = attached(SchedulerConfig::default()).await;

    let poisoned = TaskPayload::QuantileBands(QuantileBandsPayload {
        samples: vec![vec![1.0, f64::NAN, 3.0]],
        quantiles: vec![0.5],
    });
    let err = scheduler.enqueue(poisoned, Priority::High, LONG).await.unwrap_err();
    match err {
        SchedulerError::InvalidPayload(message) => {
            assert!(message.contains("non-finite"), "got {message}");
        }
        other => panic!("expected invalid payload, got {other:?}"),
    }

    let status = scheduler.status();
    assert_eq!(status.pending_tasks, 0);
    assert_eq!(status.active_timers, 0);
    assert!(status.healthy);
    assert!(worker.posted().is_empty());

    // The slot is free for the next task.
    let handle = spawn_enqueue(&scheduler, downsample(12), Priority::Medium, LONG);
    let posted = worker.wait_for_posts(1).await;
    worker.complete(&posted[0]);
    assert_eq!(handle.await.unwrap().unwrap().executed_by, ExecutedBy::Worker);
}

#[tokio::test]
async fn bounded_queue_rejects_overflow() {
    let config = SchedulerConfig {
        max_pending: 2,
        ..SchedulerConfig::default()
    };
    let (scheduler, worker, _) = attached(config).await;

    let a = spawn_enqueue(&scheduler, downsample(10), Priority::Medium, LONG);
    let b = spawn_enqueue(&scheduler, downsample(11), Priority::Medium, LONG);
    wait_for_pending(&scheduler, 2).await;

    let err = scheduler.enqueue(bands(), Priority::High, None).await.unwrap_err();
    assert_eq!(err, SchedulerError::QueueFull(2));

    let first = worker.wait_for_posts(1).await;
    worker.complete(&first[0]);
    let second = worker.wait_for_posts(2).await;
    worker.complete(&second[1]);
    assert!(a.await.unwrap().is_ok());
    assert!(b.await.unwrap().is_ok());
}

#[tokio::test]
async fn missed_heartbeats_mark_worker_unhealthy() {
    let config = SchedulerConfig {
        heartbeat_threshold_ms: 50,
        health_check_interval_ms: 10,
        ..SchedulerConfig::default()
    };
    let telemetry = Arc::new(RecordingTelemetry::new());
    let scheduler = TaskScheduler::with_telemetry(config, telemetry.clone());
    let (worker, session) = SilentWorker::session("silent");
    scheduler.init(session).await.unwrap();

    let dispatched = spawn_enqueue(&scheduler, downsample(20), Priority::Medium, Some(Duration::from_millis(500)));
    timeout(WAIT, async {
        while worker.posted() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
    let queued = spawn_enqueue(&scheduler, bands(), Priority::Medium, LONG);

    // The queued task is rerouted once the health check fires.
    let outcome = timeout(WAIT, queued).await.unwrap().unwrap().unwrap();
    assert_eq!(outcome.fallback_reason, Some(FallbackReason::WorkerUnhealthy));

    // The dispatched task is left to its own timeout.
    let err = timeout(WAIT, dispatched).await.unwrap().unwrap().unwrap_err();
    assert!(err.is_timeout());

    let status = scheduler.status();
    assert!(!status.healthy);
    assert!(!status.available);
    assert_eq!(worker.posted(), 1);
    assert_eq!(telemetry.count(WORKER_UNHEALTHY), 1);
    assert_eq!(scheduler.metrics().worker_faults, 1);
}

#[tokio::test]
async fn late_response_is_ignored() {
    let (scheduler, worker, _) = attached(SchedulerConfig::default()).await;

    let handle = spawn_enqueue(&scheduler, downsample(20), Priority::Medium, Some(Duration::from_millis(50)));
    let posted = worker.wait_for_posts(1).await;
    assert!(handle.await.unwrap().unwrap_err().is_timeout());

    worker.complete(&posted[0]);
    worker
        .events
        .send(WorkerEvent::Response(WorkerResponse::failure(TaskId::new(), "stray", 0)))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let metrics = scheduler.metrics();
    assert_eq!(metrics.executions(TaskKind::Downsample), 0);
    assert_eq!(metrics.worker_failures, 0);
    assert!(scheduler.status().healthy);
}

#[tokio::test]
async fn scheduled_tasks_emit_telemetry() {
    let (scheduler, worker, telemetry) = attached(SchedulerConfig::default()).await;

    let handle = spawn_enqueue(&scheduler, bands(), Priority::High, LONG);
    let posted = worker.wait_for_posts(1).await;
    worker.complete(&posted[0]);
    let outcome = handle.await.unwrap().unwrap();

    let scheduled = telemetry.named(TASK_SCHEDULED);
    assert_eq!(scheduled.len(), 1);
    let event = &scheduled[0];
    assert_eq!(event.get("taskId"), Some(&json!(outcome.task_id.to_string())));
    assert_eq!(event.get("kind"), Some(&json!("quantile_bands")));
    assert_eq!(event.get("priority"), Some(&json!("high")));
    assert_eq!(event.get("route"), Some(&json!("worker")));
    assert_eq!(telemetry.count(TASK_FALLBACK), 0);

    match outcome.output {
        TaskOutput::QuantileBands(result) => {
            assert_eq!(result.bands.len(), 3);
            assert_eq!(result.bands[1].values, vec![2.0, 5.0]);
        }
        other => panic!("unexpected output {other:?}"),
    }
}
