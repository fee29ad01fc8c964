//! Background task scheduling with an inline fallback.
//!
//! [`TaskScheduler`] dispatches compute tasks one at a time to a background
//! [`TaskWorker`], enforces a timeout per task, watches worker health, and
//! runs the synchronous fallback kernel whenever the worker is disabled,
//! missing or unhealthy. Every enqueued task settles exactly once.

pub mod error;
pub mod metrics;
pub mod service;
pub mod telemetry;
pub mod types;
pub mod worker;

pub use error::{SchedulerError, WorkerError};
pub use metrics::SchedulerMetrics;
pub use service::TaskScheduler;
pub use telemetry::{
    NoopTelemetry, RecordingTelemetry, TelemetryEvent, TelemetrySink, TracingTelemetry,
};
pub use types::{ExecutedBy, FallbackReason, TaskOutcome, WorkerStatus};
pub use worker::{
    SilentWorker, TaskWorker, ThreadWorker, WorkerEvent, WorkerEventSender, WorkerEvents,
    WorkerSession,
};
