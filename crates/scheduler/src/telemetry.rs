//! Telemetry events emitted by the scheduler.
//!
//! Each event is a name plus a flat key/value record. Sinks decide where it
//! goes: the tracing log, nowhere, or an in-memory buffer for inspection.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::{Map, Value};

// ── Event names ──────────────────────────────────────────────────────

/// A task was accepted, either into the worker queue or straight to the
/// fallback.
pub const TASK_SCHEDULED: &str = "worker_task_scheduled";

/// A task was executed by the inline fallback.
pub const TASK_FALLBACK: &str = "worker_task_fallback";

/// A task exceeded its timeout.
pub const TASK_TIMEOUT: &str = "worker_task_timeout";

/// The worker session was marked unhealthy.
pub const WORKER_UNHEALTHY: &str = "worker_unhealthy";

// ── Event ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryEvent {
    pub name: String,
    pub fields: Map<String, Value>,
}

impl TelemetryEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Map::new(),
        }
    }

    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

// ── Sinks ────────────────────────────────────────────────────────────

/// Destination for telemetry events. Must not block.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for Arc<T> {
    fn emit(&self, event: TelemetryEvent) {
        (**self).emit(event)
    }
}

/// Forwards events to the `tracing` log at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn emit(&self, event: TelemetryEvent) {
        tracing::info!(
            target: "offload::telemetry",
            event = %event.name,
            fields = %serde_json::Value::Object(event.fields),
            "telemetry"
        );
    }
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn emit(&self, _event: TelemetryEvent) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Events with the given name, oldest first.
    pub fn named(&self, name: &str) -> Vec<TelemetryEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.name == name)
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.named(name).len()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn emit(&self, event: TelemetryEvent) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}
