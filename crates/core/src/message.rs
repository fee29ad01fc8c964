//! Wire-format messages exchanged with a background worker.
//!
//! Requests carry `{id, kind, payload, priority, timestamp}` and responses
//! carry `{taskId, success, result | error, processingTimeMs}`. Both are
//! encoded as camelCase JSON so any worker implementation (thread, process,
//! remote) can speak the same contract.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::task::{Priority, TaskId, TaskKind, TaskOutput, TaskPayload};

/// A task posted to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRequest {
    pub id: TaskId,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    pub priority: Priority,
    /// Dispatch time, epoch millis.
    pub timestamp: i64,
}

impl WorkerRequest {
    /// Encode a task for the worker. Payloads holding NaN or infinities are
    /// refused, since JSON would silently turn them into `null`.
    pub fn new(id: TaskId, task: &TaskPayload, priority: Priority) -> Result<Self, CodecError> {
        if let Some(field) = task.non_finite_field() {
            return Err(CodecError::NonFinite(field));
        }
        Ok(Self {
            id,
            kind: task.kind(),
            payload: task.body()?,
            priority,
            timestamp: Utc::now().timestamp_millis(),
        })
    }

    /// Decode the typed payload.
    pub fn task(&self) -> Result<TaskPayload, CodecError> {
        TaskPayload::from_kind(self.kind, self.payload.clone())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(CodecError::Serialize)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::Deserialize)
    }
}

/// The worker's answer for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResponse {
    pub task_id: TaskId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub processing_time_ms: u64,
}

impl WorkerResponse {
    pub fn success(task_id: TaskId, output: &TaskOutput, processing_time_ms: u64) -> Result<Self, CodecError> {
        Ok(Self {
            task_id,
            success: true,
            result: Some(output.body()?),
            error: None,
            processing_time_ms,
        })
    }

    pub fn failure(task_id: TaskId, error: impl Into<String>, processing_time_ms: u64) -> Self {
        Self {
            task_id,
            success: false,
            result: None,
            error: Some(error.into()),
            processing_time_ms,
        }
    }

    /// Decode the result body, expecting it to belong to `kind`.
    pub fn output(&self, kind: TaskKind) -> Result<TaskOutput, CodecError> {
        let body = self.result.clone().unwrap_or(serde_json::Value::Null);
        TaskOutput::from_kind(kind, body)
    }
}
