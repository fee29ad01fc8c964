use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CodecError;

/// Unique identifier for a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Dispatch priority. Declaration order is dispatch order: `High` sorts first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

/// The closed set of computations the scheduler knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ForecastBlend,
    QuantileBands,
    Downsample,
}

impl TaskKind {
    pub const ALL: [TaskKind; 3] = [
        TaskKind::ForecastBlend,
        TaskKind::QuantileBands,
        TaskKind::Downsample,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::ForecastBlend => "forecast_blend",
            TaskKind::QuantileBands => "quantile_bands",
            TaskKind::Downsample => "downsample",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CodecError::UnsupportedKind(s.to_string()))
    }
}

// ── Payloads ──────────────────────────────────────────────────

/// A single timestamped observation or prediction (epoch millis).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: i64,
    pub value: f64,
}

impl DataPoint {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// One model's forecast series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelForecast {
    pub model_id: String,
    pub points: Vec<DataPoint>,
    /// Backtest error score (lower is better). Drives inverse-error weighting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastBlendPayload {
    pub forecasts: Vec<ModelForecast>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileBandsPayload {
    /// Sample sets, one per horizon step.
    pub samples: Vec<Vec<f64>>,
    /// Requested quantiles in `[0, 1]`.
    pub quantiles: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownsamplePayload {
    pub points: Vec<DataPoint>,
    /// Desired number of points in the reduced series.
    pub target: usize,
}

/// Task input, discriminated by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum TaskPayload {
    ForecastBlend(ForecastBlendPayload),
    QuantileBands(QuantileBandsPayload),
    Downsample(DownsamplePayload),
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::ForecastBlend(_) => TaskKind::ForecastBlend,
            TaskPayload::QuantileBands(_) => TaskKind::QuantileBands,
            TaskPayload::Downsample(_) => TaskKind::Downsample,
        }
    }

    /// Build a payload from a kind name and its untyped body.
    pub fn from_parts(kind: &str, body: serde_json::Value) -> Result<Self, CodecError> {
        let kind: TaskKind = kind.parse()?;
        Self::from_kind(kind, body)
    }

    pub fn from_kind(kind: TaskKind, body: serde_json::Value) -> Result<Self, CodecError> {
        let payload = match kind {
            TaskKind::ForecastBlend => {
                TaskPayload::ForecastBlend(serde_json::from_value(body).map_err(CodecError::Deserialize)?)
            }
            TaskKind::QuantileBands => {
                TaskPayload::QuantileBands(serde_json::from_value(body).map_err(CodecError::Deserialize)?)
            }
            TaskKind::Downsample => {
                TaskPayload::Downsample(serde_json::from_value(body).map_err(CodecError::Deserialize)?)
            }
        };
        Ok(payload)
    }

    /// The untyped body, without the kind tag.
    pub fn body(&self) -> Result<serde_json::Value, CodecError> {
        match self {
            TaskPayload::ForecastBlend(p) => serde_json::to_value(p),
            TaskPayload::QuantileBands(p) => serde_json::to_value(p),
            TaskPayload::Downsample(p) => serde_json::to_value(p),
        }
        .map_err(CodecError::Serialize)
    }

    /// Path of the first NaN or infinite number in the payload, if any.
    pub fn non_finite_field(&self) -> Option<String> {
        fn first_bad<'a>(values: impl IntoIterator<Item = &'a f64>) -> Option<usize> {
            values.into_iter().position(|v| !v.is_finite())
        }

        match self {
            TaskPayload::ForecastBlend(p) => p.forecasts.iter().enumerate().find_map(|(m, f)| {
                if f.error.is_some_and(|e| !e.is_finite()) {
                    return Some(format!("forecasts[{m}].error"));
                }
                first_bad(f.points.iter().map(|pt| &pt.value)).map(|i| format!("forecasts[{m}].points[{i}]"))
            }),
            TaskPayload::QuantileBands(p) => first_bad(&p.quantiles)
                .map(|i| format!("quantiles[{i}]"))
                .or_else(|| {
                    p.samples
                        .iter()
                        .enumerate()
                        .find_map(|(s, row)| first_bad(row).map(|i| format!("samples[{s}][{i}]")))
                }),
            TaskPayload::Downsample(p) => {
                first_bad(p.points.iter().map(|pt| &pt.value)).map(|i| format!("points[{i}]"))
            }
        }
    }
}

// ── Outputs ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendResult {
    pub points: Vec<DataPoint>,
    /// Normalised weight per model id.
    pub weights: BTreeMap<String, f64>,
    pub fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileBand {
    pub quantile: f64,
    /// One value per horizon step.
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileBandsResult {
    pub bands: Vec<QuantileBand>,
    pub fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownsampleResult {
    pub points: Vec<DataPoint>,
    pub fallback: bool,
}

/// Task result, discriminated by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "result", rename_all = "snake_case")]
pub enum TaskOutput {
    ForecastBlend(BlendResult),
    QuantileBands(QuantileBandsResult),
    Downsample(DownsampleResult),
}

impl TaskOutput {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskOutput::ForecastBlend(_) => TaskKind::ForecastBlend,
            TaskOutput::QuantileBands(_) => TaskKind::QuantileBands,
            TaskOutput::Downsample(_) => TaskKind::Downsample,
        }
    }

    /// Whether the result came from a fallback kernel.
    pub fn is_fallback(&self) -> bool {
        match self {
            TaskOutput::ForecastBlend(r) => r.fallback,
            TaskOutput::QuantileBands(r) => r.fallback,
            TaskOutput::Downsample(r) => r.fallback,
        }
    }

    /// Decode a result body that is expected to belong to `kind`.
    pub fn from_kind(kind: TaskKind, body: serde_json::Value) -> Result<Self, CodecError> {
        let output = match kind {
            TaskKind::ForecastBlend => {
                TaskOutput::ForecastBlend(serde_json::from_value(body).map_err(CodecError::Deserialize)?)
            }
            TaskKind::QuantileBands => {
                TaskOutput::QuantileBands(serde_json::from_value(body).map_err(CodecError::Deserialize)?)
            }
            TaskKind::Downsample => {
                TaskOutput::Downsample(serde_json::from_value(body).map_err(CodecError::Deserialize)?)
            }
        };
        Ok(output)
    }

    pub fn body(&self) -> Result<serde_json::Value, CodecError> {
        match self {
            TaskOutput::ForecastBlend(r) => serde_json::to_value(r),
            TaskOutput::QuantileBands(r) => serde_json::to_value(r),
            TaskOutput::Downsample(r) => serde_json::to_value(r),
        }
        .map_err(CodecError::Serialize)
    }
}
