use std::collections::BTreeMap;

use offload_core::{BlendResult, DataPoint, ForecastBlendPayload, ModelForecast};
use rayon::prelude::*;

/// Guards inverse-error weighting against a perfect (zero-error) model.
const ERROR_EPSILON: f64 = 1e-9;

/// Weighted ensemble of model forecasts.
///
/// Models are weighted by inverse error score when every model reports one,
/// equally otherwise. Series are aligned by timestamp; at each timestamp the
/// weights of the models present are renormalised, so ragged series blend
/// cleanly.
pub fn blend(payload: &ForecastBlendPayload) -> Result<BlendResult, crate::KernelError> {
    let forecasts = &payload.forecasts;
    if forecasts.is_empty() {
        return Err(crate::KernelError::EmptyInput("forecast_blend: no forecasts".into()));
    }

    if let Some(bad) = forecasts.par_iter().find_any(|f| !is_finite_model(f)) {
        return Err(crate::KernelError::NonFinite(format!("forecast for model '{}'", bad.model_id)));
    }

    let raw = raw_weights(forecasts);
    let total: f64 = raw.iter().sum();

    let mut weights: BTreeMap<String, f64> = BTreeMap::new();
    for (f, w) in forecasts.iter().zip(&raw) {
        *weights.entry(f.model_id.clone()).or_default() += w / total;
    }

    // timestamp -> (sum of weight * value, sum of weight)
    let mut aligned: BTreeMap<i64, (f64, f64)> = BTreeMap::new();
    for (f, &w) in forecasts.iter().zip(&raw) {
        for p in &f.points {
            let slot = aligned.entry(p.timestamp).or_insert((0.0, 0.0));
            slot.0 += w * p.value;
            slot.1 += w;
        }
    }

    let points = aligned
        .into_iter()
        .map(|(timestamp, (weighted, weight))| DataPoint::new(timestamp, weighted / weight))
        .collect();

    Ok(BlendResult {
        points,
        weights,
        fallback: false,
    })
}

fn is_finite_model(f: &ModelForecast) -> bool {
    f.error.map_or(true, |e| e.is_finite() && e >= 0.0) && f.points.iter().all(|p| p.value.is_finite())
}

fn raw_weights(forecasts: &[ModelForecast]) -> Vec<f64> {
    if forecasts.iter().all(|f| f.error.is_some()) {
        forecasts
            .iter()
            .map(|f| 1.0 / (f.error.unwrap_or_default() + ERROR_EPSILON))
            .collect()
    } else {
        vec![1.0; forecasts.len()]
    }
}

/// Equal-weight blend aligned by index.
///
/// Empty models are ignored, series are truncated to the shortest one, and
/// timestamps come from the first model. A single model passes through
/// unchanged with weight 1.0.
pub fn blend_fallback(payload: &ForecastBlendPayload) -> BlendResult {
    let models: Vec<&ModelForecast> = payload
        .forecasts
        .iter()
        .filter(|f| !f.points.is_empty())
        .collect();

    if models.is_empty() {
        return BlendResult {
            points: Vec::new(),
            weights: BTreeMap::new(),
            fallback: true,
        };
    }

    let weight = 1.0 / models.len() as f64;
    let len = models.iter().map(|m| m.points.len()).min().unwrap_or(0);

    let points = (0..len)
        .map(|i| {
            let value: f64 = models.iter().map(|m| m.points[i].value * weight).sum();
            DataPoint::new(models[0].points[i].timestamp, value)
        })
        .collect();

    let mut weights: BTreeMap<String, f64> = BTreeMap::new();
    for m in &models {
        *weights.entry(m.model_id.clone()).or_default() += weight;
    }

    BlendResult {
        points,
        weights,
        fallback: true,
    }
}
