use offload_core::{DataPoint, DownsamplePayload, DownsampleResult};
use rayon::prelude::*;

use crate::KernelError;

/// Largest-Triangle-Three-Buckets downsampling.
///
/// Keeps the first and last points and, for each bucket in between, the
/// point forming the largest triangle with the previously kept point and the
/// average of the next bucket. Input must be in ascending timestamp order.
pub fn downsample(payload: &DownsamplePayload) -> Result<DownsampleResult, KernelError> {
    let points = &payload.points;
    if let Some(i) = points.par_iter().position_any(|p| !p.value.is_finite()) {
        return Err(KernelError::NonFinite(format!("downsample point {i}")));
    }
    if let Some(i) = points.windows(2).position(|w| w[1].timestamp < w[0].timestamp) {
        return Err(KernelError::Unsorted(i + 1));
    }

    Ok(DownsampleResult {
        points: lttb(points, payload.target),
        fallback: false,
    })
}

/// LTTB over an already validated series.
pub fn lttb(points: &[DataPoint], threshold: usize) -> Vec<DataPoint> {
    let n = points.len();
    if threshold >= n || threshold < 3 {
        return points.to_vec();
    }

    let every = (n - 2) as f64 / (threshold - 2) as f64;
    let mut sampled = Vec::with_capacity(threshold);
    sampled.push(points[0]);

    let mut a = 0usize;
    for i in 0..threshold - 2 {
        let avg_start = ((i + 1) as f64 * every).floor() as usize + 1;
        let avg_end = (((i + 2) as f64 * every).floor() as usize + 1).min(n);
        let avg_range = &points[avg_start..avg_end];
        let avg_len = avg_range.len() as f64;
        let avg_x = avg_range.iter().map(|p| p.timestamp as f64).sum::<f64>() / avg_len;
        let avg_y = avg_range.iter().map(|p| p.value).sum::<f64>() / avg_len;

        let range_start = (i as f64 * every).floor() as usize + 1;
        let range_end = ((i + 1) as f64 * every).floor() as usize + 1;

        let ax = points[a].timestamp as f64;
        let ay = points[a].value;

        let mut max_area = -1.0;
        let mut next_a = range_start;
        for (j, p) in points.iter().enumerate().take(range_end).skip(range_start) {
            let area = ((ax - avg_x) * (p.value - ay) - (ax - p.timestamp as f64) * (avg_y - ay)).abs() * 0.5;
            if area > max_area {
                max_area = area;
                next_a = j;
            }
        }

        sampled.push(points[next_a]);
        a = next_a;
    }

    sampled.push(points[n - 1]);
    sampled
}

/// Bucket-average downsampling.
///
/// Keeps the first and last points and replaces each interior bucket with its
/// mean timestamp and mean value. Order and finiteness are not checked.
pub fn downsample_fallback(payload: &DownsamplePayload) -> DownsampleResult {
    let points = &payload.points;
    let n = points.len();
    let target = payload.target;
    if target >= n || target < 3 {
        return DownsampleResult {
            points: points.clone(),
            fallback: true,
        };
    }

    let interior = &points[1..n - 1];
    let buckets = target - 2;
    let size = interior.len() as f64 / buckets as f64;

    let mut out = Vec::with_capacity(target);
    out.push(points[0]);
    for b in 0..buckets {
        let start = (b as f64 * size).floor() as usize;
        let end = (((b + 1) as f64 * size).floor() as usize).clamp(start + 1, interior.len());
        let bucket = &interior[start..end];
        let len = bucket.len() as f64;
        let ts = bucket.iter().map(|p| p.timestamp as f64).sum::<f64>() / len;
        let value = bucket.iter().map(|p| p.value).sum::<f64>() / len;
        out.push(DataPoint::new(ts.round() as i64, value));
    }
    out.push(points[n - 1]);

    DownsampleResult {
        points: out,
        fallback: true,
    }
}
