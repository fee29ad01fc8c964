use offload_core::{QuantileBand, QuantileBandsPayload, QuantileBandsResult};
use rayon::prelude::*;

use crate::KernelError;

/// Exact quantile bands over per-step sample sets.
///
/// Each step is sorted and queried with linear interpolation between order
/// statistics. Steps are processed in parallel.
pub fn quantile_bands(payload: &QuantileBandsPayload) -> Result<QuantileBandsResult, KernelError> {
    if let Some(&q) = payload
        .quantiles
        .iter()
        .find(|q| !q.is_finite() || !(0.0..=1.0).contains(*q))
    {
        return Err(KernelError::InvalidQuantile(q));
    }
    for (i, step) in payload.samples.iter().enumerate() {
        if step.is_empty() {
            return Err(KernelError::EmptyInput(format!("quantile_bands: step {i} has no samples")));
        }
        if step.iter().any(|v| !v.is_finite()) {
            return Err(KernelError::NonFinite(format!("quantile_bands step {i}")));
        }
    }

    let per_step: Vec<Vec<f64>> = payload
        .samples
        .par_iter()
        .map(|step| {
            let mut sorted = step.clone();
            sorted.sort_by(f64::total_cmp);
            payload
                .quantiles
                .iter()
                .map(|&q| quantile_sorted(&sorted, q))
                .collect()
        })
        .collect();

    Ok(QuantileBandsResult {
        bands: transpose(&payload.quantiles, &per_step),
        fallback: false,
    })
}

/// Linearly interpolated quantile of an ascending, non-empty slice.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let h = (n - 1) as f64 * q;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Normal-approximation quantile bands: `mean + z(q) * stddev` per step.
///
/// Quantiles are clamped to `[0, 1]` (NaN reads as the median); 0 and 1 map
/// to the step's min and max. Empty steps yield 0.
pub fn quantile_bands_fallback(payload: &QuantileBandsPayload) -> QuantileBandsResult {
    let quantiles: Vec<f64> = payload
        .quantiles
        .iter()
        .map(|&q| if q.is_nan() { 0.5 } else { q.clamp(0.0, 1.0) })
        .collect();

    let per_step: Vec<Vec<f64>> = payload
        .samples
        .iter()
        .map(|step| {
            if step.is_empty() {
                return vec![0.0; quantiles.len()];
            }
            let n = step.len() as f64;
            let mean = step.iter().sum::<f64>() / n;
            let var = step.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let sd = var.sqrt();
            quantiles
                .iter()
                .map(|&q| {
                    if q <= 0.0 {
                        step.iter().copied().fold(f64::INFINITY, f64::min)
                    } else if q >= 1.0 {
                        step.iter().copied().fold(f64::NEG_INFINITY, f64::max)
                    } else {
                        mean + inverse_normal_cdf(q) * sd
                    }
                })
                .collect()
        })
        .collect();

    QuantileBandsResult {
        bands: transpose(&quantiles, &per_step),
        fallback: true,
    }
}

fn transpose(quantiles: &[f64], per_step: &[Vec<f64>]) -> Vec<QuantileBand> {
    quantiles
        .iter()
        .enumerate()
        .map(|(qi, &quantile)| QuantileBand {
            quantile,
            values: per_step.iter().map(|row| row[qi]).collect(),
        })
        .collect()
}

/// Standard normal quantile function for `p` in `(0, 1)` (Acklam's rational approximation).
pub fn inverse_normal_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolated_quantiles() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile_sorted(&sorted, 0.0), 1.0);
        assert_eq!(quantile_sorted(&sorted, 0.5), 3.0);
        assert_eq!(quantile_sorted(&sorted, 1.0), 5.0);
        assert!((quantile_sorted(&sorted, 0.1) - 1.4).abs() < 1e-12);
        assert_eq!(quantile_sorted(&[7.0], 0.9), 7.0);
    }

    #[test]
    fn bands_one_value_per_step() {
        let payload = QuantileBandsPayload {
            samples: vec![vec![3.0, 1.0, 2.0], vec![10.0, 30.0, 20.0]],
            quantiles: vec![0.0, 0.5, 1.0],
        };
        let result = quantile_bands(&payload).unwrap();

        assert_eq!(result.bands.len(), 3);
        assert_eq!(result.bands[1].quantile, 0.5);
        assert_eq!(result.bands[1].values, vec![2.0, 20.0]);
        assert_eq!(result.bands[0].values, vec![1.0, 10.0]);
        assert_eq!(result.bands[2].values, vec![3.0, 30.0]);
        assert!(!result.fallback);
    }

    #[test]
    fn accelerated_validates() {
        let bad_q = QuantileBandsPayload { samples: vec![vec![1.0]], quantiles: vec![1.5] };
        assert_eq!(quantile_bands(&bad_q), Err(KernelError::InvalidQuantile(1.5)));

        let empty_step = QuantileBandsPayload { samples: vec![vec![]], quantiles: vec![0.5] };
        assert!(matches!(quantile_bands(&empty_step), Err(KernelError::EmptyInput(_))));

        let inf = QuantileBandsPayload { samples: vec![vec![f64::INFINITY]], quantiles: vec![0.5] };
        assert!(matches!(quantile_bands(&inf), Err(KernelError::NonFinite(_))));
    }

    #[test]
    fn inverse_cdf_reference_points() {
        assert!(inverse_normal_cdf(0.5).abs() < 1e-9);
        assert!((inverse_normal_cdf(0.975) - 1.959964).abs() < 1e-3);
        assert!((inverse_normal_cdf(0.025) + 1.959964).abs() < 1e-3);
        assert!((inverse_normal_cdf(0.001) + 3.090232).abs() < 1e-3);
    }

    #[test]
    fn fallback_close_to_exact_for_symmetric_samples() {
        let step: Vec<f64> = (0..=100).map(|i| i as f64).collect();
        let payload = QuantileBandsPayload { samples: vec![step], quantiles: vec![0.5, 0.0, 1.0] };

        let fb = quantile_bands_fallback(&payload);
        assert!(fb.fallback);
        assert!((fb.bands[0].values[0] - 50.0).abs() < 1e-9);
        assert_eq!(fb.bands[1].values[0], 0.0);
        assert_eq!(fb.bands[2].values[0], 100.0);
    }

    #[test]
    fn fallback_never_fails() {
        let payload = QuantileBandsPayload {
            samples: vec![vec![], vec![2.0, 2.0]],
            quantiles: vec![f64::NAN, 7.0],
        };
        let fb = quantile_bands_fallback(&payload);
        assert_eq!(fb.bands[0].quantile, 0.5);
        assert_eq!(fb.bands[1].quantile, 1.0);
        assert_eq!(fb.bands[0].values, vec![0.0, 2.0]);
        assert_eq!(fb.bands[1].values, vec![0.0, 2.0]);
    }
}
