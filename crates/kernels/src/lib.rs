//! Numeric kernels behind each task kind.
//!
//! Every kind has two implementations: an accelerated one run by the
//! background worker ([`execute`]) and a synchronous fallback run inline by
//! the scheduler ([`execute_fallback`]). They agree approximately, not
//! bit-for-bit. The fallback is total and never fails.

pub mod blend;
pub mod downsample;
pub mod error;
pub mod quantile;

use offload_core::{TaskOutput, TaskPayload};

pub use error::KernelError;

/// Run the accelerated kernel for a task.
pub fn execute(task: &TaskPayload) -> Result<TaskOutput, KernelError> {
    let output = match task {
        TaskPayload::ForecastBlend(p) => TaskOutput::ForecastBlend(blend::blend(p)?),
        TaskPayload::QuantileBands(p) => TaskOutput::QuantileBands(quantile::quantile_bands(p)?),
        TaskPayload::Downsample(p) => TaskOutput::Downsample(downsample::downsample(p)?),
    };
    Ok(output)
}

/// Run the fallback kernel for a task.
pub fn execute_fallback(task: &TaskPayload) -> TaskOutput {
    match task {
        TaskPayload::ForecastBlend(p) => TaskOutput::ForecastBlend(blend::blend_fallback(p)),
        TaskPayload::QuantileBands(p) => TaskOutput::QuantileBands(quantile::quantile_bands_fallback(p)),
        TaskPayload::Downsample(p) => TaskOutput::Downsample(downsample::downsample_fallback(p)),
    }
}
