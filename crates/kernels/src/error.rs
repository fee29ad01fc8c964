/// Validation failures from the accelerated kernels.
///
/// Fallback kernels never return these: they accept any input and degrade.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KernelError {
    #[error("empty input: {0}")]
    EmptyInput(String),
    #[error("non-finite value in {0}")]
    NonFinite(String),
    #[error("quantile {0} outside [0, 1]")]
    InvalidQuantile(f64),
    #[error("timestamps not ascending at index {0}")]
    Unsorted(usize),
}
