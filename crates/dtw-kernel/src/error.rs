/// Alias for `Result<T, SimError>`.
pub type SimResult<T> = Result<T, SimError>;

/// Errors raised synchronously by kernel operations.
///
/// Indefinite suspension on a container or resource is never an error;
/// these variants only cover programming and configuration mistakes.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimError {
    /// A capacity, level or slot count is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A timeout delay was negative, infinite or NaN.
    #[error("invalid delay: {0} (delays must be finite and non-negative)")]
    InvalidDelay(f64),

    /// A put/get amount was negative, infinite or NaN.
    #[error("invalid amount: {0} (amounts must be finite and non-negative)")]
    InvalidAmount(f64),
}
