use dtw_kernel::SimError;

/// Alias for `Result<T, ModelError>`.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised by the logistics model and scenario loading.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// A kernel primitive rejected an argument.
    #[error(transparent)]
    Kernel(#[from] SimError),

    /// A speed, rate or other entity parameter is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A transfer can never complete, or was asked for a nonsensical amount.
    #[error("invalid transfer of {amount}: {reason}")]
    InvalidTransfer {
        /// The requested amount.
        amount: f64,
        /// Why the transfer was refused.
        reason: String,
    },

    /// Processor, origin and destination are not at the same place.
    #[error("{processor} is not co-located with {origin} and {destination}")]
    NotColocated {
        /// Name of the processor.
        processor: String,
        /// Name of the origin.
        origin: String,
        /// Name of the destination.
        destination: String,
    },

    /// A scenario refers to a name that was never defined.
    #[error("unknown {kind} '{name}'")]
    UnknownEntity {
        /// What kind of entity was expected ("site", "vessel"...).
        kind: &'static str,
        /// The unresolved name.
        name: String,
    },

    /// Two scenario entities share a name.
    #[error("duplicate name '{0}'")]
    DuplicateName(String),

    /// Scenario JSON could not be parsed.
    #[error("scenario parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// A scenario file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
