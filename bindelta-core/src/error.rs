//! Error types for the diff engine.
//!
//! All user-facing failures are reported through [`DiffError`]. Invariant
//! violations inside the matching driver are not representable here; those
//! panic with a diagnostic because they indicate a loader or engine bug
//! rather than bad input.

use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, DiffError>;

/// Error categories surfaced by the engine.
#[derive(Error, Debug)]
pub enum DiffError {
    /// A serialized binary violates a structural invariant (dangling index,
    /// out-of-range table reference, malformed field).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The matching pipeline configuration is unusable, e.g. no steps left
    /// after filtering unknown names.
    #[error("configuration error: {0}")]
    Config(String),

    /// The caller requested cancellation. Fixed points accumulated so far
    /// remain valid.
    #[error("matching cancelled")]
    Cancelled,

    /// An internal invariant was violated during matching.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O failure while reading or writing an exchange file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON in an exchange file or configuration.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl DiffError {
    /// Builds an `InvalidInput` error from anything displayable.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        DiffError::InvalidInput(message.into())
    }
}
