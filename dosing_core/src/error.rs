//! Error types for the dosing_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for dosing_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Parallel input columns of unequal length
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Insulin model descriptor that maps to no known curve
    #[error("Invalid insulin model: {0}")]
    InvalidModel(String),

    /// Schedule lookup with no entry covering the query time
    #[error("No schedule entry covers {0}")]
    NotFound(String),

    /// Input required to be in chronological order was not
    #[error("Unsorted input: {0}")]
    Unsorted(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Fail with `ShapeMismatch` unless every column has the same length.
pub(crate) fn ensure_same_len(what: &str, lens: &[usize]) -> Result<()> {
    match lens.first() {
        Some(first) if lens.iter().any(|l| l != first) => Err(Error::ShapeMismatch(format!(
            "{} columns have lengths {:?}",
            what, lens
        ))),
        _ => Ok(()),
    }
}
