//! Error types for settlement engine

use thiserror::Error;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Price feed failed or returned an unusable quote
    #[error("Rate unavailable: {0}")]
    RateUnavailable(String),

    /// Record-level failure (validation, state machine)
    #[error("Record error: {0}")]
    Record(#[from] records_core::Error),

    /// Arithmetic or fee-split inconsistency
    #[error("Calculation error: {0}")]
    Calculation(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RateUnavailable(_))
    }
}
