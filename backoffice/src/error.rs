//! Error types for the back-office service

use crate::repository::RepositoryError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for back-office operations
pub type Result<T> = std::result::Result<T, Error>;

/// Back-office errors
#[derive(Error, Debug)]
pub enum Error {
    /// Validation or state machine refusal
    #[error("Record error: {0}")]
    Record(#[from] records_core::Error),

    /// Pricing failure (not a degraded quote)
    #[error("Settlement error: {0}")]
    Settlement(#[from] settlement::Error),

    /// Persistence boundary failure, propagated unchanged
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Webhook value differs from the payment amount
    #[error("Amount mismatch for QR {qr_id}: expected {expected}, received {received}")]
    AmountMismatch {
        /// Provider QR identifier
        qr_id: String,
        /// Payment amount
        expected: Decimal,
        /// Webhook value
        received: Decimal,
    },

    /// Webhook status with no payment counterpart
    #[error("Unknown webhook status: {0}")]
    UnknownWebhookStatus(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<records_core::ValidationErrors> for Error {
    fn from(errors: records_core::ValidationErrors) -> Self {
        Error::Record(errors.into())
    }
}
