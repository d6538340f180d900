//! Error types for payment and withdrawal records

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for record operations
pub type Result<T> = std::result::Result<T, Error>;

/// A single offending field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Field path (`amount`, `paymentIds[2]`, `feesDetail.feeAmount`)
    pub field: String,

    /// Human-readable reason
    pub reason: String,
}

impl ValidationError {
    /// Create new validation error
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Every field a payload violated, in the order they were checked
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    /// Empty collection
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Collection holding one error
    pub fn single(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self(vec![ValidationError::new(field, reason)])
    }

    /// Record a violation
    pub fn push(&mut self, field: impl Into<String>, reason: impl Into<String>) {
        self.0.push(ValidationError::new(field, reason));
    }

    /// Merge another collection, prefixing its paths
    pub fn extend_prefixed(&mut self, prefix: &str, other: ValidationErrors) {
        for err in other.0 {
            self.0.push(ValidationError {
                field: format!("{}.{}", prefix, err.field),
                reason: err.reason,
            });
        }
    }

    /// No violations recorded
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of violations
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate violations
    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    /// Whether a given field path was reported
    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    /// `Ok(())` when empty, otherwise `Err(self)`
    pub fn into_result(self) -> std::result::Result<(), ValidationErrors> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Consume into the underlying list
    pub fn into_vec(self) -> Vec<ValidationError> {
        self.0
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Record errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Payload or field-level validation failed
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    /// Status change not permitted by the state machine
    #[error("Invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        /// Current status
        from: String,
        /// Requested status
        to: String,
        /// Why the change was refused
        reason: String,
    },

    /// Transition attempted without its required evidence field
    #[error("Missing evidence for transition to {to}: {field} is required")]
    MissingEvidence {
        /// Requested status
        to: String,
        /// Field that must be supplied
        field: &'static str,
    },

    /// Mutation of a record that already reached a terminal status
    #[error("Record is terminal in status {state}; create a new record instead")]
    TerminalStateViolation {
        /// Terminal status the record is in
        state: String,
    },
}

impl Error {
    /// Shorthand for an [`Error::InvalidTransition`]
    pub fn invalid_transition(
        from: impl fmt::Display,
        to: impl fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.into(),
        }
    }
}
