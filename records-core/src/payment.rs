//! Payment record and its status state machine
//!
//! ```text
//! pending ──► receipt_sent ──► under_review ──► approved ──► withdrawal_processing ──► paid
//!                                          └──► not_approved
//! ```
//!
//! Dynamic QR payments skip the receipt path and may move from `pending`
//! straight to `approved` or `not_approved` when the provider confirms.

use crate::{types::*, Error, Result, ValidationErrors};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Longest accepted observation, in characters
pub const MAX_OBSERVATION_CHARS: usize = 255;

impl PaymentStatus {
    /// Check if transition is valid for any transaction type
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;

        matches!(
            (self, next),
            | (Pending, ReceiptSent)
            | (ReceiptSent, UnderReview)
            | (UnderReview, Approved)
            | (UnderReview, NotApproved)
            | (Approved, WithdrawalProcessing)
            | (WithdrawalProcessing, Paid)
        )
    }

    /// Check if status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::NotApproved | PaymentStatus::Paid)
    }
}

impl TransactionType {
    /// Transition table for this payment type
    pub fn allows(&self, from: PaymentStatus, to: PaymentStatus) -> bool {
        use PaymentStatus::*;

        match self {
            TransactionType::Dynamic => {
                to != ReceiptSent
                    && (from.can_transition_to(to)
                        || matches!((from, to), (Pending, Approved) | (Pending, NotApproved)))
            }
            TransactionType::Static | TransactionType::Unset => from.can_transition_to(to),
        }
    }
}

/// A fiat collection record
///
/// Built only by [`crate::validate_payment`]; changed only through
/// [`Payment::transition`], which returns a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub(crate) id: String,
    pub(crate) store_id: String,
    pub(crate) amount: Decimal,
    pub(crate) transaction_type: TransactionType,
    pub(crate) status: PaymentStatus,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) email: Option<String>,
    pub(crate) observation: Option<String>,
    pub(crate) receipt: Option<String>,
    pub(crate) payer_name: Option<String>,
    pub(crate) qr_code_id: Option<String>,
    pub(crate) reference_id: Option<String>,
    pub(crate) due_date: Option<NaiveDate>,
    pub(crate) description: Option<String>,
    pub(crate) depix_address: Option<String>,
}

impl Payment {
    /// Opaque identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Owning merchant
    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    /// Amount in BRL
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// QR issuance type
    pub fn transaction_type(&self) -> TransactionType {
        self.transaction_type
    }

    /// Current status
    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    /// Creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last mutation time
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Payer e-mail
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Operator note
    pub fn observation(&self) -> Option<&str> {
        self.observation.as_deref()
    }

    /// Receipt evidence (binary as text)
    pub fn receipt(&self) -> Option<&str> {
        self.receipt.as_deref()
    }

    /// Payer name reported by the provider
    pub fn payer_name(&self) -> Option<&str> {
        self.payer_name.as_deref()
    }

    /// Provider QR identifier
    pub fn qr_code_id(&self) -> Option<&str> {
        self.qr_code_id.as_deref()
    }

    /// Merchant reference
    pub fn reference_id(&self) -> Option<&str> {
        self.reference_id.as_deref()
    }

    /// Due date
    pub fn due_date(&self) -> Option<NaiveDate> {
        self.due_date
    }

    /// Free-text description
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// DePix destination address
    pub fn depix_address(&self) -> Option<&str> {
        self.depix_address.as_deref()
    }

    /// Apply a status change
    ///
    /// Requesting the current status succeeds without touching the record.
    pub fn transition(
        &self,
        change: &PaymentTransition,
        now: DateTime<Utc>,
    ) -> Result<Transitioned<Payment>> {
        let from = self.status;
        let to = change.status;

        if from == to {
            return Ok(Transitioned::unchanged(self.clone()));
        }

        if from.is_terminal() {
            return Err(Error::TerminalStateViolation {
                state: from.to_string(),
            });
        }

        if to == PaymentStatus::ReceiptSent && self.transaction_type == TransactionType::Dynamic {
            return Err(Error::invalid_transition(
                from,
                to,
                "dynamic payments settle automatically and never hold a receipt",
            ));
        }

        if !self.transaction_type.allows(from, to) {
            return Err(Error::invalid_transition(
                from,
                to,
                format!(
                    "transition not allowed for {} payments",
                    self.transaction_type
                ),
            ));
        }

        let receipt = non_blank(change.receipt.as_deref());
        if to == PaymentStatus::ReceiptSent && receipt.is_none() {
            return Err(Error::MissingEvidence {
                to: to.to_string(),
                field: "receipt",
            });
        }

        if let Some(notes) = &change.notes {
            if notes.chars().count() > MAX_OBSERVATION_CHARS {
                return Err(ValidationErrors::single(
                    "notes",
                    format!("must be at most {} characters", MAX_OBSERVATION_CHARS),
                )
                .into());
            }
        }

        let mut next = self.clone();
        next.status = to;
        next.updated_at = now;
        if let Some(receipt) = receipt {
            next.receipt = Some(receipt.to_string());
        }
        if let Some(notes) = non_blank(change.notes.as_deref()) {
            next.observation = Some(notes.to_string());
        }
        if let Some(payer) = non_blank(change.payer_name.as_deref()) {
            next.payer_name = Some(payer.to_string());
        }

        Ok(Transitioned::changed(next))
    }
}

/// Requested status change for a payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTransition {
    /// Target status
    pub status: PaymentStatus,

    /// Operator note, replaces the observation
    #[serde(default)]
    pub notes: Option<String>,

    /// Receipt evidence, required when moving to `receipt_sent`
    #[serde(default)]
    pub receipt: Option<String>,

    /// Payer name reported with the change
    #[serde(default)]
    pub payer_name: Option<String>,
}

impl PaymentTransition {
    /// Change to `status` with no extra fields
    pub fn to(status: PaymentStatus) -> Self {
        Self {
            status,
            notes: None,
            receipt: None,
            payer_name: None,
        }
    }

    /// Attach receipt evidence
    pub fn with_receipt(mut self, receipt: impl Into<String>) -> Self {
        self.receipt = Some(receipt.into());
        self
    }

    /// Attach an operator note
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Attach the payer name
    pub fn with_payer_name(mut self, payer_name: impl Into<String>) -> Self {
        self.payer_name = Some(payer_name.into());
        self
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
