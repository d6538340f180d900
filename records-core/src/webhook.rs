//! Payment-provider webhook payload

use crate::{Payment, PaymentStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Status notification pushed by the PIX provider for a QR code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    /// Provider QR identifier (matches `Payment.qrCodeId`)
    pub qr_id: String,

    /// Provider status
    pub status: String,

    /// Name of the payer
    #[serde(default)]
    pub payer_name: String,

    /// Paid value in BRL cents
    pub value_in_cents: i64,

    /// Bank transaction id
    #[serde(default)]
    pub bank_tx_id: Option<String>,

    /// On-chain transaction id
    #[serde(default, rename = "blockchainTxID")]
    pub blockchain_tx_id: Option<String>,

    /// PIX key that received the funds
    #[serde(default)]
    pub pix_key: Option<String>,

    /// QR expiration
    #[serde(default)]
    pub expiration: Option<String>,

    /// Tenant
    #[serde(default)]
    pub whitelabel_id: Option<String>,
}

impl WebhookPayload {
    /// Paid value in BRL
    pub fn amount(&self) -> Decimal {
        Decimal::new(self.value_in_cents, 2)
    }

    /// Whether the paid value equals the payment amount
    pub fn matches_amount(&self, payment: &Payment) -> bool {
        self.amount() == payment.amount()
    }

    /// Canonical payment status for the provider status, if known
    pub fn payment_status(&self) -> Option<PaymentStatus> {
        match self.status.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(PaymentStatus::Pending),
            "under_review" => Some(PaymentStatus::UnderReview),
            "depix_sent" | "paid" | "approved" => Some(PaymentStatus::Approved),
            "canceled" | "cancelled" | "expired" | "error" | "refunded" | "rejected" => {
                Some(PaymentStatus::NotApproved)
            }
            _ => None,
        }
    }
}
