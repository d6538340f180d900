//! Withdrawal record and its status state machine
//!
//! ```text
//! pending ──► processing ──► completed
//!    │             └───────► failed
//!    └─────────────────────► failed
//! ```
//!
//! `completed` requires a transaction id, `failed` requires a reason, and
//! leaving `pending` requires a destination wallet.

use crate::{types::*, Error, Payment, Result, ValidationErrors};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

impl WithdrawalStatus {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: WithdrawalStatus) -> bool {
        use WithdrawalStatus::*;

        matches!(
            (self, next),
            | (Pending, Processing)
            | (Pending, Failed)
            | (Processing, Completed)
            | (Processing, Failed)
        )
    }

    /// Check if status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, WithdrawalStatus::Completed | WithdrawalStatus::Failed)
    }
}

/// A request to move a merchant balance to an external wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    pub(crate) id: String,
    pub(crate) store_id: String,
    pub(crate) whitelabel_id: String,
    pub(crate) amount: Decimal,
    pub(crate) payment_ids: Vec<String>,
    pub(crate) status: WithdrawalStatus,
    pub(crate) destination_wallet: Option<String>,
    pub(crate) destination_wallet_type: Option<WalletType>,
    pub(crate) crypto_type: Option<CryptoType>,
    pub(crate) crypto_value: Option<Decimal>,
    pub(crate) tx_id: Option<String>,
    pub(crate) failed_reason: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) fees_detail: Option<FeeDetail>,
    pub(crate) lightning_invoice: Option<String>,
    pub(crate) lightning_expires_at: Option<DateTime<Utc>>,
}

impl Withdrawal {
    /// Identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Owning merchant
    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    /// Tenant on whose behalf the withdrawal is issued
    pub fn whitelabel_id(&self) -> &str {
        &self.whitelabel_id
    }

    /// Fiat amount in BRL
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Payments settled by this withdrawal, in batch order
    pub fn payment_ids(&self) -> &[String] {
        &self.payment_ids
    }

    /// Current status
    pub fn status(&self) -> WithdrawalStatus {
        self.status
    }

    /// Destination address, key or account
    pub fn destination_wallet(&self) -> Option<&str> {
        self.destination_wallet.as_deref()
    }

    /// Destination network
    pub fn destination_wallet_type(&self) -> Option<&WalletType> {
        self.destination_wallet_type.as_ref()
    }

    /// Destination asset
    pub fn crypto_type(&self) -> Option<CryptoType> {
        self.crypto_type
    }

    /// Equivalent amount quoted at request time
    pub fn crypto_value(&self) -> Option<Decimal> {
        self.crypto_value
    }

    /// Network transaction id (completed only)
    pub fn tx_id(&self) -> Option<&str> {
        self.tx_id.as_deref()
    }

    /// Failure reason (failed only)
    pub fn failed_reason(&self) -> Option<&str> {
        self.failed_reason.as_deref()
    }

    /// Creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Completion time (completed only)
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Attached fee breakdown
    pub fn fees_detail(&self) -> Option<&FeeDetail> {
        self.fees_detail.as_ref()
    }

    /// Lightning invoice for BRL settled over Lightning
    pub fn lightning_invoice(&self) -> Option<&str> {
        self.lightning_invoice.as_deref()
    }

    /// Lightning invoice expiry
    pub fn lightning_expires_at(&self) -> Option<DateTime<Utc>> {
        self.lightning_expires_at
    }

    /// Whether a destination is set
    pub fn has_destination(&self) -> bool {
        self.destination_wallet.is_some() && self.destination_wallet_type.is_some()
    }

    /// Build a pending withdrawal from a batch of approved payments
    pub fn batch(request: NewWithdrawal, payments: &[Payment], now: DateTime<Utc>) -> Result<Self> {
        let mut errors = ValidationErrors::new();

        if request.id.trim().is_empty() {
            errors.push("id", "is required");
        }
        if request.whitelabel_id.trim().is_empty() {
            errors.push("whitelabelId", "is required");
        }
        if payments.is_empty() {
            errors.push("paymentIds", "must contain at least one payment");
        }

        let mut seen = HashSet::new();
        for (idx, payment) in payments.iter().enumerate() {
            if !seen.insert(payment.id()) {
                errors.push(format!("paymentIds[{}]", idx), format!("duplicate payment {}", payment.id()));
            }
            if payment.status() != PaymentStatus::Approved {
                errors.push(
                    format!("paymentIds[{}]", idx),
                    format!("payment {} is {}, only approved payments can be withdrawn", payment.id(), payment.status()),
                );
            }
        }

        if !request.payment_ids.is_empty()
            && !request.payment_ids.iter().map(String::as_str).eq(payments.iter().map(Payment::id))
        {
            errors.push("paymentIds", "do not match the supplied payments");
        }

        let store_id = payments.first().map(|p| p.store_id().to_string()).unwrap_or_default();
        if payments.iter().any(|p| p.store_id() != store_id) {
            errors.push("paymentIds", "payments belong to more than one store");
        }

        let destination_wallet = request
            .destination_wallet
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty());
        if destination_wallet.is_some() != request.destination_wallet_type.is_some() {
            errors.push(
                "destinationWallet",
                "destinationWallet and destinationWalletType must be set together",
            );
        }

        if let Some(value) = request.crypto_value {
            if value <= Decimal::ZERO {
                errors.push("cryptoValue", "must be greater than zero");
            }
        }

        let amount = payments
            .iter()
            .try_fold(Decimal::ZERO, |total, p| total.checked_add(p.amount()));
        if amount.is_none() {
            errors.push("amount", "sum of payment amounts is out of range");
        }

        errors.into_result()?;
        let amount = amount.unwrap_or_default();

        tracing::debug!(
            withdrawal_id = %request.id,
            payments = payments.len(),
            %amount,
            "Batched withdrawal"
        );

        Ok(Self {
            id: request.id,
            store_id,
            whitelabel_id: request.whitelabel_id,
            amount,
            payment_ids: payments.iter().map(|p| p.id().to_string()).collect(),
            status: WithdrawalStatus::Pending,
            destination_wallet,
            destination_wallet_type: request.destination_wallet_type,
            crypto_type: request.crypto_type,
            crypto_value: request.crypto_value,
            tx_id: None,
            failed_reason: None,
            created_at: now,
            completed_at: None,
            fees_detail: None,
            lightning_invoice: None,
            lightning_expires_at: None,
        })
    }

    /// Replace the fee breakdown
    ///
    /// Only pending withdrawals are repriced.
    pub fn with_fees_detail(&self, fees: FeeDetail) -> Result<Self> {
        if self.status.is_terminal() {
            return Err(Error::TerminalStateViolation {
                state: self.status.to_string(),
            });
        }
        if self.status != WithdrawalStatus::Pending {
            return Err(Error::invalid_transition(
                self.status,
                self.status,
                "fees can only be recomputed while pending",
            ));
        }
        if !fees.split_holds() {
            return Err(ValidationErrors::single(
                "feesDetail",
                "whitelabelTotal must equal whitelabelNet + platformTotal",
            )
            .into());
        }

        let mut next = self.clone();
        next.fees_detail = Some(fees);
        Ok(next)
    }

    /// Apply a status change
    ///
    /// Requesting the current status succeeds without touching the record.
    pub fn transition(
        &self,
        change: &WithdrawalTransition,
        now: DateTime<Utc>,
    ) -> Result<Transitioned<Withdrawal>> {
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

        if !from.can_transition_to(to) {
            return Err(Error::invalid_transition(
                from,
                to,
                "transition not allowed by state machine",
            ));
        }

        if from == WithdrawalStatus::Pending && !self.has_destination() {
            return Err(Error::MissingEvidence {
                to: to.to_string(),
                field: "destinationWallet",
            });
        }

        let mut next = self.clone();
        next.status = to;

        match to {
            WithdrawalStatus::Completed => {
                let tx_id = non_blank(change.tx_id.as_deref()).ok_or(Error::MissingEvidence {
                    to: to.to_string(),
                    field: "txId",
                })?;
                next.tx_id = Some(tx_id.to_string());
                next.completed_at = Some(now);
            }
            WithdrawalStatus::Failed => {
                let reason = non_blank(change.failed_reason.as_deref()).ok_or(
                    Error::MissingEvidence {
                        to: to.to_string(),
                        field: "failedReason",
                    },
                )?;
                next.failed_reason = Some(reason.to_string());
            }
            WithdrawalStatus::Pending | WithdrawalStatus::Processing => {}
        }

        Ok(Transitioned::changed(next))
    }
}

/// Operator request to batch payments into a withdrawal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWithdrawal {
    /// Identifier assigned by the caller
    pub id: String,

    /// Tenant
    pub whitelabel_id: String,

    /// Payments to settle, in order
    pub payment_ids: Vec<String>,

    /// Destination address, key or account
    #[serde(default)]
    pub destination_wallet: Option<String>,

    /// Destination network
    #[serde(default)]
    pub destination_wallet_type: Option<WalletType>,

    /// Destination asset
    #[serde(default)]
    pub crypto_type: Option<CryptoType>,

    /// Equivalent amount quoted at request time
    #[serde(default)]
    pub crypto_value: Option<Decimal>,
}

/// Requested status change for a withdrawal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalTransition {
    /// Target status
    pub status: WithdrawalStatus,

    /// Transaction id, required for `completed`
    #[serde(default)]
    pub tx_id: Option<String>,

    /// Reason, required for `failed`
    #[serde(default)]
    pub failed_reason: Option<String>,
}

impl WithdrawalTransition {
    /// Move to `processing`
    pub fn processing() -> Self {
        Self {
            status: WithdrawalStatus::Processing,
            tx_id: None,
            failed_reason: None,
        }
    }

    /// Move to `completed` with the given transaction id
    pub fn completed(tx_id: impl Into<String>) -> Self {
        Self {
            status: WithdrawalStatus::Completed,
            tx_id: Some(tx_id.into()),
            failed_reason: None,
        }
    }

    /// Move to `failed` with the given reason
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: WithdrawalStatus::Failed,
            tx_id: None,
            failed_reason: Some(reason.into()),
        }
    }

    /// Change to `status` with no evidence attached
    pub fn to(status: WithdrawalStatus) -> Self {
        Self {
            status,
            tx_id: None,
            failed_reason: None,
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{validate_payment, validate_withdrawal};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn withdrawal(status: &str) -> Withdrawal {
        let mut raw = json!({
            "id": "wd-1",
            "storeId": "store-1",
            "whitelabelId": "wl-1",
            "amount": "1000.00",
            "paymentIds": ["pay-1", "pay-2"],
            "status": status,
            "destinationWallet": "bc1qexampleaddress",
            "destinationWalletType": "OnChainAddress",
            "createdAt": "2024-03-01T12:00:00Z",
        });
        match status {
            "completed" => {
                raw["txId"] = json!("abc123");
                raw["completedAt"] = json!("2024-03-01T13:00:00Z");
            }
            "failed" => raw["failedReason"] = json!("node offline"),
            _ => {}
        }
        validate_withdrawal(&raw).unwrap()
    }

    fn approved(id: &str, store: &str, amount: &str) -> Payment {
        validate_payment(&json!({
            "id": id,
            "storeId": store,
            "amount": amount,
            "transactionType": "dynamic",
            "status": "approved",
            "createdAt": "2024-03-01T12:00:00Z",
            "updatedAt": "2024-03-01T12:00:00Z",
        }))
        .unwrap()
    }

    fn now() -> DateTime<Utc> {
        "2024-03-05T10:00:00Z".parse().unwrap()
    }

    #[test]
    fn test_complete_flow_stamps_completed_at() {
        let w = withdrawal("pending");

        let processing = w.transition(&WithdrawalTransition::processing(), now()).unwrap();
        assert!(processing.changed);
        assert_eq!(processing.record.completed_at(), None);

        let done = processing
            .record
            .transition(&WithdrawalTransition::completed("txid-42"), now())
            .unwrap()
            .record;
        assert_eq!(done.status(), WithdrawalStatus::Completed);
        assert_eq!(done.tx_id(), Some("txid-42"));
        assert_eq!(done.completed_at(), Some(now()));
    }

    #[test]
    fn test_completion_requires_tx_id() {
        let w = withdrawal("processing");

        for tx in [None, Some("".to_string()), Some("  ".to_string())] {
            let change = WithdrawalTransition {
                status: WithdrawalStatus::Completed,
                tx_id: tx,
                failed_reason: None,
            };
            let err = w.transition(&change, now()).unwrap_err();
            assert!(matches!(err, Error::MissingEvidence { field: "txId", .. }));
        }
    }

    #[test]
    fn test_failure_requires_reason() {
        for status in ["pending", "processing"] {
            let w = withdrawal(status);
            let err = w
                .transition(&WithdrawalTransition::to(WithdrawalStatus::Failed), now())
                .unwrap_err();
            assert!(matches!(err, Error::MissingEvidence { field: "failedReason", .. }));

            let failed = w
                .transition(&WithdrawalTransition::failed("invalid address"), now())
                .unwrap()
                .record;
            assert_eq!(failed.failed_reason(), Some("invalid address"));
            assert_eq!(failed.completed_at(), None);
        }
    }

    #[test]
    fn test_completed_is_terminal() {
        let w = withdrawal("completed");

        for change in [
            WithdrawalTransition::to(WithdrawalStatus::Pending),
            WithdrawalTransition::processing(),
            WithdrawalTransition::failed("oops"),
        ] {
            let err = w.transition(&change, now()).unwrap_err();
            assert!(matches!(err, Error::TerminalStateViolation { .. }));
        }
    }

    #[test]
    fn test_failed_is_terminal() {
        let w = withdrawal("failed");
        let err = w.transition(&WithdrawalTransition::processing(), now()).unwrap_err();
        assert!(matches!(err, Error::TerminalStateViolation { .. }));
    }

    #[test]
    fn test_pending_cannot_complete_directly() {
        let w = withdrawal("pending");
        let err = w
            .transition(&WithdrawalTransition::completed("txid"), now())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[test]
    fn test_reentrant_completion_is_noop() {
        let w = withdrawal("completed");
        let step = w
            .transition(&WithdrawalTransition::completed("another-tx"), now())
            .unwrap();
        assert!(!step.changed);
        assert_eq!(step.record.tx_id(), Some("abc123"));
    }

    #[test]
    fn test_batch_sums_approved_payments() {
        let payments = vec![
            approved("pay-1", "store-9", "100.10"),
            approved("pay-2", "store-9", "899.90"),
        ];
        let request = NewWithdrawal {
            id: "wd-9".to_string(),
            whitelabel_id: "wl-1".to_string(),
            payment_ids: vec!["pay-1".to_string(), "pay-2".to_string()],
            destination_wallet: Some("TQexample".to_string()),
            destination_wallet_type: Some(WalletType::TronAddress),
            crypto_type: Some(CryptoType::USDT),
            crypto_value: None,
        };

        let w = Withdrawal::batch(request, &payments, now()).unwrap();
        assert_eq!(w.amount(), dec!(1000.00));
        assert_eq!(w.store_id(), "store-9");
        assert_eq!(w.payment_ids(), ["pay-1".to_string(), "pay-2".to_string()]);
        assert_eq!(w.status(), WithdrawalStatus::Pending);
    }

    #[test]
    fn test_batch_rejects_ineligible_payments() {
        let pending = validate_payment(&json!({
            "id": "pay-3",
            "storeId": "store-9",
            "amount": 10,
            "status": "pending",
            "createdAt": "2024-03-01T12:00:00Z",
            "updatedAt": "2024-03-01T12:00:00Z",
        }))
        .unwrap();
        let payments = vec![
            approved("pay-1", "store-9", "10"),
            approved("pay-1", "store-9", "10"),
            approved("pay-2", "store-7", "10"),
            pending,
        ];
        let request = NewWithdrawal {
            id: "wd-9".to_string(),
            whitelabel_id: "wl-1".to_string(),
            ..Default::default()
        };

        let err = Withdrawal::batch(request, &payments, now()).unwrap_err();
        let Error::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert!(errors.has_field("paymentIds[1]"));
        assert!(errors.has_field("paymentIds[3]"));
        assert!(errors.has_field("paymentIds"));
    }

    #[test]
    fn test_batch_rejects_overflowing_total() {
        let payments = vec![
            approved("pay-1", "store-9", "79228162514264337593543950335"),
            approved("pay-2", "store-9", "79228162514264337593543950335"),
        ];
        let request = NewWithdrawal {
            id: "wd-9".to_string(),
            whitelabel_id: "wl-1".to_string(),
            ..Default::default()
        };

        let err = Withdrawal::batch(request, &payments, now()).unwrap_err();
        let Error::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert!(errors.has_field("amount"));
    }

    #[test]
    fn test_batch_rejects_empty() {
        let request = NewWithdrawal {
            id: "wd-9".to_string(),
            whitelabel_id: "wl-1".to_string(),
            ..Default::default()
        };
        assert!(Withdrawal::batch(request, &[], now()).is_err());
    }

    #[test]
    fn test_leaving_pending_requires_destination() {
        let payments = vec![approved("pay-1", "store-9", "50")];
        let request = NewWithdrawal {
            id: "wd-10".to_string(),
            whitelabel_id: "wl-1".to_string(),
            ..Default::default()
        };
        let w = Withdrawal::batch(request, &payments, now()).unwrap();

        let err = w.transition(&WithdrawalTransition::processing(), now()).unwrap_err();
        assert!(matches!(err, Error::MissingEvidence { field: "destinationWallet", .. }));
    }
}
