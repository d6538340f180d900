//! Persistence boundary
//!
//! The traits describe what the service needs from storage. Ordering of
//! concurrent updates to one record is the implementation's concern; the
//! in-memory store applies them last-write-wins under a lock.

use async_trait::async_trait;
use parking_lot::RwLock;
use records_core::{
    Payment, PaymentStatus, PaymentTransition, Transitioned, Withdrawal, WithdrawalStatus,
    WithdrawalTransition,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Default page size
pub const DEFAULT_PAGE_LIMIT: usize = 20;

/// Largest page a caller may request
pub const MAX_PAGE_LIMIT: usize = 100;

/// Repository errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    /// No record with this id
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Record kind
        entity: &'static str,
        /// Requested id
        id: String,
    },

    /// The store refused the status change
    #[error("{0}")]
    InvalidTransition(records_core::Error),

    /// The store requires an evidence field
    #[error("{0}")]
    MissingEvidence(records_core::Error),

    /// The record already reached a terminal status
    #[error("{0}")]
    TerminalStateViolation(records_core::Error),

    /// The change carried invalid fields
    #[error("{0}")]
    Validation(records_core::Error),

    /// Record conflicts with stored state (duplicate id, payment already batched)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Opaque backend failure
    #[error("Backend error: {0}")]
    Backend(String),
}

impl RepositoryError {
    /// Payment not found
    pub fn payment_not_found(id: impl Into<String>) -> Self {
        RepositoryError::NotFound {
            entity: "payment",
            id: id.into(),
        }
    }

    /// Withdrawal not found
    pub fn withdrawal_not_found(id: impl Into<String>) -> Self {
        RepositoryError::NotFound {
            entity: "withdrawal",
            id: id.into(),
        }
    }
}

impl From<records_core::Error> for RepositoryError {
    fn from(e: records_core::Error) -> Self {
        match e {
            records_core::Error::MissingEvidence { .. } => RepositoryError::MissingEvidence(e),
            records_core::Error::TerminalStateViolation { .. } => {
                RepositoryError::TerminalStateViolation(e)
            }
            records_core::Error::Validation(_) => RepositoryError::Validation(e),
            records_core::Error::InvalidTransition { .. } => RepositoryError::InvalidTransition(e),
        }
    }
}

/// Payment list filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PaymentFilter {
    /// Only this status
    pub status: Option<PaymentStatus>,
    /// Only this merchant
    pub store_id: Option<String>,
    /// 1-based page
    pub page: Option<usize>,
    /// Page size
    pub limit: Option<usize>,
}

impl PaymentFilter {
    fn matches(&self, payment: &Payment) -> bool {
        self.status.map_or(true, |s| payment.status() == s)
            && self.store_id.as_deref().map_or(true, |s| payment.store_id() == s)
    }
}

/// Withdrawal list filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WithdrawalFilter {
    /// Only this status
    pub status: Option<WithdrawalStatus>,
    /// Only this merchant
    pub store_id: Option<String>,
    /// Only this tenant
    pub whitelabel_id: Option<String>,
    /// 1-based page
    pub page: Option<usize>,
    /// Page size
    pub limit: Option<usize>,
}

impl WithdrawalFilter {
    fn matches(&self, withdrawal: &Withdrawal) -> bool {
        self.status.map_or(true, |s| withdrawal.status() == s)
            && self.store_id.as_deref().map_or(true, |s| withdrawal.store_id() == s)
            && self
                .whitelabel_id
                .as_deref()
                .map_or(true, |w| withdrawal.whitelabel_id() == w)
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    /// Records on this page
    pub data: Vec<T>,
    /// Matching records across all pages
    pub total: usize,
    /// 1-based page number
    pub page: usize,
    /// Page size
    pub limit: usize,
}

impl<T> Page<T> {
    /// Slice `items` (already filtered and ordered)
    pub fn paginate(items: Vec<T>, page: Option<usize>, limit: Option<usize>) -> Self {
        let page = page.unwrap_or(1).max(1);
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
        let total = items.len();
        let data = items
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .collect();

        Self {
            data,
            total,
            page,
            limit,
        }
    }
}

/// Payment storage
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Filtered page, newest first
    async fn list_payments(&self, filter: &PaymentFilter) -> Result<Page<Payment>, RepositoryError>;

    /// Single payment
    async fn get_payment(&self, id: &str) -> Result<Payment, RepositoryError>;

    /// Apply and persist a status change
    ///
    /// `changed` is false when the stored record already satisfied the change.
    async fn update_payment_status(
        &self,
        id: &str,
        change: &PaymentTransition,
    ) -> Result<Transitioned<Payment>, RepositoryError>;

    /// Payment owning a provider QR code
    async fn find_payment_by_qr_id(&self, qr_id: &str) -> Result<Payment, RepositoryError>;
}

/// Withdrawal storage
#[async_trait]
pub trait WithdrawalRepository: Send + Sync {
    /// Filtered page, newest first
    async fn list_withdrawals(
        &self,
        filter: &WithdrawalFilter,
    ) -> Result<Page<Withdrawal>, RepositoryError>;

    /// Single withdrawal
    async fn get_withdrawal(&self, id: &str) -> Result<Withdrawal, RepositoryError>;

    /// Apply and persist a status change
    ///
    /// `changed` is false when the stored record already satisfied the change.
    async fn update_withdrawal_status(
        &self,
        id: &str,
        change: &WithdrawalTransition,
    ) -> Result<Transitioned<Withdrawal>, RepositoryError>;

    /// Store a new withdrawal
    ///
    /// Refuses payments already held by a non-failed withdrawal.
    async fn insert_withdrawal(&self, withdrawal: Withdrawal) -> Result<Withdrawal, RepositoryError>;
}

/// In-process store
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    payments: RwLock<HashMap<String, Payment>>,
    withdrawals: RwLock<HashMap<String, Withdrawal>>,
}

impl InMemoryRepository {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or replace a payment
    pub fn insert_payment(&self, payment: Payment) {
        self.payments
            .write()
            .insert(payment.id().to_string(), payment);
    }
}

#[async_trait]
impl PaymentRepository for InMemoryRepository {
    async fn list_payments(&self, filter: &PaymentFilter) -> Result<Page<Payment>, RepositoryError> {
        let mut matching: Vec<Payment> = self
            .payments
            .read()
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });

        Ok(Page::paginate(matching, filter.page, filter.limit))
    }

    async fn get_payment(&self, id: &str) -> Result<Payment, RepositoryError> {
        self.payments
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::payment_not_found(id))
    }

    async fn update_payment_status(
        &self,
        id: &str,
        change: &PaymentTransition,
    ) -> Result<Transitioned<Payment>, RepositoryError> {
        let mut payments = self.payments.write();
        let current = payments
            .get(id)
            .ok_or_else(|| RepositoryError::payment_not_found(id))?;

        let step = current.transition(change, chrono::Utc::now())?;
        if step.changed {
            payments.insert(id.to_string(), step.record.clone());
        }

        debug!(payment_id = %id, status = %step.record.status(), changed = step.changed, "Stored payment");
        Ok(step)
    }

    async fn find_payment_by_qr_id(&self, qr_id: &str) -> Result<Payment, RepositoryError> {
        self.payments
            .read()
            .values()
            .find(|p| p.qr_code_id() == Some(qr_id))
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "payment",
                id: format!("qrId={}", qr_id),
            })
    }
}

#[async_trait]
impl WithdrawalRepository for InMemoryRepository {
    async fn list_withdrawals(
        &self,
        filter: &WithdrawalFilter,
    ) -> Result<Page<Withdrawal>, RepositoryError> {
        let mut matching: Vec<Withdrawal> = self
            .withdrawals
            .read()
            .values()
            .filter(|w| filter.matches(w))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });

        Ok(Page::paginate(matching, filter.page, filter.limit))
    }

    async fn get_withdrawal(&self, id: &str) -> Result<Withdrawal, RepositoryError> {
        self.withdrawals
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::withdrawal_not_found(id))
    }

    async fn update_withdrawal_status(
        &self,
        id: &str,
        change: &WithdrawalTransition,
    ) -> Result<Transitioned<Withdrawal>, RepositoryError> {
        let mut withdrawals = self.withdrawals.write();
        let current = withdrawals
            .get(id)
            .ok_or_else(|| RepositoryError::withdrawal_not_found(id))?;

        let step = current.transition(change, chrono::Utc::now())?;
        if step.changed {
            withdrawals.insert(id.to_string(), step.record.clone());
        }

        debug!(withdrawal_id = %id, status = %step.record.status(), changed = step.changed, "Stored withdrawal");
        Ok(step)
    }

    async fn insert_withdrawal(&self, withdrawal: Withdrawal) -> Result<Withdrawal, RepositoryError> {
        let mut withdrawals = self.withdrawals.write();

        if withdrawals.contains_key(withdrawal.id()) {
            return Err(RepositoryError::Conflict(format!(
                "withdrawal {} already exists",
                withdrawal.id()
            )));
        }

        for existing in withdrawals
            .values()
            .filter(|w| w.status() != WithdrawalStatus::Failed)
        {
            if let Some(taken) = withdrawal
                .payment_ids()
                .iter()
                .find(|id| existing.payment_ids().contains(id))
            {
                return Err(RepositoryError::Conflict(format!(
                    "payment {} already belongs to withdrawal {}",
                    taken,
                    existing.id()
                )));
            }
        }

        withdrawals.insert(withdrawal.id().to_string(), withdrawal.clone());
        Ok(withdrawal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use records_core::{validate_payment, NewWithdrawal};
    use serde_json::json;

    fn payment(id: &str, created: &str, status: &str) -> Payment {
        validate_payment(&json!({
            "id": id,
            "storeId": "store-1",
            "amount": "100.00",
            "status": status,
            "qrCodeId": format!("qr-{}", id),
            "createdAt": created,
            "updatedAt": created,
        }))
        .unwrap()
    }

    fn withdrawal(id: &str, payments: &[Payment]) -> Withdrawal {
        Withdrawal::batch(
            NewWithdrawal {
                id: id.to_string(),
                whitelabel_id: "wl-1".to_string(),
                destination_wallet: Some("bc1qexample".to_string()),
                destination_wallet_type: Some(records_core::WalletType::OnChainAddress),
                ..Default::default()
            },
            payments,
            chrono::Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_newest_first_with_pages() {
        let repo = InMemoryRepository::new();
        repo.insert_payment(payment("a", "2024-01-01T00:00:00Z", "pending"));
        repo.insert_payment(payment("b", "2024-01-03T00:00:00Z", "pending"));
        repo.insert_payment(payment("c", "2024-01-02T00:00:00Z", "approved"));

        let filter = PaymentFilter {
            limit: Some(2),
            ..Default::default()
        };
        let page = repo.list_payments(&filter).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.limit, 2);
        let ids: Vec<&str> = page.data.iter().map(Payment::id).collect();
        assert_eq!(ids, vec!["b", "c"]);

        let second = repo
            .list_payments(&PaymentFilter {
                page: Some(2),
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(second.data.len(), 1);
        assert_eq!(second.data[0].id(), "a");

        let approved = repo
            .list_payments(&PaymentFilter {
                status: Some(PaymentStatus::Approved),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(approved.total, 1);
    }

    #[tokio::test]
    async fn test_update_maps_domain_errors() {
        let repo = InMemoryRepository::new();
        repo.insert_payment(payment("a", "2024-01-01T00:00:00Z", "pending"));

        let missing = repo
            .update_payment_status("a", &PaymentTransition::to(PaymentStatus::ReceiptSent))
            .await
            .unwrap_err();
        assert!(matches!(missing, RepositoryError::MissingEvidence(_)));

        let invalid = repo
            .update_payment_status("a", &PaymentTransition::to(PaymentStatus::Paid))
            .await
            .unwrap_err();
        assert!(matches!(invalid, RepositoryError::InvalidTransition(_)));

        let unknown = repo
            .update_payment_status("zzz", &PaymentTransition::to(PaymentStatus::Paid))
            .await
            .unwrap_err();
        assert_eq!(unknown, RepositoryError::payment_not_found("zzz"));
    }

    #[tokio::test]
    async fn test_terminal_and_validation_errors_stay_distinct() {
        let repo = InMemoryRepository::new();
        repo.insert_payment(payment("a", "2024-01-01T00:00:00Z", "not_approved"));
        repo.insert_payment(payment("b", "2024-01-01T00:00:00Z", "under_review"));

        let terminal = repo
            .update_payment_status("a", &PaymentTransition::to(PaymentStatus::Pending))
            .await
            .unwrap_err();
        assert!(matches!(terminal, RepositoryError::TerminalStateViolation(_)));

        let invalid_notes = repo
            .update_payment_status(
                "b",
                &PaymentTransition::to(PaymentStatus::Approved).with_notes("x".repeat(256)),
            )
            .await
            .unwrap_err();
        assert!(matches!(invalid_notes, RepositoryError::Validation(_)));
    }

    #[tokio::test]
    async fn test_repeated_update_reports_unchanged() {
        let repo = InMemoryRepository::new();
        repo.insert_payment(payment("a", "2024-01-01T00:00:00Z", "under_review"));
        let change = PaymentTransition::to(PaymentStatus::Approved);

        let first = repo.update_payment_status("a", &change).await.unwrap();
        assert!(first.changed);
        let second = repo.update_payment_status("a", &change).await.unwrap();
        assert!(!second.changed);
        assert_eq!(second.record, first.record);
    }

    #[tokio::test]
    async fn test_payment_held_by_one_active_withdrawal() {
        let repo = InMemoryRepository::new();
        let approved = payment("a", "2024-01-01T00:00:00Z", "approved");

        repo.insert_withdrawal(withdrawal("wd-1", &[approved.clone()]))
            .await
            .unwrap();
        let conflict = repo
            .insert_withdrawal(withdrawal("wd-2", &[approved.clone()]))
            .await
            .unwrap_err();
        assert!(matches!(conflict, RepositoryError::Conflict(_)));

        repo.update_withdrawal_status("wd-1", &WithdrawalTransition::failed("node rejected broadcast"))
            .await
            .unwrap();
        repo.insert_withdrawal(withdrawal("wd-2", &[approved]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_find_by_qr_id() {
        let repo = InMemoryRepository::new();
        repo.insert_payment(payment("a", "2024-01-01T00:00:00Z", "pending"));

        assert_eq!(repo.find_payment_by_qr_id("qr-a").await.unwrap().id(), "a");
        assert!(matches!(
            repo.find_payment_by_qr_id("qr-z").await,
            Err(RepositoryError::NotFound { .. })
        ));
    }
}
