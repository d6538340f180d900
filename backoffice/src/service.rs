//! Operator back-office
//!
//! Every entry point follows the same order: load, check the transition
//! against the state machine, persist, then audit. Audit emission happens
//! only after the repository accepted the change and only when something
//! actually changed.

use crate::{
    audit::{AuditAction, AuditEmitter},
    repository::{PaymentRepository, WithdrawalRepository},
    Error, Result,
};
use chrono::Utc;
use records_core::{
    NewWithdrawal, Payment, PaymentStatus, PaymentTransition, WebhookPayload, Withdrawal,
    WithdrawalTransition,
};
use serde::Serialize;
use serde_json::Value;
use settlement::{QuoteSession, RateProvider, SettlementEngine, SettlementQuote, SettlementRequest};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Actor recorded for provider-driven changes
pub const WEBHOOK_ACTOR: &str = "webhook";

/// Back-office service
#[derive(Debug)]
pub struct BackOffice<R, P> {
    repository: Arc<R>,
    engine: Arc<SettlementEngine<P>>,
    audit: AuditEmitter,
}

impl<R, P> BackOffice<R, P>
where
    R: PaymentRepository + WithdrawalRepository,
    P: RateProvider,
{
    /// Create service
    pub fn new(repository: Arc<R>, engine: Arc<SettlementEngine<P>>, audit: AuditEmitter) -> Self {
        Self {
            repository,
            engine,
            audit,
        }
    }

    /// Underlying repository
    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// New last-input-wins quoting session sharing this service's engine
    pub fn quote_session(&self) -> QuoteSession<P> {
        QuoteSession::new(self.engine.clone())
    }

    /// Change a payment's status
    pub async fn update_payment_status(
        &self,
        actor_id: &str,
        payment_id: &str,
        change: PaymentTransition,
    ) -> Result<Payment> {
        self.apply_payment(actor_id, payment_id, change, AuditAction::PaymentStatusUpdated)
            .await
    }

    /// Attach a receipt and move the payment to `receipt_sent`
    pub async fn upload_receipt(&self, actor_id: &str, payment_id: &str, receipt: &str) -> Result<Payment> {
        let change = PaymentTransition::to(PaymentStatus::ReceiptSent).with_receipt(receipt);
        self.apply_payment(actor_id, payment_id, change, AuditAction::PaymentReceiptUploaded)
            .await
    }

    async fn apply_payment(
        &self,
        actor_id: &str,
        payment_id: &str,
        change: PaymentTransition,
        action: AuditAction,
    ) -> Result<Payment> {
        let before = self.repository.get_payment(payment_id).await?;
        let step = before.transition(&change, Utc::now())?;

        if !step.changed {
            debug!(payment_id, status = %before.status(), "Payment already in requested status");
            return Ok(before);
        }

        let stored = self
            .repository
            .update_payment_status(payment_id, &change)
            .await?;
        if !stored.changed {
            debug!(payment_id, status = %stored.record.status(), "Payment changed concurrently, nothing to audit");
            return Ok(stored.record);
        }
        let after = stored.record;

        self.audit.emit(
            actor_id,
            action,
            snapshot(&before),
            snapshot(&after),
            vec![payment_id.to_string()],
        );

        info!(
            payment_id,
            actor_id,
            from = %before.status(),
            to = %after.status(),
            "Payment status updated"
        );
        Ok(after)
    }

    /// Change a withdrawal's status
    pub async fn update_withdrawal_status(
        &self,
        actor_id: &str,
        withdrawal_id: &str,
        change: WithdrawalTransition,
    ) -> Result<Withdrawal> {
        let before = self.repository.get_withdrawal(withdrawal_id).await?;
        let step = before.transition(&change, Utc::now())?;

        if !step.changed {
            debug!(withdrawal_id, status = %before.status(), "Withdrawal already in requested status");
            return Ok(before);
        }

        let stored = self
            .repository
            .update_withdrawal_status(withdrawal_id, &change)
            .await?;
        if !stored.changed {
            debug!(withdrawal_id, status = %stored.record.status(), "Withdrawal changed concurrently, nothing to audit");
            return Ok(stored.record);
        }
        let after = stored.record;

        self.audit.emit(
            actor_id,
            AuditAction::WithdrawalStatusUpdated,
            snapshot(&before),
            snapshot(&after),
            vec![withdrawal_id.to_string()],
        );

        info!(
            withdrawal_id,
            actor_id,
            from = %before.status(),
            to = %after.status(),
            tx_id = ?after.tx_id(),
            "Withdrawal status updated"
        );
        Ok(after)
    }

    /// Batch approved payments into a pending withdrawal
    ///
    /// The fee breakdown is attached when the destination network is known.
    /// It does not depend on live rates, so no price lookup happens here.
    pub async fn create_withdrawal(&self, actor_id: &str, request: NewWithdrawal) -> Result<Withdrawal> {
        let mut payments = Vec::with_capacity(request.payment_ids.len());
        for id in &request.payment_ids {
            payments.push(self.repository.get_payment(id).await?);
        }

        let mut withdrawal = Withdrawal::batch(request, &payments, Utc::now())?;

        if withdrawal.destination_wallet_type().is_some() {
            let pricing = SettlementRequest::for_withdrawal(&withdrawal, false)?;
            let quote = self.engine.fee_engine().settle(&pricing, None)?;
            withdrawal = withdrawal.with_fees_detail(quote.fee_detail)?;
        }

        let stored = self.repository.insert_withdrawal(withdrawal).await?;

        let mut targets = vec![stored.id().to_string()];
        targets.extend(stored.payment_ids().iter().cloned());
        self.audit.emit(
            actor_id,
            AuditAction::WithdrawalCreated,
            Value::Null,
            snapshot(&stored),
            targets,
        );

        info!(
            withdrawal_id = stored.id(),
            actor_id,
            amount = %stored.amount(),
            payments = stored.payment_ids().len(),
            "Withdrawal created"
        );
        Ok(stored)
    }

    /// Price a stored withdrawal at current rates
    ///
    /// A feed failure comes back as a quote whose conversion is unavailable.
    pub async fn quote_withdrawal(&self, withdrawal_id: &str, has_coupon: bool) -> Result<SettlementQuote> {
        let withdrawal = self.repository.get_withdrawal(withdrawal_id).await?;
        let request = SettlementRequest::for_withdrawal(&withdrawal, has_coupon)?;
        let quote = self.engine.quote(&request).await?;

        if quote.conversion.is_rate_unavailable() {
            warn!(withdrawal_id, "Withdrawal quoted without live rates");
        }
        Ok(quote)
    }

    /// Apply a provider status notification
    pub async fn apply_webhook(&self, payload: &WebhookPayload) -> Result<Payment> {
        let payment = self.repository.find_payment_by_qr_id(&payload.qr_id).await?;

        if !payload.matches_amount(&payment) {
            warn!(
                qr_id = %payload.qr_id,
                expected = %payment.amount(),
                received = %payload.amount(),
                "Webhook amount mismatch"
            );
            return Err(Error::AmountMismatch {
                qr_id: payload.qr_id.clone(),
                expected: payment.amount(),
                received: payload.amount(),
            });
        }

        let status = payload
            .payment_status()
            .ok_or_else(|| Error::UnknownWebhookStatus(payload.status.clone()))?;

        let change = PaymentTransition::to(status).with_payer_name(payload.payer_name.clone());
        self.update_payment_status(WEBHOOK_ACTOR, payment.id(), change)
            .await
    }
}

fn snapshot<T: Serialize>(record: &T) -> Value {
    serde_json::to_value(record).unwrap_or_else(|e| {
        error!(error = %e, "Failed to snapshot record for audit");
        Value::Null
    })
}
