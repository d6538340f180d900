//! Validation of untyped payloads into records
//!
//! - Every violated field is reported, not only the first
//! - Decimal fields are read from their textual form, never through `f64`
//! - Timestamps are RFC 3339; due dates may also be plain `YYYY-MM-DD`

use crate::{
    payment::MAX_OBSERVATION_CHARS, types::*, Payment, ValidationErrors, Withdrawal,
};
use chrono::{DateTime, NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::str::FromStr;

lazy_static! {
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid");
}

/// Parse a payment payload
pub fn validate_payment(raw: &Value) -> Result<Payment, ValidationErrors> {
    let mut fields = FieldReader::new(raw)?;

    let id = fields.required_str("id");
    let store_id = fields.required_str("storeId");
    let amount = fields.required_decimal("amount");
    if let Some(amount) = amount {
        if amount <= Decimal::ZERO {
            fields.error("amount", "must be greater than zero");
        }
    }

    let transaction_type = fields
        .optional_str("transactionType")
        .map_or(Some(TransactionType::Unset), |raw| {
            let parsed = TransactionType::parse(&raw);
            if parsed.is_none() {
                fields.error(
                    "transactionType",
                    format!("unknown transaction type '{}'", raw),
                );
            }
            parsed
        });

    let status = fields.required_str("status").and_then(|raw| {
        let parsed = PaymentStatus::parse(&raw);
        if parsed.is_none() {
            fields.error("status", format!("unknown payment status '{}'", raw));
        }
        parsed
    });

    let created_at = fields.required_timestamp("createdAt");
    let updated_at = fields.required_timestamp("updatedAt");

    let email = fields.optional_str("email");
    if let Some(email) = &email {
        if !EMAIL_REGEX.is_match(email) {
            fields.error("email", "must be a valid e-mail address");
        }
    }

    let observation = fields.optional_str("observation");
    if let Some(observation) = &observation {
        if observation.chars().count() > MAX_OBSERVATION_CHARS {
            fields.error(
                "observation",
                format!("must be at most {} characters", MAX_OBSERVATION_CHARS),
            );
        }
    }

    let receipt = fields.optional_str("receipt");
    let payer_name = fields.optional_str("payerName");
    let qr_code_id = fields.optional_str("qrCodeId");
    let reference_id = fields.optional_str("referenceId");
    let due_date = fields.optional_date("dueDate");
    let description = fields.optional_str("description");
    let depix_address = fields.optional_str("depixAddress");

    if status == Some(PaymentStatus::ReceiptSent) {
        if transaction_type == Some(TransactionType::Dynamic) {
            fields.error("status", "dynamic payments cannot be in receipt_sent");
        }
        if receipt.is_none() {
            fields.error("receipt", "is required while status is receipt_sent");
        }
    }

    fields.finish()?;

    match (id, store_id, amount, transaction_type, status, created_at, updated_at) {
        (
            Some(id),
            Some(store_id),
            Some(amount),
            Some(transaction_type),
            Some(status),
            Some(created_at),
            Some(updated_at),
        ) => Ok(Payment {
            id,
            store_id,
            amount,
            transaction_type,
            status,
            created_at,
            updated_at,
            email,
            observation,
            receipt,
            payer_name,
            qr_code_id,
            reference_id,
            due_date,
            description,
            depix_address,
        }),
        _ => Err(ValidationErrors::single("$", "incomplete payment")),
    }
}

/// Parse a withdrawal payload
pub fn validate_withdrawal(raw: &Value) -> Result<Withdrawal, ValidationErrors> {
    let mut fields = FieldReader::new(raw)?;

    let id = fields.required_str("id");
    let store_id = fields.required_str("storeId");
    let whitelabel_id = fields.required_str("whitelabelId");

    let amount = fields.required_decimal("amount");
    if let Some(amount) = amount {
        if amount <= Decimal::ZERO {
            fields.error("amount", "must be greater than zero");
        }
    }

    let payment_ids = fields.required_id_list("paymentIds");

    let status = fields.required_str("status").and_then(|raw| {
        let parsed = WithdrawalStatus::parse(&raw);
        if parsed.is_none() {
            fields.error("status", format!("unknown withdrawal status '{}'", raw));
        }
        parsed
    });

    let destination_wallet = fields.optional_str("destinationWallet");
    let destination_wallet_type = fields
        .optional_str("destinationWalletType")
        .map(WalletType::from);
    if let Some(status) = status {
        if status != WithdrawalStatus::Pending {
            if destination_wallet.is_none() {
                fields.error("destinationWallet", format!("is required while {}", status));
            }
            if destination_wallet_type.is_none() {
                fields.error(
                    "destinationWalletType",
                    format!("is required while {}", status),
                );
            }
        }
    }

    let crypto_type = fields.optional_str("cryptoType").and_then(|raw| {
        let parsed = CryptoType::parse(&raw);
        if parsed.is_none() {
            fields.error("cryptoType", format!("unknown crypto type '{}'", raw));
        }
        parsed
    });

    let crypto_value = fields.optional_decimal("cryptoValue");
    if let Some(value) = crypto_value {
        if value <= Decimal::ZERO {
            fields.error("cryptoValue", "must be greater than zero");
        }
    }

    let tx_id = fields.optional_str("txId");
    let failed_reason = fields.optional_str("failedReason");
    let created_at = fields.required_timestamp("createdAt");
    let completed_at = fields.optional_timestamp("completedAt");

    match status {
        Some(WithdrawalStatus::Completed) => {
            if tx_id.is_none() {
                fields.error("txId", "is required while completed");
            }
            if completed_at.is_none() {
                fields.error("completedAt", "is required while completed");
            }
        }
        Some(WithdrawalStatus::Failed) => {
            if failed_reason.is_none() {
                fields.error("failedReason", "is required while failed");
            }
        }
        _ => {}
    }
    if completed_at.is_some() && status.is_some() && status != Some(WithdrawalStatus::Completed) {
        fields.error("completedAt", "may only be set on completed withdrawals");
    }

    let fees_detail = fields.optional_fee_detail("feesDetail");

    let lightning_invoice = fields.optional_str("lightningInvoice");
    let lightning_expires_at = fields.optional_timestamp("lightningExpiresAt");
    if lightning_expires_at.is_some() && lightning_invoice.is_none() {
        fields.error("lightningExpiresAt", "requires lightningInvoice");
    }
    if lightning_invoice.is_some() && crypto_type.map_or(false, |c| c != CryptoType::BRL) {
        fields.error("lightningInvoice", "only allowed for BRL settlement");
    }

    fields.finish()?;

    match (id, store_id, whitelabel_id, amount, payment_ids, status, created_at) {
        (
            Some(id),
            Some(store_id),
            Some(whitelabel_id),
            Some(amount),
            Some(payment_ids),
            Some(status),
            Some(created_at),
        ) => Ok(Withdrawal {
            id,
            store_id,
            whitelabel_id,
            amount,
            payment_ids,
            status,
            destination_wallet,
            destination_wallet_type,
            crypto_type,
            crypto_value,
            tx_id,
            failed_reason,
            created_at,
            completed_at,
            fees_detail,
            lightning_invoice,
            lightning_expires_at,
        }),
        _ => Err(ValidationErrors::single("$", "incomplete withdrawal")),
    }
}

/// Parse a fee breakdown object
pub fn validate_fee_detail(raw: &Value) -> Result<FeeDetail, ValidationErrors> {
    let mut fields = FieldReader::new(raw)?;

    let fee_amount = fields.required_decimal("feeAmount");
    let fee_value = fields.required_decimal("feeValue");
    let fee_type = fields.optional_str("feeType").map_or(Some(FeeType::Percent), |raw| {
        let parsed = FeeType::parse(&raw);
        if parsed.is_none() {
            fields.error("feeType", format!("unknown fee type '{}'", raw));
        }
        parsed
    });
    let spread_amount = fields.optional_decimal("spreadAmount").unwrap_or(Decimal::ZERO);
    let spread_percent = fields.optional_decimal("spreadPercent").unwrap_or(Decimal::ZERO);
    let whitelabel_total = fields.required_decimal("whitelabelTotal");
    let whitelabel_net = fields.required_decimal("whitelabelNet");
    let platform_total = fields.required_decimal("platformTotal");

    for (name, value) in [
        ("feeAmount", fee_amount),
        ("feeValue", fee_value),
        ("whitelabelTotal", whitelabel_total),
        ("whitelabelNet", whitelabel_net),
        ("platformTotal", platform_total),
    ] {
        if matches!(value, Some(v) if v < Decimal::ZERO) {
            fields.error(name, "must not be negative");
        }
    }

    fields.finish()?;

    match (fee_amount, fee_value, fee_type, whitelabel_total, whitelabel_net, platform_total) {
        (
            Some(fee_amount),
            Some(fee_value),
            Some(fee_type),
            Some(whitelabel_total),
            Some(whitelabel_net),
            Some(platform_total),
        ) => {
            let detail = FeeDetail {
                fee_amount,
                fee_value,
                fee_type,
                spread_amount,
                spread_percent,
                whitelabel_total,
                whitelabel_net,
                platform_total,
            };
            if !detail.split_holds() {
                return Err(ValidationErrors::single(
                    "whitelabelTotal",
                    format!(
                        "{} does not equal whitelabelNet {} + platformTotal {}",
                        whitelabel_total, whitelabel_net, platform_total
                    ),
                ));
            }
            Ok(detail)
        }
        _ => Err(ValidationErrors::single("$", "incomplete fee detail")),
    }
}

/// Parse a decimal from a JSON string or number without going through `f64`
pub fn parse_decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// Walks one JSON object, collecting errors as it goes
struct FieldReader<'a> {
    obj: &'a Map<String, Value>,
    errors: ValidationErrors,
}

impl<'a> FieldReader<'a> {
    fn new(raw: &'a Value) -> Result<Self, ValidationErrors> {
        match raw {
            Value::Object(obj) => Ok(Self {
                obj,
                errors: ValidationErrors::new(),
            }),
            _ => Err(ValidationErrors::single("$", "expected a JSON object")),
        }
    }

    fn error(&mut self, field: &str, reason: impl Into<String>) {
        self.errors.push(field, reason);
    }

    fn finish(self) -> Result<(), ValidationErrors> {
        self.errors.into_result()
    }

    /// Present and not null
    fn get(&self, field: &str) -> Option<&'a Value> {
        self.obj.get(field).filter(|v| !v.is_null())
    }

    fn required_str(&mut self, field: &str) -> Option<String> {
        match self.get(field) {
            None => {
                self.error(field, "is required");
                None
            }
            Some(Value::String(s)) if s.trim().is_empty() => {
                self.error(field, "must not be empty");
                None
            }
            Some(Value::String(s)) => Some(s.trim().to_string()),
            Some(_) => {
                self.error(field, "must be a string");
                None
            }
        }
    }

    /// Empty strings read as absent
    fn optional_str(&mut self, field: &str) -> Option<String> {
        match self.get(field) {
            None => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                self.error(field, "must be a string");
                None
            }
        }
    }

    fn required_decimal(&mut self, field: &str) -> Option<Decimal> {
        match self.get(field) {
            None => {
                self.error(field, "is required");
                None
            }
            Some(value) => self.decimal(field, value),
        }
    }

    fn optional_decimal(&mut self, field: &str) -> Option<Decimal> {
        match self.get(field) {
            None => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(value) => self.decimal(field, value),
        }
    }

    fn decimal(&mut self, field: &str, value: &Value) -> Option<Decimal> {
        let parsed = parse_decimal(value);
        if parsed.is_none() {
            self.error(field, "must be a decimal number");
        }
        parsed
    }

    fn required_timestamp(&mut self, field: &str) -> Option<DateTime<Utc>> {
        match self.required_str(field) {
            Some(raw) => self.timestamp(field, &raw),
            None => None,
        }
    }

    fn optional_timestamp(&mut self, field: &str) -> Option<DateTime<Utc>> {
        match self.optional_str(field) {
            Some(raw) => self.timestamp(field, &raw),
            None => None,
        }
    }

    fn timestamp(&mut self, field: &str, raw: &str) -> Option<DateTime<Utc>> {
        match DateTime::parse_from_rfc3339(raw.trim()) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(_) => {
                self.error(field, "must be an RFC 3339 timestamp");
                None
            }
        }
    }

    fn optional_date(&mut self, field: &str) -> Option<NaiveDate> {
        let raw = self.optional_str(field)?;
        let raw = raw.trim();
        let parsed = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|ts| ts.date_naive()));
        if parsed.is_none() {
            self.error(field, "must be a date (YYYY-MM-DD) or RFC 3339 timestamp");
        }
        parsed
    }

    fn required_id_list(&mut self, field: &str) -> Option<Vec<String>> {
        let items = match self.get(field) {
            None => {
                self.error(field, "is required");
                return None;
            }
            Some(Value::Array(items)) => items,
            Some(_) => {
                self.error(field, "must be an array of ids");
                return None;
            }
        };

        if items.is_empty() {
            self.error(field, "must contain at least one payment id");
            return None;
        }

        let mut ids = Vec::with_capacity(items.len());
        let mut seen = HashSet::new();
        let mut valid = true;
        for (idx, item) in items.iter().enumerate() {
            let path = format!("{}[{}]", field, idx);
            match item {
                Value::String(s) if !s.trim().is_empty() => {
                    let id = s.trim().to_string();
                    if !seen.insert(id.clone()) {
                        self.error(&path, format!("duplicate payment id '{}'", id));
                        valid = false;
                    }
                    ids.push(id);
                }
                Value::String(_) => {
                    self.error(&path, "must not be empty");
                    valid = false;
                }
                _ => {
                    self.error(&path, "must be a string");
                    valid = false;
                }
            }
        }

        valid.then_some(ids)
    }

    fn optional_fee_detail(&mut self, field: &str) -> Option<FeeDetail> {
        let raw = self.get(field)?;
        match validate_fee_detail(raw) {
            Ok(detail) => Some(detail),
            Err(errors) => {
                if errors.has_field("$") {
                    self.error(field, "must be an object");
                } else {
                    self.errors.extend_prefixed(field, errors);
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn payment_json() -> Value {
        json!({
            "id": "pay-1",
            "storeId": "store-1",
            "amount": "150.25",
            "transactionType": "static",
            "status": "pending",
            "createdAt": "2024-03-01T12:00:00Z",
            "updatedAt": "2024-03-01T12:00:00-03:00",
            "email": "payer@example.com",
            "qrCodeId": "qr-77",
            "dueDate": "2024-03-10",
        })
    }

    fn withdrawal_json() -> Value {
        json!({
            "id": "wd-1",
            "storeId": "store-1",
            "whitelabelId": "wl-1",
            "amount": 1000,
            "paymentIds": ["pay-1", "pay-2"],
            "status": "processing",
            "destinationWallet": "bc1qexample",
            "destinationWalletType": "OnChainAddress",
            "cryptoType": "BTC",
            "cryptoValue": "0.0032",
            "createdAt": "2024-03-01T12:00:00Z",
            "feesDetail": {
                "feeAmount": "39.90",
                "feeValue": "3.99",
                "feeType": "percent",
                "whitelabelTotal": "39.90",
                "whitelabelNet": "29.90",
                "platformTotal": "10.00"
            }
        })
    }

    #[test]
    fn test_valid_payment() {
        let p = validate_payment(&payment_json()).unwrap();

        assert_eq!(p.id(), "pay-1");
        assert_eq!(p.amount(), dec!(150.25));
        assert_eq!(p.transaction_type(), TransactionType::Static);
        assert_eq!(p.status(), PaymentStatus::Pending);
        assert_eq!(p.email(), Some("payer@example.com"));
        assert_eq!(p.due_date(), NaiveDate::from_ymd_opt(2024, 3, 10));
        assert_eq!(p.updated_at().to_rfc3339(), "2024-03-01T15:00:00+00:00");
    }

    #[test]
    fn test_payment_reports_every_field() {
        let raw = json!({
            "id": "",
            "amount": "-5",
            "status": "done",
            "createdAt": "yesterday",
            "updatedAt": "2024-03-01T12:00:00Z",
            "email": "not-an-email",
            "observation": "x".repeat(256),
        });

        let errors = validate_payment(&raw).unwrap_err();
        for field in ["id", "storeId", "amount", "status", "createdAt", "email", "observation"] {
            assert!(errors.has_field(field), "missing error for {}", field);
        }
        assert_eq!(errors.len(), 7);
    }

    #[test]
    fn test_empty_email_is_allowed() {
        let mut raw = payment_json();
        raw["email"] = json!("");
        let p = validate_payment(&raw).unwrap();
        assert_eq!(p.email(), None);
    }

    #[test]
    fn test_missing_transaction_type_is_unset() {
        let mut raw = payment_json();
        raw.as_object_mut().unwrap().remove("transactionType");
        let p = validate_payment(&raw).unwrap();
        assert_eq!(p.transaction_type(), TransactionType::Unset);
    }

    #[test]
    fn test_legacy_status_spelling() {
        let mut raw = payment_json();
        raw["status"] = json!("completed");
        assert_eq!(validate_payment(&raw).unwrap().status(), PaymentStatus::Approved);
    }

    #[test]
    fn test_decimal_from_number_keeps_exact_digits() {
        let mut raw = payment_json();
        raw["amount"] = json!(0.1);
        assert_eq!(validate_payment(&raw).unwrap().amount(), dec!(0.1));

        assert_eq!(parse_decimal(&json!("1e3")), Some(dec!(1000)));
        assert_eq!(parse_decimal(&json!(true)), None);
    }

    #[test]
    fn test_non_object_root() {
        let errors = validate_payment(&json!(["nope"])).unwrap_err();
        assert!(errors.has_field("$"));
        assert!(validate_withdrawal(&Value::Null).is_err());
    }

    #[test]
    fn test_valid_withdrawal() {
        let w = validate_withdrawal(&withdrawal_json()).unwrap();

        assert_eq!(w.amount(), dec!(1000));
        assert_eq!(w.payment_ids().len(), 2);
        assert_eq!(w.status(), WithdrawalStatus::Processing);
        assert_eq!(w.destination_wallet_type(), Some(&WalletType::OnChainAddress));
        assert_eq!(w.crypto_type(), Some(CryptoType::BTC));
        assert_eq!(w.fees_detail().unwrap().platform_total, dec!(10.00));
    }

    #[test]
    fn test_withdrawal_payment_ids_rules() {
        let mut raw = withdrawal_json();
        raw["paymentIds"] = json!([]);
        assert!(validate_withdrawal(&raw).unwrap_err().has_field("paymentIds"));

        raw["paymentIds"] = json!(["pay-1", "pay-1", ""]);
        let errors = validate_withdrawal(&raw).unwrap_err();
        assert!(errors.has_field("paymentIds[1]"));
        assert!(errors.has_field("paymentIds[2]"));
    }

    #[test]
    fn test_withdrawal_destination_required_unless_pending() {
        let mut raw = withdrawal_json();
        raw.as_object_mut().unwrap().remove("destinationWallet");
        raw.as_object_mut().unwrap().remove("destinationWalletType");
        let errors = validate_withdrawal(&raw).unwrap_err();
        assert!(errors.has_field("destinationWallet"));
        assert!(errors.has_field("destinationWalletType"));

        raw["status"] = json!("pending");
        assert!(validate_withdrawal(&raw).is_ok());
    }

    #[test]
    fn test_withdrawal_evidence_by_status() {
        let mut raw = withdrawal_json();
        raw["status"] = json!("completed");
        let errors = validate_withdrawal(&raw).unwrap_err();
        assert!(errors.has_field("txId"));
        assert!(errors.has_field("completedAt"));

        raw["status"] = json!("failed");
        raw["completedAt"] = json!("2024-03-02T00:00:00Z");
        let errors = validate_withdrawal(&raw).unwrap_err();
        assert!(errors.has_field("failedReason"));
        assert!(errors.has_field("completedAt"));
    }

    #[test]
    fn test_fee_detail_split_checked() {
        let mut raw = withdrawal_json();
        raw["feesDetail"]["platformTotal"] = json!("12.00");
        let errors = validate_withdrawal(&raw).unwrap_err();
        assert!(errors.has_field("feesDetail.whitelabelTotal"));

        raw["feesDetail"] = json!("flat");
        let errors = validate_withdrawal(&raw).unwrap_err();
        assert!(errors.has_field("feesDetail"));
    }

    #[test]
    fn test_lightning_expiry_needs_invoice() {
        let mut raw = withdrawal_json();
        raw["cryptoType"] = json!("BRL");
        raw["lightningExpiresAt"] = json!("2024-03-01T12:10:00Z");
        assert!(validate_withdrawal(&raw).unwrap_err().has_field("lightningExpiresAt"));

        raw["lightningInvoice"] = json!("lnbc1...");
        assert!(validate_withdrawal(&raw).is_ok());
    }

    #[test]
    fn test_lightning_invoice_only_for_brl() {
        let mut raw = withdrawal_json();
        raw["lightningInvoice"] = json!("lnbc1...");
        assert!(validate_withdrawal(&raw).unwrap_err().has_field("lightningInvoice"));

        raw.as_object_mut().unwrap().remove("cryptoType");
        assert!(validate_withdrawal(&raw).is_ok());
    }
}
