//! Back-office records core
//!
//! Typed Payment and Withdrawal records for the custodial collection and
//! withdrawal platform, together with the rules that govern them.
//!
//! # Architecture
//!
//! - **Validation**: untyped JSON payloads are parsed into immutable records,
//!   reporting every offending field at once
//! - **State machines**: one canonical status enum per record with an explicit
//!   transition table and evidence requirements
//! - **Batching**: withdrawals are assembled from approved payments of a single store
//!
//! # Invariants
//!
//! - Money is always `Decimal`, never binary floating point
//! - `Payment.amount > 0`, `Withdrawal.amount > 0`
//! - `paymentIds` is non-empty and duplicate-free
//! - `completedAt` exists if and only if a withdrawal is `completed`
//! - Terminal records (`paid`, `not_approved`, `completed`, `failed`) never change

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod error;
pub mod payment;
pub mod types;
pub mod validation;
pub mod webhook;
pub mod withdrawal;

// Re-exports
pub use error::{Error, Result, ValidationError, ValidationErrors};
pub use payment::{Payment, PaymentTransition};
pub use types::{
    CryptoType, FeeDetail, FeeType, PaymentStatus, TransactionType, Transitioned, WalletFamily,
    WalletType, WithdrawalStatus,
};
pub use validation::{validate_payment, validate_withdrawal};
pub use webhook::WebhookPayload;
pub use withdrawal::{NewWithdrawal, Withdrawal, WithdrawalTransition};
