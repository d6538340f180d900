//! Back-office service
//!
//! Wires the record validators and state machines to storage, pricing and
//! the audit trail.
//!
//! # Flow
//!
//! 1. **Load** the record from the [`repository`]
//! 2. **Check** the requested change against its state machine
//! 3. **Persist** through the repository
//! 4. **Audit** the committed change through the [`audit`] emitter
//!
//! Re-applying the current status returns the stored record and emits
//! nothing.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod audit;
pub mod config;
pub mod error;
pub mod repository;
pub mod service;

// Re-exports
pub use audit::{
    AuditAction, AuditEmitter, AuditRecord, AuditSink, AuditStats, FileAuditSink,
    InMemoryAuditSink,
};
pub use config::Config;
pub use error::{Error, Result};
pub use repository::{
    InMemoryRepository, Page, PaymentFilter, PaymentRepository, RepositoryError,
    WithdrawalFilter, WithdrawalRepository,
};
pub use service::{BackOffice, WEBHOOK_ACTOR};
