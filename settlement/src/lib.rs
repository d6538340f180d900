//! Settlement Engine
//!
//! Prices withdrawals: platform fee, exchange spread, and the exact quantity
//! to transmit on the destination rail.
//!
//! # Pipeline
//!
//! 1. **Fee**: fixed percentage of the fiat amount (rate-independent)
//! 2. **Classification**: wallet network → Bitcoin, USDT or fiat rail
//! 3. **Conversion**: net BRL ÷ spread-adjusted live rate (crypto families),
//!    or ÷ the rate implied by the quoted value (EUR/USD rails)
//! 4. **Breakdown**: `FeeDetail` with the whitelabel/platform split
//!
//! A failed price feed degrades the quote instead of failing it: fee fields
//! are always present, the conversion reports `RateUnavailable`.
//!
//! # Example
//!
//! ```no_run
//! use records_core::WalletType;
//! use rust_decimal::Decimal;
//! use settlement::{Config, HttpRateProvider, SettlementEngine, SettlementRequest};
//!
//! #[tokio::main]
//! async fn main() -> settlement::Result<()> {
//!     let config = Config::default();
//!     let provider = HttpRateProvider::new(&config.rate_feed)?;
//!     let engine = SettlementEngine::new(config.fees, provider);
//!
//!     let request = SettlementRequest::new(Decimal::new(100000, 2), WalletType::OnChainAddress);
//!     let quote = engine.quote(&request).await?;
//!     println!("send {:?} BTC", quote.conversion.rendered_amount());
//!
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod engine;
pub mod error;
pub mod quote;
pub mod rates;
pub mod types;

// Re-exports
pub use config::{Config, FeeConfig, RateFeedConfig};
pub use engine::{FeeEngine, SettlementEngine};
pub use error::{Error, Result};
pub use quote::{QuoteOutcome, QuoteSession};
pub use rates::{HttpRateProvider, RateProvider, StaticRateProvider};
pub use types::*;
