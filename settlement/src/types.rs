//! Core types for settlement engine

use chrono::{DateTime, Utc};
use records_core::{
    CryptoType, FeeDetail, ValidationErrors, WalletFamily, WalletType, Withdrawal,
};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Display precision for BTC quantities
pub const BTC_DECIMALS: u32 = 8;

/// Display precision for USDT quantities
pub const USDT_DECIMALS: u32 = 6;

/// Display precision for fiat amounts
pub const FIAT_DECIMALS: u32 = 2;

/// Satoshis per bitcoin
pub const SATS_PER_BTC: i64 = 100_000_000;

/// Live BRL prices for the convertible assets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveRates {
    /// BRL per BTC
    pub btc_to_brl: Decimal,

    /// BRL per USDT
    pub usdt_to_brl: Decimal,

    /// When the rates were observed
    pub fetched_at: DateTime<Utc>,
}

impl LiveRates {
    /// Create rates, rejecting non-positive prices
    pub fn new(btc_to_brl: Decimal, usdt_to_brl: Decimal, fetched_at: DateTime<Utc>) -> crate::Result<Self> {
        if btc_to_brl <= Decimal::ZERO || usdt_to_brl <= Decimal::ZERO {
            return Err(crate::Error::RateUnavailable(format!(
                "non-positive rate (btc={}, usdt={})",
                btc_to_brl, usdt_to_brl
            )));
        }
        Ok(Self {
            btc_to_brl,
            usdt_to_brl,
            fetched_at,
        })
    }

    /// Market rate for a wallet family, `None` for fiat rails
    pub fn market_rate(&self, family: WalletFamily) -> Option<Decimal> {
        match family {
            WalletFamily::Bitcoin => Some(self.btc_to_brl),
            WalletFamily::Usdt => Some(self.usdt_to_brl),
            WalletFamily::FiatRail => None,
        }
    }
}

/// Input to a settlement calculation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRequest {
    /// Fiat amount being withdrawn (BRL)
    pub amount: Decimal,

    /// Destination network
    pub wallet_type: WalletType,

    /// Destination currency for fiat rails
    #[serde(default)]
    pub crypto_type: Option<CryptoType>,

    /// Quoted destination value (implies the EUR/USD rate)
    #[serde(default)]
    pub crypto_value: Option<Decimal>,

    /// Carried through for the caller; does not change the fee
    #[serde(default)]
    pub has_coupon: bool,

    /// Platform's retained share from the stored fee record, if any
    #[serde(default)]
    pub platform_total: Option<Decimal>,
}

impl SettlementRequest {
    /// Request for an amount and destination network
    pub fn new(amount: Decimal, wallet_type: WalletType) -> Self {
        Self {
            amount,
            wallet_type,
            crypto_type: None,
            crypto_value: None,
            has_coupon: false,
            platform_total: None,
        }
    }

    /// Set destination currency and quoted value
    pub fn with_crypto(mut self, crypto_type: CryptoType, crypto_value: Option<Decimal>) -> Self {
        self.crypto_type = Some(crypto_type);
        self.crypto_value = crypto_value;
        self
    }

    /// Set coupon flag
    pub fn with_coupon(mut self, has_coupon: bool) -> Self {
        self.has_coupon = has_coupon;
        self
    }

    /// Set the platform's retained share
    pub fn with_platform_total(mut self, platform_total: Decimal) -> Self {
        self.platform_total = Some(platform_total);
        self
    }

    /// Request pricing an existing withdrawal
    ///
    /// The withdrawal must carry a destination network.
    pub fn for_withdrawal(withdrawal: &Withdrawal, has_coupon: bool) -> crate::Result<Self> {
        let wallet_type = withdrawal.destination_wallet_type().cloned().ok_or_else(|| {
            records_core::Error::Validation(ValidationErrors::single(
                "destinationWalletType",
                "is required to price a withdrawal",
            ))
        })?;

        Ok(Self {
            amount: withdrawal.amount(),
            wallet_type,
            crypto_type: withdrawal.crypto_type(),
            crypto_value: withdrawal.crypto_value(),
            has_coupon,
            platform_total: withdrawal.fees_detail().map(|f| f.platform_total),
        })
    }

    /// Settlement family of the destination
    pub fn family(&self) -> WalletFamily {
        self.wallet_type.family()
    }
}

/// Rate-independent fee figures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeBreakdown {
    /// Gross fiat amount
    pub amount: Decimal,

    /// Fee percentage points applied
    pub fee_percent: Decimal,

    /// `amount × fee_percent / 100`
    pub platform_fee: Decimal,

    /// `amount − platform_fee`
    pub net_amount_brl: Decimal,
}

/// Quantity to transmit on the destination rail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Conversion {
    /// BTC or USDT bought at the spread-adjusted rate
    #[serde(rename_all = "camelCase")]
    Crypto {
        /// Asset transmitted
        asset: CryptoType,
        /// Live BRL price
        market_rate: Decimal,
        /// `market_rate × (1 − spread)`
        adjusted_rate: Decimal,
        /// `net ÷ adjusted_rate`, full precision
        amount: Decimal,
    },

    /// Fiat rail transfer
    #[serde(rename_all = "camelCase")]
    Fiat {
        /// Currency transmitted
        currency: CryptoType,
        /// BRL per unit of `currency`
        rate: Decimal,
        /// `net ÷ rate`, full precision
        amount: Decimal,
    },

    /// No usable rate; fee figures are still valid
    RateUnavailable {
        /// Why the rate could not be obtained
        reason: String,
    },
}

impl Conversion {
    /// Full-precision quantity, if a rate was available
    pub fn amount(&self) -> Option<Decimal> {
        match self {
            Conversion::Crypto { amount, .. } | Conversion::Fiat { amount, .. } => Some(*amount),
            Conversion::RateUnavailable { .. } => None,
        }
    }

    /// Quantity rounded half away from zero to the asset's display precision
    pub fn rendered_amount(&self) -> Option<Decimal> {
        let dp = match self {
            Conversion::Crypto { asset: CryptoType::BTC, .. } => BTC_DECIMALS,
            Conversion::Crypto { .. } => USDT_DECIMALS,
            Conversion::Fiat { .. } => FIAT_DECIMALS,
            Conversion::RateUnavailable { .. } => return None,
        };
        self.amount()
            .map(|a| a.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero))
    }

    /// Rendered BTC quantity in satoshis
    pub fn satoshis(&self) -> Option<i64> {
        use rust_decimal::prelude::ToPrimitive;

        match self {
            Conversion::Crypto { asset: CryptoType::BTC, .. } => self
                .rendered_amount()
                .and_then(|btc| btc.checked_mul(Decimal::from(SATS_PER_BTC)))
                .and_then(|sats| sats.to_i64()),
            _ => None,
        }
    }

    /// Whether the quote is degraded
    pub fn is_rate_unavailable(&self) -> bool {
        matches!(self, Conversion::RateUnavailable { .. })
    }
}

/// Complete priced withdrawal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementQuote {
    /// Destination family
    pub family: WalletFamily,

    /// Rate-independent fee figures
    pub fees: FeeBreakdown,

    /// Breakdown to persist on the withdrawal
    pub fee_detail: FeeDetail,

    /// Destination quantity
    pub conversion: Conversion,

    /// When the quote was computed
    pub quoted_at: DateTime<Utc>,
}
