//! Core types shared by payments and withdrawals
//!
//! All types are designed for:
//! - Stable wire names (snake_case statuses, camelCase fields)
//! - Exact arithmetic (Decimal for money)
//! - A single canonical enum per concept

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payment status
///
/// Older payloads use a second enumeration; those spellings are accepted on
/// input through [`PaymentStatus::LEGACY_ALIASES`] and never produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Collection intent issued, nothing received yet
    Pending,
    /// Payer uploaded a receipt (static QR only)
    ReceiptSent,
    /// Operator is reviewing the receipt
    UnderReview,
    /// Funds confirmed; eligible for withdrawal batching
    #[serde(alias = "completed")]
    Approved,
    /// Rejected (terminal)
    #[serde(alias = "rejected")]
    NotApproved,
    /// Included in an in-flight withdrawal
    WithdrawalProcessing,
    /// Settled to the merchant (terminal)
    Paid,
}

impl PaymentStatus {
    /// Every canonical status
    pub const ALL: [PaymentStatus; 7] = [
        PaymentStatus::Pending,
        PaymentStatus::ReceiptSent,
        PaymentStatus::UnderReview,
        PaymentStatus::Approved,
        PaymentStatus::NotApproved,
        PaymentStatus::WithdrawalProcessing,
        PaymentStatus::Paid,
    ];

    /// Translation table from the legacy enumeration
    pub const LEGACY_ALIASES: [(&'static str, PaymentStatus); 2] = [
        ("completed", PaymentStatus::Approved),
        ("rejected", PaymentStatus::NotApproved),
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::ReceiptSent => "receipt_sent",
            PaymentStatus::UnderReview => "under_review",
            PaymentStatus::Approved => "approved",
            PaymentStatus::NotApproved => "not_approved",
            PaymentStatus::WithdrawalProcessing => "withdrawal_processing",
            PaymentStatus::Paid => "paid",
        }
    }

    /// Parse a canonical or legacy spelling, ignoring ASCII case
    pub fn parse(s: &str) -> Option<Self> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == needle)
            .or_else(|| {
                Self::LEGACY_ALIASES
                    .iter()
                    .find(|(alias, _)| *alias == needle)
                    .map(|(_, status)| *status)
            })
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the payment QR code was issued
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    /// Reusable QR; payer proves payment with a receipt
    Static,
    /// One-off QR; the provider confirms settlement automatically
    Dynamic,
    /// Not recorded (records created before the field existed)
    #[default]
    Unset,
}

impl TransactionType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Static => "static",
            TransactionType::Dynamic => "dynamic",
            TransactionType::Unset => "unset",
        }
    }

    /// Parse wire name
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "static" => Some(TransactionType::Static),
            "dynamic" => Some(TransactionType::Dynamic),
            "unset" | "" => Some(TransactionType::Unset),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Withdrawal status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    /// Requested, nothing sent
    Pending,
    /// Transmission in progress
    Processing,
    /// Funds delivered (terminal)
    Completed,
    /// Abandoned (terminal)
    Failed,
}

impl WithdrawalStatus {
    /// Every status
    pub const ALL: [WithdrawalStatus; 4] = [
        WithdrawalStatus::Pending,
        WithdrawalStatus::Processing,
        WithdrawalStatus::Completed,
        WithdrawalStatus::Failed,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Processing => "processing",
            WithdrawalStatus::Completed => "completed",
            WithdrawalStatus::Failed => "failed",
        }
    }

    /// Parse wire name, ignoring ASCII case
    pub fn parse(s: &str) -> Option<Self> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL.iter().copied().find(|status| status.as_str() == needle)
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Asset a withdrawal is denominated in on the destination side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CryptoType {
    /// Bitcoin (on-chain, Lightning, Liquid)
    BTC,
    /// Tether (Tron, Polygon)
    USDT,
    /// Brazilian Real (PIX)
    BRL,
    /// Euro bank transfer
    EUR,
    /// US Dollar bank transfer
    USD,
}

impl CryptoType {
    /// Ticker
    pub fn code(&self) -> &'static str {
        match self {
            CryptoType::BTC => "BTC",
            CryptoType::USDT => "USDT",
            CryptoType::BRL => "BRL",
            CryptoType::EUR => "EUR",
            CryptoType::USD => "USD",
        }
    }

    /// Parse ticker, ignoring ASCII case
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BTC" => Some(CryptoType::BTC),
            "USDT" => Some(CryptoType::USDT),
            "BRL" => Some(CryptoType::BRL),
            "EUR" => Some(CryptoType::EUR),
            "USD" => Some(CryptoType::USD),
            _ => None,
        }
    }

    /// Foreign fiat whose rate is implied by the quoted value
    pub fn is_foreign_fiat(&self) -> bool {
        matches!(self, CryptoType::EUR | CryptoType::USD)
    }
}

impl fmt::Display for CryptoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Destination wallet network
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WalletType {
    /// Bitcoin on-chain address
    OnChainAddress,
    /// Lightning address or invoice
    LightningAddress,
    /// Liquid sidechain address
    LiquidAddress,
    /// USDT on Tron
    TronAddress,
    /// USDT on Polygon
    PolygonAddress,
    /// Anything else is a fiat rail (PIX key, IBAN, ...)
    Other(String),
}

impl WalletType {
    /// Wire name
    pub fn as_str(&self) -> &str {
        match self {
            WalletType::OnChainAddress => "OnChainAddress",
            WalletType::LightningAddress => "LightningAddress",
            WalletType::LiquidAddress => "LiquidAddress",
            WalletType::TronAddress => "TronAddress",
            WalletType::PolygonAddress => "PolygonAddress",
            WalletType::Other(name) => name,
        }
    }

    /// Settlement family of this network
    pub fn family(&self) -> WalletFamily {
        match self {
            WalletType::OnChainAddress | WalletType::LightningAddress | WalletType::LiquidAddress => {
                WalletFamily::Bitcoin
            }
            WalletType::TronAddress | WalletType::PolygonAddress => WalletFamily::Usdt,
            WalletType::Other(_) => WalletFamily::FiatRail,
        }
    }
}

impl From<String> for WalletType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "OnChainAddress" => WalletType::OnChainAddress,
            "LightningAddress" => WalletType::LightningAddress,
            "LiquidAddress" => WalletType::LiquidAddress,
            "TronAddress" => WalletType::TronAddress,
            "PolygonAddress" => WalletType::PolygonAddress,
            _ => WalletType::Other(s),
        }
    }
}

impl From<&str> for WalletType {
    fn from(s: &str) -> Self {
        WalletType::from(s.to_string())
    }
}

impl From<WalletType> for String {
    fn from(w: WalletType) -> Self {
        match w {
            WalletType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for WalletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settlement family a wallet network belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletFamily {
    /// Converted at the BTC/BRL rate
    Bitcoin,
    /// Converted at the USDT/BRL rate
    Usdt,
    /// No crypto conversion
    FiatRail,
}

/// How the platform fee is expressed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeType {
    /// `feeValue` is a percentage of the amount
    #[default]
    Percent,
    /// `feeValue` is an absolute amount
    Fixed,
}

impl FeeType {
    /// Parse wire name
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "percent" | "percentage" => Some(FeeType::Percent),
            "fixed" => Some(FeeType::Fixed),
            _ => None,
        }
    }
}

/// Fee breakdown attached to a withdrawal
///
/// `whitelabel_total` is the fee charged to the merchant; it splits into the
/// whitelabel's share and the platform's retained share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeDetail {
    /// Fee charged, in BRL
    pub fee_amount: Decimal,

    /// Fee basis (percentage points for [`FeeType::Percent`])
    pub fee_value: Decimal,

    /// Fee basis type
    pub fee_type: FeeType,

    /// Spread margin, in BRL
    pub spread_amount: Decimal,

    /// Spread percentage points applied to the market rate
    pub spread_percent: Decimal,

    /// Amount charged to the merchant
    pub whitelabel_total: Decimal,

    /// Whitelabel's share after the platform cut
    pub whitelabel_net: Decimal,

    /// Platform's retained share
    pub platform_total: Decimal,
}

impl FeeDetail {
    /// Allowed drift between total and its parts (BRL cents)
    pub const SPLIT_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

    /// `whitelabel_total ≈ whitelabel_net + platform_total`
    pub fn split_holds(&self) -> bool {
        (self.whitelabel_total - (self.whitelabel_net + self.platform_total)).abs()
            <= Self::SPLIT_TOLERANCE
    }
}

/// Result of applying a status change
///
/// `changed` is false when the requested status equalled the current one.
#[derive(Debug, Clone, PartialEq)]
pub struct Transitioned<T> {
    /// Record after the change
    pub record: T,

    /// Whether anything was modified
    pub changed: bool,
}

impl<T> Transitioned<T> {
    pub(crate) fn changed(record: T) -> Self {
        Self {
            record,
            changed: true,
        }
    }

    pub(crate) fn unchanged(record: T) -> Self {
        Self {
            record,
            changed: false,
        }
    }
}
