//! Fee and conversion engine
//!
//! Fees never depend on live rates. Only the destination quantity does, so a
//! missing rate degrades the conversion and leaves the fee figures intact.

use crate::{config::FeeConfig, rates::RateProvider, types::*, Error, Result};
use chrono::Utc;
use records_core::{CryptoType, FeeDetail, FeeType, ValidationErrors, WalletFamily};
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// Rate-independent fee calculator
#[derive(Debug, Clone)]
pub struct FeeEngine {
    config: FeeConfig,
}

impl FeeEngine {
    /// Create engine
    pub fn new(config: FeeConfig) -> Self {
        Self { config }
    }

    /// Active fee configuration
    pub fn config(&self) -> &FeeConfig {
        &self.config
    }

    /// Platform fee and net amount
    ///
    /// `has_coupon` is accepted for forward compatibility and does not change
    /// the rate.
    pub fn fee_breakdown(&self, amount: Decimal, has_coupon: bool) -> Result<FeeBreakdown> {
        if amount <= Decimal::ZERO {
            return Err(records_core::Error::Validation(ValidationErrors::single(
                "amount",
                "must be greater than zero",
            ))
            .into());
        }

        if has_coupon {
            debug!(%amount, "Coupon flag set, standard fee applies");
        }

        let platform_fee = checked_mul(amount, self.config.platform_fee_rate())?;

        Ok(FeeBreakdown {
            amount,
            fee_percent: self.config.platform_fee_percent,
            platform_fee,
            net_amount_brl: amount - platform_fee,
        })
    }

    /// Price a request against already-fetched rates
    ///
    /// Crypto families without rates produce a `RateUnavailable` conversion.
    pub fn settle(&self, request: &SettlementRequest, rates: Option<&LiveRates>) -> Result<SettlementQuote> {
        self.assemble(
            request,
            rates.ok_or_else(|| "no live rates supplied".to_string()),
        )
    }

    fn assemble(
        &self,
        request: &SettlementRequest,
        rates: std::result::Result<&LiveRates, String>,
    ) -> Result<SettlementQuote> {
        let fees = self.fee_breakdown(request.amount, request.has_coupon)?;
        let family = request.family();
        let net = fees.net_amount_brl;

        let (conversion, spread_amount) = match family {
            WalletFamily::Bitcoin | WalletFamily::Usdt => {
                let spread_amount = checked_mul(net, self.config.spread_rate())?;
                let conversion = match rates {
                    Ok(rates) => self.convert_crypto(family, net, rates)?,
                    Err(reason) => Conversion::RateUnavailable { reason },
                };
                (conversion, spread_amount)
            }
            WalletFamily::FiatRail => (convert_fiat(request, net)?, Decimal::ZERO),
        };

        let fee_detail = self.fee_detail(&fees, spread_amount, request.platform_total)?;

        debug!(
            wallet_type = %request.wallet_type,
            amount = %fees.amount,
            platform_fee = %fees.platform_fee,
            degraded = conversion.is_rate_unavailable(),
            "Settled request"
        );

        Ok(SettlementQuote {
            family,
            fees,
            fee_detail,
            conversion,
            quoted_at: Utc::now(),
        })
    }

    fn convert_crypto(&self, family: WalletFamily, net: Decimal, rates: &LiveRates) -> Result<Conversion> {
        let (asset, market_rate) = match family {
            WalletFamily::Bitcoin => (CryptoType::BTC, rates.btc_to_brl),
            WalletFamily::Usdt => (CryptoType::USDT, rates.usdt_to_brl),
            WalletFamily::FiatRail => {
                return Err(Error::Calculation("fiat rail has no crypto rate".to_string()))
            }
        };

        let adjusted_rate = checked_mul(market_rate, Decimal::ONE - self.config.spread_rate())?;
        if adjusted_rate <= Decimal::ZERO {
            return Err(Error::Calculation(format!(
                "adjusted {} rate is not positive ({})",
                asset, adjusted_rate
            )));
        }

        let amount = checked_div(net, adjusted_rate)?;

        Ok(Conversion::Crypto {
            asset,
            market_rate,
            adjusted_rate,
            amount,
        })
    }

    fn fee_detail(
        &self,
        fees: &FeeBreakdown,
        spread_amount: Decimal,
        platform_total: Option<Decimal>,
    ) -> Result<FeeDetail> {
        let whitelabel_total = fees.platform_fee;
        let platform_total = platform_total.unwrap_or(Decimal::ZERO);

        if platform_total < Decimal::ZERO || platform_total > whitelabel_total {
            return Err(Error::Calculation(format!(
                "platform share {} outside fee {}",
                platform_total, whitelabel_total
            )));
        }

        Ok(FeeDetail {
            fee_amount: fees.platform_fee,
            fee_value: fees.fee_percent,
            fee_type: FeeType::Percent,
            spread_amount,
            spread_percent: self.config.spread_percent,
            whitelabel_total,
            whitelabel_net: whitelabel_total - platform_total,
            platform_total,
        })
    }
}

/// Fiat rails: BRL passes through, EUR/USD use the rate implied by the quoted value
fn convert_fiat(request: &SettlementRequest, net: Decimal) -> Result<Conversion> {
    let conversion = match request.crypto_type {
        Some(currency) if currency.is_foreign_fiat() => match request.crypto_value {
            Some(value) if value > Decimal::ZERO => {
                let rate = checked_div(request.amount, value)?;
                Conversion::Fiat {
                    currency,
                    rate,
                    amount: checked_div(net, rate)?,
                }
            }
            _ => Conversion::RateUnavailable {
                reason: format!("cryptoValue required to derive the {} rate", currency),
            },
        },
        _ => Conversion::Fiat {
            currency: CryptoType::BRL,
            rate: Decimal::ONE,
            amount: net,
        },
    };
    Ok(conversion)
}

fn checked_mul(lhs: Decimal, rhs: Decimal) -> Result<Decimal> {
    lhs.checked_mul(rhs)
        .ok_or_else(|| Error::Calculation(format!("{} * {} overflowed", lhs, rhs)))
}

fn checked_div(lhs: Decimal, rhs: Decimal) -> Result<Decimal> {
    lhs.checked_div(rhs)
        .ok_or_else(|| Error::Calculation(format!("{} / {} overflowed", lhs, rhs)))
}

/// Fee engine bound to a live rate source
#[derive(Debug)]
pub struct SettlementEngine<P> {
    fees: FeeEngine,
    provider: P,
}

impl<P: RateProvider> SettlementEngine<P> {
    /// Create engine
    pub fn new(config: FeeConfig, provider: P) -> Self {
        Self {
            fees: FeeEngine::new(config),
            provider,
        }
    }

    /// Underlying fee engine
    pub fn fee_engine(&self) -> &FeeEngine {
        &self.fees
    }

    /// Price a request, fetching rates only for crypto destinations
    ///
    /// Feed failures degrade the conversion; they are not returned as errors.
    pub async fn quote(&self, request: &SettlementRequest) -> Result<SettlementQuote> {
        if request.family() == WalletFamily::FiatRail {
            return self
                .fees
                .assemble(request, Err("fiat rail does not use live rates".to_string()));
        }

        // Reject bad amounts before touching the feed
        self.fees.fee_breakdown(request.amount, request.has_coupon)?;

        match self.provider.get_rates().await {
            Ok(rates) => self.fees.assemble(request, Ok(&rates)),
            Err(Error::RateUnavailable(reason)) => {
                warn!(wallet_type = %request.wallet_type, %reason, "Rates unavailable, returning fee-only quote");
                self.fees.assemble(request, Err(reason))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rates::StaticRateProvider;
    use async_trait::async_trait;
    use records_core::WalletType;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn rates(btc: Decimal, usdt: Decimal) -> LiveRates {
        LiveRates::new(btc, usdt, Utc::now()).unwrap()
    }

    fn engine() -> FeeEngine {
        FeeEngine::new(FeeConfig::default())
    }

    #[test]
    fn test_bitcoin_settlement() {
        let request = SettlementRequest::new(dec!(1000.00), WalletType::OnChainAddress);
        let quote = engine()
            .settle(&request, Some(&rates(dec!(300000), dec!(5.5))))
            .unwrap();

        assert_eq!(quote.family, WalletFamily::Bitcoin);
        assert_eq!(quote.fees.platform_fee, dec!(39.90));
        assert_eq!(quote.fees.net_amount_brl, dec!(960.10));

        match &quote.conversion {
            Conversion::Crypto { asset, adjusted_rate, .. } => {
                assert_eq!(*asset, CryptoType::BTC);
                assert_eq!(*adjusted_rate, dec!(292500));
            }
            other => panic!("unexpected conversion {:?}", other),
        }
        assert_eq!(quote.conversion.rendered_amount(), Some(dec!(0.00328239)));
        assert_eq!(quote.conversion.satoshis(), Some(328239));
    }

    #[test]
    fn test_usdt_settlement() {
        let request = SettlementRequest::new(dec!(500.00), WalletType::TronAddress);
        let quote = engine()
            .settle(&request, Some(&rates(dec!(300000), dec!(5.50))))
            .unwrap();

        assert_eq!(quote.fees.platform_fee, dec!(19.95));
        assert_eq!(quote.fees.net_amount_brl, dec!(480.05));
        match &quote.conversion {
            Conversion::Crypto { asset, adjusted_rate, .. } => {
                assert_eq!(*asset, CryptoType::USDT);
                assert_eq!(*adjusted_rate, dec!(5.3625));
            }
            other => panic!("unexpected conversion {:?}", other),
        }
        assert_eq!(quote.conversion.rendered_amount(), Some(dec!(89.519814)));
        assert_eq!(quote.conversion.satoshis(), None);
    }

    #[test]
    fn test_exact_value_kept_internally() {
        let request = SettlementRequest::new(dec!(1000.00), WalletType::LightningAddress);
        let quote = engine()
            .settle(&request, Some(&rates(dec!(300000), dec!(5.5))))
            .unwrap();
        let exact = quote.conversion.amount().unwrap();
        assert_ne!(exact, quote.conversion.rendered_amount().unwrap());
        assert_eq!(exact.round_dp(12), dec!(0.003282393162));
    }

    #[test]
    fn test_pix_passes_net_through() {
        let request = SettlementRequest::new(dec!(1000.00), WalletType::from("PixKey"));
        let quote = engine().settle(&request, None).unwrap();

        assert_eq!(quote.family, WalletFamily::FiatRail);
        assert_eq!(quote.fee_detail.spread_amount, Decimal::ZERO);
        assert_eq!(
            quote.conversion,
            Conversion::Fiat {
                currency: CryptoType::BRL,
                rate: Decimal::ONE,
                amount: dec!(960.10),
            }
        );
    }

    #[test]
    fn test_eur_rate_implied_by_quoted_value() {
        let request = SettlementRequest::new(dec!(1000.00), WalletType::from("IBAN"))
            .with_crypto(CryptoType::EUR, Some(dec!(160)));
        let quote = engine().settle(&request, None).unwrap();

        match &quote.conversion {
            Conversion::Fiat { currency, rate, .. } => {
                assert_eq!(*currency, CryptoType::EUR);
                assert_eq!(*rate, dec!(6.25));
            }
            other => panic!("unexpected conversion {:?}", other),
        }
        assert_eq!(quote.conversion.rendered_amount(), Some(dec!(153.62)));
    }

    #[test]
    fn test_eur_without_quoted_value_is_degraded() {
        let request = SettlementRequest::new(dec!(1000.00), WalletType::from("IBAN"))
            .with_crypto(CryptoType::USD, None);
        let quote = engine().settle(&request, None).unwrap();
        assert!(quote.conversion.is_rate_unavailable());
        assert_eq!(quote.fees.platform_fee, dec!(39.90));
    }

    #[test]
    fn test_implied_rate_overflow_is_calculation_error() {
        let request = SettlementRequest::new(dec!(100000000000000000000), WalletType::from("IBAN"))
            .with_crypto(CryptoType::EUR, Some(dec!(0.0000000001)));
        let err = engine().settle(&request, None).unwrap_err();
        assert!(matches!(err, Error::Calculation(_)), "got {:?}", err);
    }

    #[test]
    fn test_coupon_does_not_change_fee() {
        let plain = engine().fee_breakdown(dec!(250), false).unwrap();
        let coupon = engine().fee_breakdown(dec!(250), true).unwrap();
        assert_eq!(plain, coupon);
    }

    #[test]
    fn test_non_positive_amount_is_validation_error() {
        let err = engine().fee_breakdown(dec!(0), false).unwrap_err();
        assert!(matches!(err, Error::Record(records_core::Error::Validation(_))));
    }

    #[test]
    fn test_fee_detail_split() {
        let request = SettlementRequest::new(dec!(1000.00), WalletType::OnChainAddress)
            .with_platform_total(dec!(10.00));
        let quote = engine()
            .settle(&request, Some(&rates(dec!(300000), dec!(5.5))))
            .unwrap();
        let detail = &quote.fee_detail;

        assert_eq!(detail.whitelabel_total, dec!(39.90));
        assert_eq!(detail.platform_total, dec!(10.00));
        assert_eq!(detail.whitelabel_net, dec!(29.90));
        assert_eq!(detail.spread_amount, dec!(24.0025));
        assert_eq!(detail.fee_value, dec!(3.99));
        assert!(detail.split_holds());
    }

    #[test]
    fn test_platform_share_above_fee_rejected() {
        let request = SettlementRequest::new(dec!(100), WalletType::OnChainAddress)
            .with_platform_total(dec!(50));
        let err = engine().settle(&request, None).unwrap_err();
        assert!(matches!(err, Error::Calculation(_)));
    }

    #[test]
    fn test_crypto_without_rates_is_degraded() {
        let request = SettlementRequest::new(dec!(1000), WalletType::PolygonAddress);
        let quote = engine().settle(&request, None).unwrap();
        assert!(quote.conversion.is_rate_unavailable());
        assert_eq!(quote.fees.net_amount_brl, dec!(960.10));
    }

    #[derive(Debug, Default)]
    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RateProvider for CountingProvider {
        async fn get_rates(&self) -> Result<LiveRates> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            LiveRates::new(dec!(300000), dec!(5.5), Utc::now())
        }
    }

    #[tokio::test]
    async fn test_quote_fetches_only_for_crypto() {
        let engine = SettlementEngine::new(FeeConfig::default(), CountingProvider::default());

        let pix = SettlementRequest::new(dec!(100), WalletType::from("PixKey"));
        engine.quote(&pix).await.unwrap();
        assert_eq!(engine.provider.calls.load(Ordering::SeqCst), 0);

        let btc = SettlementRequest::new(dec!(100), WalletType::LiquidAddress);
        engine.quote(&btc).await.unwrap();
        assert_eq!(engine.provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_feed_failure_keeps_fees() {
        let engine = SettlementEngine::new(
            FeeConfig::default(),
            StaticRateProvider::unavailable("feed timeout"),
        );
        let request = SettlementRequest::new(dec!(1000.00), WalletType::OnChainAddress);
        let quote = engine.quote(&request).await.unwrap();

        assert_eq!(
            quote.conversion,
            Conversion::RateUnavailable {
                reason: "feed timeout".to_string()
            }
        );
        assert_eq!(quote.fees.platform_fee, dec!(39.90));
        assert_eq!(quote.fee_detail.whitelabel_total, dec!(39.90));
    }
}
