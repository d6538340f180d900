//! Configuration for settlement engine

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Settlement engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Fee and spread configuration
    pub fees: FeeConfig,

    /// Price feed configuration
    pub rate_feed: RateFeedConfig,
}

/// Fee configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Platform fee, percentage points of the withdrawal amount
    pub platform_fee_percent: Decimal,

    /// Spread subtracted from the live market rate, percentage points
    pub spread_percent: Decimal,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            platform_fee_percent: Decimal::new(399, 2), // 3.99%
            spread_percent: Decimal::new(25, 1),        // 2.5%
        }
    }
}

impl FeeConfig {
    /// Platform fee as a fraction
    pub fn platform_fee_rate(&self) -> Decimal {
        self.platform_fee_percent / Decimal::ONE_HUNDRED
    }

    /// Spread as a fraction
    pub fn spread_rate(&self) -> Decimal {
        self.spread_percent / Decimal::ONE_HUNDRED
    }

    /// Check percentages are within `[0, 100)`
    pub fn validate(&self) -> crate::Result<()> {
        for (name, value) in [
            ("platform_fee_percent", self.platform_fee_percent),
            ("spread_percent", self.spread_percent),
        ] {
            if value < Decimal::ZERO || value >= Decimal::ONE_HUNDRED {
                return Err(crate::Error::Config(format!(
                    "{} must be in [0, 100), got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Price feed configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateFeedConfig {
    /// Endpoint returning `{"bitcoin":{"brl":..},"tether":{"brl":..}}`
    pub url: String,

    /// Request timeout (milliseconds)
    pub timeout_ms: u64,
}

impl Default for RateFeedConfig {
    fn default() -> Self {
        Self {
            url: "https://api.coingecko.com/api/v3/simple/price?ids=bitcoin,tether&vs_currencies=brl"
                .to_string(),
            timeout_ms: 5_000,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse from TOML text
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.fees.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(fee) = std::env::var("SETTLEMENT_PLATFORM_FEE_PERCENT") {
            config.fees.platform_fee_percent = parse_percent("SETTLEMENT_PLATFORM_FEE_PERCENT", &fee)?;
        }

        if let Ok(spread) = std::env::var("SETTLEMENT_SPREAD_PERCENT") {
            config.fees.spread_percent = parse_percent("SETTLEMENT_SPREAD_PERCENT", &spread)?;
        }

        if let Ok(url) = std::env::var("SETTLEMENT_RATE_FEED_URL") {
            config.rate_feed.url = url;
        }

        if let Ok(timeout) = std::env::var("SETTLEMENT_RATE_FEED_TIMEOUT_MS") {
            config.rate_feed.timeout_ms = timeout.parse().map_err(|_| {
                crate::Error::Config(format!(
                    "SETTLEMENT_RATE_FEED_TIMEOUT_MS must be an integer, got {}",
                    timeout
                ))
            })?;
        }

        config.fees.validate()?;
        Ok(config)
    }
}

fn parse_percent(var: &str, value: &str) -> crate::Result<Decimal> {
    value
        .trim()
        .parse::<Decimal>()
        .map_err(|_| crate::Error::Config(format!("{} must be a decimal, got {}", var, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.fees.platform_fee_percent, dec!(3.99));
        assert_eq!(config.fees.spread_percent, dec!(2.5));
        assert_eq!(config.fees.platform_fee_rate(), dec!(0.0399));
        assert_eq!(config.fees.spread_rate(), dec!(0.025));
        assert_eq!(config.rate_feed.timeout_ms, 5_000);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [rate_feed]
            url = "http://localhost:9000/rates"
            "#,
        )
        .unwrap();
        assert_eq!(config.rate_feed.url, "http://localhost:9000/rates");
        assert_eq!(config.rate_feed.timeout_ms, 5_000);
        assert_eq!(config.fees, FeeConfig::default());
    }

    #[test]
    fn test_out_of_range_fee_rejected() {
        let result = Config::from_toml(
            r#"
            [fees]
            platform_fee_percent = "120"
            "#,
        );
        assert!(matches!(result, Err(crate::Error::Config(_))));
    }
}
