//! Live price feeds

use crate::{config::RateFeedConfig, Error, LiveRates, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use records_core::validation::parse_decimal;
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Source of BTC/BRL and USDT/BRL prices
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Fetch current prices
    async fn get_rates(&self) -> Result<LiveRates>;
}

#[async_trait]
impl<T: RateProvider + ?Sized> RateProvider for Arc<T> {
    async fn get_rates(&self) -> Result<LiveRates> {
        (**self).get_rates().await
    }
}

/// Price feed over HTTP
///
/// Expects a body shaped like `{"bitcoin":{"brl":..},"tether":{"brl":..}}`.
#[derive(Debug, Clone)]
pub struct HttpRateProvider {
    client: reqwest::Client,
    url: String,
}

impl HttpRateProvider {
    /// Build a client with the configured timeout
    pub fn new(config: &RateFeedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl RateProvider for HttpRateProvider {
    async fn get_rates(&self) -> Result<LiveRates> {
        debug!(url = %self.url, "Fetching rates");

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                warn!(error = %e, "Rate feed request failed");
                Error::RateUnavailable(e.to_string())
            })?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::RateUnavailable(format!("invalid rate feed body: {}", e)))?;

        parse_rates(&body, Utc::now())
    }
}

/// Extract rates from a feed body
pub fn parse_rates(body: &Value, fetched_at: DateTime<Utc>) -> Result<LiveRates> {
    let btc = price(body, "bitcoin")?;
    let usdt = price(body, "tether")?;
    LiveRates::new(btc, usdt, fetched_at)
}

fn price(body: &Value, asset: &str) -> Result<Decimal> {
    body.get(asset)
        .and_then(|quote| quote.get("brl"))
        .filter(|v| !v.is_null())
        .and_then(parse_decimal)
        .ok_or_else(|| Error::RateUnavailable(format!("missing {}/brl price", asset)))
}

/// Fixed prices, or a feed that always fails
#[derive(Debug, Clone)]
pub struct StaticRateProvider {
    rates: std::result::Result<(Decimal, Decimal), String>,
}

impl StaticRateProvider {
    /// Always return these prices
    pub fn new(btc_to_brl: Decimal, usdt_to_brl: Decimal) -> Self {
        Self {
            rates: Ok((btc_to_brl, usdt_to_brl)),
        }
    }

    /// Always fail with `reason`
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            rates: Err(reason.into()),
        }
    }
}

#[async_trait]
impl RateProvider for StaticRateProvider {
    async fn get_rates(&self) -> Result<LiveRates> {
        match &self.rates {
            Ok((btc, usdt)) => LiveRates::new(*btc, *usdt, Utc::now()),
            Err(reason) => Err(Error::RateUnavailable(reason.clone())),
        }
    }
}
