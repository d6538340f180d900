//! Last-input-wins quoting
//!
//! Each request supersedes the one before it. A lookup that finishes after a
//! newer request was issued is dropped, never stored over fresher pricing.

use crate::{engine::SettlementEngine, rates::RateProvider, Result, SettlementQuote, SettlementRequest};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What happened to a quote request
#[derive(Debug, Clone, PartialEq)]
pub enum QuoteOutcome {
    /// Latest input; the quote is now current
    Applied(SettlementQuote),

    /// A newer request arrived first; result discarded
    Superseded,

    /// The session was closed
    Cancelled,
}

impl QuoteOutcome {
    /// Applied quote, if any
    pub fn applied(self) -> Option<SettlementQuote> {
        match self {
            QuoteOutcome::Applied(quote) => Some(quote),
            _ => None,
        }
    }
}

/// Quote state for one view of a withdrawal
#[derive(Debug)]
pub struct QuoteSession<P> {
    engine: Arc<SettlementEngine<P>>,
    generation: AtomicU64,
    in_flight: Mutex<CancellationToken>,
    closed: CancellationToken,
    latest: Mutex<Option<SettlementQuote>>,
}

impl<P: RateProvider> QuoteSession<P> {
    /// Open a session
    pub fn new(engine: Arc<SettlementEngine<P>>) -> Self {
        let closed = CancellationToken::new();
        Self {
            engine,
            generation: AtomicU64::new(0),
            in_flight: Mutex::new(closed.child_token()),
            closed,
            latest: Mutex::new(None),
        }
    }

    /// Price new input, cancelling any lookup still in flight
    pub async fn request(&self, request: SettlementRequest) -> Result<QuoteOutcome> {
        if self.closed.is_cancelled() {
            return Ok(QuoteOutcome::Cancelled);
        }

        let (ticket, token) = {
            let mut in_flight = self.in_flight.lock();
            let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let token = self.closed.child_token();
            std::mem::replace(&mut *in_flight, token.clone()).cancel();
            (ticket, token)
        };

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            quote = self.engine.quote(&request) => Some(quote),
        };

        if self.closed.is_cancelled() {
            debug!(ticket, "Quote session closed, dropping result");
            return Ok(QuoteOutcome::Cancelled);
        }

        let Some(quote) = result else {
            warn!(ticket, "Quote lookup superseded");
            return Ok(QuoteOutcome::Superseded);
        };

        let mut latest = self.latest.lock();
        if self.generation.load(Ordering::SeqCst) != ticket {
            warn!(ticket, "Quote lookup superseded");
            return Ok(QuoteOutcome::Superseded);
        }

        let quote = quote?;
        *latest = Some(quote.clone());
        Ok(QuoteOutcome::Applied(quote))
    }

    /// Last applied quote
    pub fn latest(&self) -> Option<SettlementQuote> {
        self.latest.lock().clone()
    }

    /// Cancel in-flight work and refuse further requests
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FeeConfig, LiveRates};
    use async_trait::async_trait;
    use chrono::Utc;
    use records_core::WalletType;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Answers each lookup with the next `(delay, btc price)` pair
    #[derive(Debug)]
    struct SequencedProvider {
        answers: Mutex<VecDeque<(Duration, Decimal)>>,
    }

    impl SequencedProvider {
        fn new(answers: Vec<(u64, Decimal)>) -> Self {
            Self {
                answers: Mutex::new(
                    answers
                        .into_iter()
                        .map(|(ms, btc)| (Duration::from_millis(ms), btc))
                        .collect(),
                ),
            }
        }
    }

    #[async_trait]
    impl RateProvider for SequencedProvider {
        async fn get_rates(&self) -> Result<LiveRates> {
            let next = self.answers.lock().pop_front();
            let (delay, btc) = next.expect("unexpected lookup");
            tokio::time::sleep(delay).await;
            LiveRates::new(btc, dec!(5.5), Utc::now())
        }
    }

    fn session(answers: Vec<(u64, Decimal)>) -> QuoteSession<SequencedProvider> {
        QuoteSession::new(Arc::new(SettlementEngine::new(
            FeeConfig::default(),
            SequencedProvider::new(answers),
        )))
    }

    fn btc_request(amount: Decimal) -> SettlementRequest {
        SettlementRequest::new(amount, WalletType::OnChainAddress)
    }

    fn market_rate(quote: &SettlementQuote) -> Decimal {
        match &quote.conversion {
            crate::Conversion::Crypto { market_rate, .. } => *market_rate,
            other => panic!("unexpected conversion {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_stale_lookup_is_discarded() {
        let session = session(vec![(100, dec!(300000)), (10, dec!(400000))]);

        let (first, second) = tokio::join!(
            session.request(btc_request(dec!(1000))),
            session.request(btc_request(dec!(2000))),
        );

        assert_eq!(first.unwrap(), QuoteOutcome::Superseded);
        let applied = second.unwrap().applied().unwrap();
        assert_eq!(applied.fees.amount, dec!(2000));
        assert_eq!(market_rate(&applied), dec!(400000));
        assert_eq!(session.latest(), Some(applied));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_requests_replace_latest() {
        let session = session(vec![(5, dec!(300000)), (5, dec!(310000))]);

        session.request(btc_request(dec!(100))).await.unwrap();
        let second = session.request(btc_request(dec!(200))).await.unwrap();

        let latest = session.latest().unwrap();
        assert_eq!(Some(latest.clone()), second.applied());
        assert_eq!(market_rate(&latest), dec!(310000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_in_flight() {
        let session = session(vec![(100, dec!(300000))]);

        let (outcome, _) = tokio::join!(session.request(btc_request(dec!(1000))), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            session.close();
        });

        assert_eq!(outcome.unwrap(), QuoteOutcome::Cancelled);
        assert!(session.is_closed());
        assert_eq!(
            session.request(btc_request(dec!(5))).await.unwrap(),
            QuoteOutcome::Cancelled
        );
        assert_eq!(session.latest(), None);
    }
}
