//! Candidate ranking for new entries.

pub mod indicators;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::config::ScreenerConfig;
use crate::domain::{Candidate, Candle};
use crate::exchanges::ExchangeGateway;

const DEFAULT_TOP_N: usize = 10;
const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_CANDLE_INTERVAL: &str = "MINUTE_15";
const DEFAULT_LOOKBACK: usize = 100;
const DEFAULT_EMA_PERIOD: usize = 50;
const DEFAULT_ATR_PERIOD: usize = 14;

/// CandidateSource produces a fresh ranked list on every call.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Returns candidates ordered best first.
    async fn ranked_candidates(&self) -> Vec<Candidate>;
}

/// Resolved screener parameters.
#[derive(Debug, Clone)]
pub struct ScreenerSettings {
    pub top_n: usize,
    pub concurrency: usize,
    pub candle_interval: String,
    pub lookback: usize,
    pub ema_period: usize,
    pub atr_period: usize,
}

impl Default for ScreenerSettings {
    fn default() -> Self {
        Self {
            top_n: DEFAULT_TOP_N,
            concurrency: DEFAULT_CONCURRENCY,
            candle_interval: DEFAULT_CANDLE_INTERVAL.to_string(),
            lookback: DEFAULT_LOOKBACK,
            ema_period: DEFAULT_EMA_PERIOD,
            atr_period: DEFAULT_ATR_PERIOD,
        }
    }
}

impl From<Option<&ScreenerConfig>> for ScreenerSettings {
    fn from(config: Option<&ScreenerConfig>) -> Self {
        let defaults = Self::default();
        let Some(c) = config else {
            return defaults;
        };
        Self {
            top_n: c.top_n.unwrap_or(defaults.top_n),
            concurrency: c.concurrency.unwrap_or(defaults.concurrency).max(1),
            candle_interval: c
                .candle_interval
                .clone()
                .unwrap_or(defaults.candle_interval),
            lookback: c.lookback.unwrap_or(defaults.lookback),
            ema_period: c.ema_period.unwrap_or(defaults.ema_period),
            atr_period: c.atr_period.unwrap_or(defaults.atr_period),
        }
    }
}

/// MarketScreener ranks the configured universe by trend strength.
///
/// A symbol qualifies when its last close is above the EMA; its score is the
/// distance above the EMA measured in ATRs.
pub struct MarketScreener {
    gateway: Arc<dyn ExchangeGateway>,
    universe: Vec<String>,
    settings: ScreenerSettings,
}

impl MarketScreener {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        universe: Vec<String>,
        settings: ScreenerSettings,
    ) -> Self {
        Self {
            gateway,
            universe,
            settings,
        }
    }

    async fn evaluate(&self, symbol: &str) -> Option<Candidate> {
        let candles = match self
            .gateway
            .get_candles(symbol, &self.settings.candle_interval, self.settings.lookback)
            .await
        {
            Ok(candles) => candles,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "failed to fetch candles");
                return None;
            }
        };

        let candidate = score_candles(
            symbol,
            &candles,
            self.settings.ema_period,
            self.settings.atr_period,
        );
        if candidate.is_none() {
            debug!(symbol = %symbol, candles = candles.len(), "symbol did not qualify");
        }
        candidate
    }
}

/// Scores one symbol from its candle history.
pub fn score_candles(
    symbol: &str,
    candles: &[Candle],
    ema_period: usize,
    atr_period: usize,
) -> Option<Candidate> {
    let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
    let last_close = *closes.last()?;
    let ema = indicators::ema(&closes, ema_period)?;
    let atr = indicators::atr(candles, atr_period)?;

    if atr <= Decimal::ZERO || last_close <= ema {
        return None;
    }

    Some(Candidate::new(symbol, (last_close - ema) / atr).with_atr(atr))
}

#[async_trait]
impl CandidateSource for MarketScreener {
    async fn ranked_candidates(&self) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = stream::iter(
            self.universe
                .iter()
                .map(|symbol| self.evaluate(symbol))
                .collect::<Vec<_>>(),
        )
        .buffer_unordered(self.settings.concurrency)
        .filter_map(|candidate| async move { candidate })
        .collect()
        .await;

        // Ties broken by symbol so the order does not depend on arrival
        candidates.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.symbol.cmp(&b.symbol)));
        candidates.truncate(self.settings.top_n);

        info!(
            universe = self.universe.len(),
            candidates = candidates.len(),
            top = ?candidates.first().map(|c| c.symbol.as_str()),
            "screening complete"
        );
        candidates
    }
}
