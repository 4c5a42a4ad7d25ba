//! Screener configuration.

use serde::Deserialize;

/// Candidate screening settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ScreenerConfig {
    /// Number of ranked candidates kept per pass (default: 10).
    pub top_n: Option<usize>,
    /// Concurrent market-data requests while screening (default: 4).
    pub concurrency: Option<usize>,
    /// Candle interval passed to the venue (default: "MINUTE_15").
    pub candle_interval: Option<String>,
    /// Number of candles fetched per symbol (default: 100).
    pub lookback: Option<usize>,
    /// Trend filter EMA period (default: 50).
    pub ema_period: Option<usize>,
    /// ATR period (default: 14).
    pub atr_period: Option<usize>,
}
