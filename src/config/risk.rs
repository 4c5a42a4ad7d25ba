//! Risk management configuration.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Risk management settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Fraction of the quote balance risked per trade (e.g., "0.01" for 1%).
    pub risk_per_trade: Decimal,
    /// Realized loss in quote currency that halts new entries for the day.
    pub max_daily_loss: Decimal,
    /// Consecutive losing trades that trigger the cooldown (default: 3).
    #[serde(default = "default_losing_streak")]
    pub losing_streak_threshold: u32,
    /// Maximum number of concurrently open positions (default: 3).
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
    /// Widest acceptable bid/ask spread in basis points.
    pub max_spread_bps: Decimal,
    /// Minimum quote-currency depth near the mid price.
    pub min_depth_quote: Decimal,
    /// Band around the mid price counted as depth (default: "0.002").
    pub depth_band: Option<Decimal>,
    /// Fee rate applied to both legs when a trade closes (default: 0).
    #[serde(default)]
    pub fee_rate: Decimal,
}

fn default_losing_streak() -> u32 {
    3
}

fn default_max_open_positions() -> usize {
    3
}
