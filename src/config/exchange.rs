//! Exchange configuration.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Settings for the trading venue.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    /// Venue identifier (e.g., "poloniex").
    pub name: String,
    /// Whether the venue should be used.
    #[serde(default)]
    pub enabled: bool,
    /// Enable testnet/sandbox mode.
    #[serde(default)]
    pub testnet: bool,
    /// API key (loaded from environment variable).
    #[serde(skip)]
    pub api_key: String,
    /// API secret (loaded from environment variable).
    #[serde(skip)]
    pub api_secret: String,
    /// Quote currency all positions are valued in (default: USDT).
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    /// Maximum API requests per minute.
    pub rate_limit: Option<i32>,
    /// Starting quote balance for dry-run mode (default: 1000).
    pub paper_balance: Option<Decimal>,
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}
