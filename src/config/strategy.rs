//! Entry/exit strategy parameters.

use rust_decimal::Decimal;
use serde::Deserialize;

/// How a price offset is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetMode {
    /// Fraction of the reference price (e.g., "0.02" for 2%).
    Percent,
    /// Multiple of the ATR at entry.
    Atr,
    /// Absolute price distance in quote currency.
    Absolute,
}

/// A single price offset rule.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct OffsetRule {
    pub mode: OffsetMode,
    pub value: Decimal,
}

/// One DCA ladder rung.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DcaLevelConfig {
    /// Distance below the first entry price, interpreted per `DcaConfig::mode`.
    pub offset: Decimal,
    /// Quote amount to buy at this rung.
    pub allocation: Decimal,
}

/// Dollar-cost-average ladder.
#[derive(Debug, Clone, Deserialize)]
pub struct DcaConfig {
    pub mode: OffsetMode,
    #[serde(default)]
    pub levels: Vec<DcaLevelConfig>,
}

/// Strategy settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    /// Tag written into every trade record (default: "trend").
    #[serde(default = "default_tag")]
    pub tag: String,
    /// Initial stop-loss distance below entry.
    pub stop: OffsetRule,
    /// Take-profit distance above entry.
    pub take_profit: OffsetRule,
    /// Trailing stop distance below the highest price since entry (optional).
    pub trailing: Option<OffsetRule>,
    /// DCA ladder (optional).
    pub dca: Option<DcaConfig>,
    /// Cap on cumulative quote invested in one symbol, entry plus adds.
    pub max_invested_per_symbol: Option<Decimal>,
}

fn default_tag() -> String {
    "trend".to_string()
}
