//! Domain models for spot positions, fills and market data.

mod candidate;
mod candle;
mod order;
mod orderbook;
mod position;
mod rules;
mod trade;

pub use candidate::Candidate;
pub use candle::Candle;
pub use order::{Fill, OrderSide};
pub use orderbook::{Orderbook, PriceLevel};
pub use position::{ExitReason, Position};
pub use rules::SymbolTradingRules;
pub use trade::TradeRecord;

/// Extracts the base asset from a pair (e.g., "BTC" from "BTC/USDT").
pub fn base_asset(symbol: &str) -> &str {
    symbol.split('/').next().unwrap_or(symbol)
}
