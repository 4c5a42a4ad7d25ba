//! Common utilities for exchange implementations.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::domain::PriceLevel;
use crate::exchanges::{ExchangeError, Result};

/// Converts "BTC/USDT" to "BTC_USDT".
pub fn pair_to_symbol(pair: &str) -> String {
    pair.replace('/', "_")
}

/// Parses a decimal field of a venue response.
pub fn parse_decimal(field: &str, raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw.trim())
        .map_err(|e| ExchangeError::Transport(format!("invalid {} {:?}: {}", field, raw, e)))
}

/// Converts a decimal-places scale into a step (2 -> 0.01).
pub fn step_from_scale(scale: u32) -> Decimal {
    Decimal::new(1, scale)
}

/// Parses a flat array of [price, qty, price, qty, ...] into PriceLevels.
pub fn parse_price_levels(data: &[String]) -> Vec<PriceLevel> {
    data.chunks(2)
        .filter_map(|chunk| {
            if chunk.len() == 2 {
                let price = Decimal::from_str(&chunk[0]).ok()?;
                let quantity = Decimal::from_str(&chunk[1]).ok()?;
                Some(PriceLevel { price, quantity })
            } else {
                None
            }
        })
        .collect()
}
