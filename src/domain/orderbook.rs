//! Orderbook snapshot and liquidity measures.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// PriceLevel represents a single price level in the orderbook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Orderbook represents the current state of bids and asks for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Orderbook {
    /// The trading pair in "BASE/QUOTE" format (e.g., "BTC/USDT").
    pub symbol: String,
    /// Sorted list of bid price levels (highest to lowest).
    pub bids: Vec<PriceLevel>,
    /// Sorted list of ask price levels (lowest to highest).
    pub asks: Vec<PriceLevel>,
    /// Timestamp when this orderbook was captured.
    pub timestamp: SystemTime,
}

impl Orderbook {
    /// Returns the best bid price level, if available.
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    /// Returns the best ask price level, if available.
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// Midpoint between best bid and best ask.
    pub fn mid(&self) -> Option<Decimal> {
        match (self.best_ask(), self.best_bid()) {
            (Some(ask), Some(bid)) => Some((ask.price + bid.price) / Decimal::TWO),
            _ => None,
        }
    }

    /// Spread relative to the mid price, in basis points.
    pub fn spread_bps(&self) -> Option<Decimal> {
        let (ask, bid) = (self.best_ask()?, self.best_bid()?);
        let mid = self.mid()?;
        if mid <= Decimal::ZERO {
            return None;
        }
        Some((ask.price - bid.price) / mid * Decimal::from(10_000))
    }

    /// Quote value resting within `band` (fraction of mid) on both sides.
    pub fn depth_quote(&self, band: Decimal) -> Decimal {
        let mid = match self.mid() {
            Some(mid) => mid,
            None => return Decimal::ZERO,
        };
        let low = mid * (Decimal::ONE - band);
        let high = mid * (Decimal::ONE + band);

        let bid_depth: Decimal = self
            .bids
            .iter()
            .filter(|l| l.price >= low)
            .map(|l| l.price * l.quantity)
            .sum();
        let ask_depth: Decimal = self
            .asks
            .iter()
            .filter(|l| l.price <= high)
            .map(|l| l.price * l.quantity)
            .sum();

        bid_depth + ask_depth
    }
}
