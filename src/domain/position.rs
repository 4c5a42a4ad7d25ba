//! Open spot position.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Fill;

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Price reached the stop anchored at entry.
    StopLoss,
    /// Price reached a stop that had been ratcheted above the entry stop.
    TrailingStop,
    /// Price reached the take-profit level.
    TakeProfit,
    /// The venue reported the position gone after an exit with unknown outcome.
    Reconciled,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "stop_loss"),
            ExitReason::TrailingStop => write!(f, "trailing_stop"),
            ExitReason::TakeProfit => write!(f, "take_profit"),
            ExitReason::Reconciled => write!(f, "reconciled"),
        }
    }
}

impl std::str::FromStr for ExitReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop_loss" => Ok(ExitReason::StopLoss),
            "trailing_stop" => Ok(ExitReason::TrailingStop),
            "take_profit" => Ok(ExitReason::TakeProfit),
            "reconciled" => Ok(ExitReason::Reconciled),
            _ => Err(format!("Unknown exit reason: {}", s)),
        }
    }
}

/// Position is an open long exposure in one symbol.
///
/// A position never exists with zero quantity: the store drops it instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Trading pair in "BASE/QUOTE" format, unique key.
    pub symbol: String,
    /// Base units currently held.
    pub quantity: Decimal,
    /// Volume-weighted cost basis across entry and DCA fills.
    pub average_entry_price: Decimal,
    /// Cumulative quote cost basis.
    pub invested_quote: Decimal,
    /// Price of the first fill; DCA rungs hang below it.
    pub first_entry_price: Decimal,
    /// Stop set at entry, before any trailing.
    pub initial_stop_price: Decimal,
    /// Current stop; only ever moves up.
    pub stop_loss_price: Decimal,
    pub take_profit_price: Decimal,
    /// ATR observed at entry, used for ATR-scaled trailing and DCA offsets.
    pub entry_atr: Option<Decimal>,
    pub dca_levels_filled: u32,
    /// Highest observed price since entry, never decreases.
    pub highest_price_since_entry: Decimal,
    /// Strategy tag copied into the trade record.
    pub strategy: String,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Creates a position from the entry fill.
    pub fn open(
        symbol: &str,
        fill: &Fill,
        stop_loss_price: Decimal,
        take_profit_price: Decimal,
        entry_atr: Option<Decimal>,
        strategy: &str,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            quantity: fill.filled_quantity,
            average_entry_price: fill.filled_price,
            invested_quote: fill.notional(),
            first_entry_price: fill.filled_price,
            initial_stop_price: stop_loss_price,
            stop_loss_price,
            take_profit_price,
            entry_atr,
            dca_levels_filled: 0,
            highest_price_since_entry: fill.filled_price,
            strategy: strategy.to_string(),
            opened_at: fill.timestamp,
        }
    }

    /// Folds a DCA fill into the cost basis.
    ///
    /// Stop-loss stays anchored to the first entry.
    pub fn apply_add(&mut self, fill: &Fill) {
        let new_qty = self.quantity + fill.filled_quantity;
        if new_qty <= Decimal::ZERO {
            return;
        }
        self.average_entry_price = (self.average_entry_price * self.quantity
            + fill.filled_price * fill.filled_quantity)
            / new_qty;
        self.quantity = new_qty;
        self.invested_quote += fill.notional();
        self.dca_levels_filled += 1;
    }

    /// Records a price observation. Returns true if a new high was set.
    pub fn observe_price(&mut self, price: Decimal) -> bool {
        if price > self.highest_price_since_entry {
            self.highest_price_since_entry = price;
            true
        } else {
            false
        }
    }

    /// Raises the stop to `candidate` if it is higher. Returns true if it moved.
    pub fn ratchet_stop(&mut self, candidate: Decimal) -> bool {
        if candidate > self.stop_loss_price {
            self.stop_loss_price = candidate;
            true
        } else {
            false
        }
    }

    /// True once the stop has been ratcheted above the entry stop.
    pub fn is_trailing(&self) -> bool {
        self.stop_loss_price > self.initial_stop_price
    }

    /// Quote value of the position at `price`.
    pub fn market_value(&self, price: Decimal) -> Decimal {
        self.quantity * price
    }

    /// Realized PnL of selling the whole position at `exit_price`.
    ///
    /// `fee_rate` is charged on both the cost basis and the exit notional.
    pub fn realized_pnl(&self, exit_price: Decimal, fee_rate: Decimal) -> (Decimal, Decimal) {
        let gross = (exit_price - self.average_entry_price) * self.quantity;
        let fees = fee_rate * (self.invested_quote + self.market_value(exit_price));
        (gross - fees, fees)
    }
}
