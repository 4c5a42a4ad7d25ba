//! Closed trade record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{ExitReason, OrderSide, Position};

/// TradeRecord is an append-only log entry written when a position fully closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    /// Side of the closing order; always sell for long spot positions.
    pub side: OrderSide,
    pub quantity: Decimal,
    /// Average cost basis of the closed position.
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    /// PnL after fees.
    pub realized_pnl: Decimal,
    pub fees: Decimal,
    pub reason: ExitReason,
    pub strategy: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

impl TradeRecord {
    /// Builds the record for selling all of `position` at `exit_price`.
    pub fn close(
        position: &Position,
        exit_price: Decimal,
        fee_rate: Decimal,
        reason: ExitReason,
        closed_at: DateTime<Utc>,
    ) -> Self {
        let (realized_pnl, fees) = position.realized_pnl(exit_price, fee_rate);
        Self {
            symbol: position.symbol.clone(),
            side: OrderSide::Sell,
            quantity: position.quantity,
            entry_price: position.average_entry_price,
            exit_price,
            realized_pnl,
            fees,
            reason,
            strategy: position.strategy.clone(),
            opened_at: position.opened_at,
            closed_at,
        }
    }

    pub fn is_win(&self) -> bool {
        self.realized_pnl >= Decimal::ZERO
    }
}
