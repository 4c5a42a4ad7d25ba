//! Runtime statistics for the bot.

use rust_decimal::prelude::ToPrimitive;

use crate::domain::TradeRecord;

/// Runtime statistics for the bot.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub passes: u64,
    pub entries: u64,
    pub exits: u64,
    pub wins: u64,
    pub losses: u64,
    pub dca_adds: u64,
    pub errors: u64,
    pub realized_pnl: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
}

impl Stats {
    /// Folds a closed trade into the totals.
    pub fn record_close(&mut self, record: &TradeRecord) {
        let pnl = record.realized_pnl.to_f64().unwrap_or_default();
        if self.exits == 0 {
            self.best_trade = pnl;
            self.worst_trade = pnl;
        } else {
            self.best_trade = self.best_trade.max(pnl);
            self.worst_trade = self.worst_trade.min(pnl);
        }
        self.exits += 1;
        if record.is_win() {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        self.realized_pnl += pnl;
    }
}
