//! Position sizing and trade gating.
//!
//! Pure decision logic: no I/O, no clocks except the trading day handed in by
//! the caller. `RiskManager` is the only writer of `RiskState`.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::config::RiskConfig;
use crate::domain::SymbolTradingRules;

/// Risk budget parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskSettings {
    /// Fraction of the quote balance risked per trade.
    pub risk_per_trade: Decimal,
    /// Realized daily loss (quote) at which new entries stop.
    pub max_daily_loss: Decimal,
    /// Consecutive losses that latch the cooldown.
    pub losing_streak_threshold: u32,
}

impl From<&RiskConfig> for RiskSettings {
    fn from(cfg: &RiskConfig) -> Self {
        Self {
            risk_per_trade: cfg.risk_per_trade,
            max_daily_loss: cfg.max_daily_loss.abs(),
            losing_streak_threshold: cfg.losing_streak_threshold,
        }
    }
}

/// Process-wide risk ledger, reset on a calendar-day boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub daily_realized_pnl: Decimal,
    pub consecutive_losses: u32,
    /// Latched by a losing streak; cleared only by a reset.
    pub cooldown_active: bool,
    pub trading_day: NaiveDate,
}

impl RiskState {
    pub fn new(trading_day: NaiveDate) -> Self {
        Self {
            daily_realized_pnl: Decimal::ZERO,
            consecutive_losses: 0,
            cooldown_active: false,
            trading_day,
        }
    }
}

/// Why new entries are currently refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Losing streak reached the threshold.
    Cooldown { consecutive_losses: u32 },
    /// Daily realized loss reached the budget.
    DailyLoss { realized: Decimal, limit: Decimal },
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::Cooldown { consecutive_losses } => {
                write!(f, "cooldown after {} consecutive losses", consecutive_losses)
            }
            BlockReason::DailyLoss { realized, limit } => {
                write!(f, "daily loss {} reached limit -{}", realized, limit)
            }
        }
    }
}

/// RiskManager turns the risk policy into order sizes and entry gates.
#[derive(Debug, Clone)]
pub struct RiskManager {
    settings: RiskSettings,
    state: RiskState,
}

impl RiskManager {
    /// Creates a manager with a clean ledger for `trading_day`.
    pub fn new(settings: RiskSettings, trading_day: NaiveDate) -> Self {
        Self::restore(settings, RiskState::new(trading_day))
    }

    /// Creates a manager continuing from a previously recorded ledger.
    pub fn restore(settings: RiskSettings, state: RiskState) -> Self {
        Self { settings, state }
    }

    pub fn settings(&self) -> &RiskSettings {
        &self.settings
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    /// Returns true if new risk may be taken right now.
    pub fn can_trade(&self) -> bool {
        self.block_reason().is_none()
    }

    /// Returns the reason entries are blocked, if any.
    pub fn block_reason(&self) -> Option<BlockReason> {
        if self.state.cooldown_active {
            return Some(BlockReason::Cooldown {
                consecutive_losses: self.state.consecutive_losses,
            });
        }
        if self.state.daily_realized_pnl <= -self.settings.max_daily_loss {
            return Some(BlockReason::DailyLoss {
                realized: self.state.daily_realized_pnl,
                limit: self.settings.max_daily_loss,
            });
        }
        None
    }

    /// Books the PnL of one closed trade.
    ///
    /// Must be called exactly once per closed trade.
    pub fn register_trade_result(&mut self, pnl: Decimal) {
        self.state.daily_realized_pnl += pnl;

        if pnl < Decimal::ZERO {
            self.state.consecutive_losses += 1;
            if self.state.consecutive_losses >= self.settings.losing_streak_threshold
                && !self.state.cooldown_active
            {
                self.state.cooldown_active = true;
                warn!(
                    consecutive_losses = self.state.consecutive_losses,
                    "losing streak threshold reached, cooldown active"
                );
            }
        } else {
            self.state.consecutive_losses = 0;
        }
    }

    /// Resets the ledger if `today` differs from the current trading day.
    /// Returns true if a reset happened.
    pub fn roll_day(&mut self, today: NaiveDate) -> bool {
        if today == self.state.trading_day {
            return false;
        }
        info!(
            previous_day = %self.state.trading_day,
            day = %today,
            realized_pnl = %self.state.daily_realized_pnl,
            "trading day rolled over, risk state reset"
        );
        self.reset(today);
        true
    }

    /// Clears PnL, streak and cooldown.
    pub fn reset(&mut self, trading_day: NaiveDate) {
        self.state = RiskState::new(trading_day);
    }

    /// Computes the base quantity risking `risk_per_trade` of the balance
    /// between `entry_price` and `stop_price`.
    ///
    /// Returns zero when the inputs are invalid or the exchange minimums
    /// cannot be met. Rounds down to the quantity step, except that an order
    /// below the minimum notional is raised to the smallest stepped quantity
    /// that clears it.
    pub fn size_position(
        &self,
        balance_quote: Decimal,
        entry_price: Decimal,
        stop_price: Decimal,
        rules: &SymbolTradingRules,
    ) -> Decimal {
        if entry_price <= Decimal::ZERO || stop_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let stop_distance = (entry_price - stop_price).abs();
        if stop_distance.is_zero() {
            return Decimal::ZERO;
        }

        let Some(risk_amount) = balance_quote.checked_mul(self.settings.risk_per_trade) else {
            return Decimal::ZERO;
        };
        if risk_amount <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        // Overflow on a tiny stop distance fails closed
        let Some(raw_qty) = risk_amount.checked_div(stop_distance) else {
            return Decimal::ZERO;
        };
        let mut qty = rules.floor_qty(raw_qty);
        if qty <= Decimal::ZERO || qty < rules.min_qty {
            return Decimal::ZERO;
        }

        let below_notional = qty
            .checked_mul(entry_price)
            .is_some_and(|notional| notional < rules.min_notional);
        if below_notional {
            let Some(min_qty) = rules.min_notional.checked_div(entry_price) else {
                return Decimal::ZERO;
            };
            qty = rules.ceil_qty(min_qty);
            if qty <= Decimal::ZERO || qty < rules.min_qty {
                return Decimal::ZERO;
            }
        }

        qty
    }

    /// Pre-entry liquidity gate: spread at or below the maximum and depth at
    /// or above the minimum.
    pub fn validate_liquidity(
        spread_bps: Decimal,
        max_spread_bps: Decimal,
        depth_quote: Decimal,
        min_depth_quote: Decimal,
    ) -> bool {
        spread_bps <= max_spread_bps && depth_quote >= min_depth_quote
    }
}
