//! Position lifecycle: entry, trailing, DCA and exit for one symbol at a time.
//!
//! Every order follows the same shape: check, submit, then either persist the
//! confirmed fill or mark the symbol unreconciled when the outcome is unknown.
//! A symbol with an order in flight or an unknown outcome is excluded from
//! every other operation until it is resolved.

mod error;
mod retry;

pub use error::{LifecycleError, Operation};
pub use retry::RetryPolicy;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::{
    Config, DcaConfig, DcaLevelConfig, OffsetMode, OffsetRule, StrategyConfig,
};
use crate::domain::{
    Candidate, ExitReason, Fill, OrderSide, Position, SymbolTradingRules, TradeRecord, base_asset,
};
use crate::exchanges::{ExchangeError, ExchangeGateway};
use crate::notification::{
    DcaData, EntryData, ErrorData, Event, ExitData, Notifier, RiskWarningData,
};
use crate::risk::{BlockReason, RiskManager, RiskState};
use crate::storage::{PositionStore, StorageError, TradeJournal};

/// 0.2% around mid.
fn default_depth_band() -> Decimal {
    Decimal::new(2, 3)
}

/// Resolved lifecycle parameters.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub strategy: StrategyConfig,
    pub max_open_positions: usize,
    pub max_spread_bps: Decimal,
    pub min_depth_quote: Decimal,
    /// Fraction around mid counted as usable depth.
    pub depth_band: Decimal,
    pub fee_rate: Decimal,
    pub retry: RetryPolicy,
}

impl LifecycleSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            strategy: config.strategy.clone(),
            max_open_positions: config.risk.max_open_positions,
            max_spread_bps: config.risk.max_spread_bps,
            min_depth_quote: config.risk.min_depth_quote,
            depth_band: config.risk.depth_band.unwrap_or_else(default_depth_band),
            fee_rate: config.risk.fee_rate,
            retry: RetryPolicy::from(config.execution.as_ref().and_then(|e| e.retry.as_ref())),
        }
    }
}

/// Why a candidate was not entered.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Already held, in flight or awaiting reconciliation.
    HeldOrPending,
    RiskBlocked(BlockReason),
    MaxPositions,
    Illiquid {
        spread_bps: Option<Decimal>,
        depth_quote: Decimal,
    },
    /// ATR-based levels requested but the candidate carries no ATR.
    NoAtr,
    /// Stop at or above the entry price, or not positive.
    InvalidLevels,
    /// Sizing returned zero or the affordable size misses the minimums.
    BelowMinimums,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::HeldOrPending => write!(f, "held or pending"),
            SkipReason::RiskBlocked(reason) => write!(f, "risk blocked: {}", reason),
            SkipReason::MaxPositions => write!(f, "max open positions reached"),
            SkipReason::Illiquid {
                spread_bps,
                depth_quote,
            } => match spread_bps {
                Some(spread) => write!(f, "illiquid: spread {} bps, depth {}", spread, depth_quote),
                None => write!(f, "illiquid: empty book side"),
            },
            SkipReason::NoAtr => write!(f, "no ATR for ATR-based levels"),
            SkipReason::InvalidLevels => write!(f, "invalid stop level"),
            SkipReason::BelowMinimums => write!(f, "size below exchange minimums"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    Opened(Position),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ManageOutcome {
    /// No exit or add this pass.
    Held,
    /// Another operation holds the symbol, or it awaits reconciliation.
    Busy,
    NotHeld,
    Closed(TradeRecord),
    Added(Position),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// The unknown entry turned out filled and the position was adopted.
    Opened(Position),
    /// The unknown exit turned out filled.
    Closed(TradeRecord),
    /// The unknown add turned out filled.
    Added(Position),
    /// The order did not execute; the symbol is released.
    NotFilled(String),
}

/// An order whose outcome the venue did not confirm.
#[derive(Debug, Clone)]
enum PendingAction {
    Entry {
        requested_qty: Decimal,
        reference_price: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        atr: Option<Decimal>,
    },
    Exit {
        reference_price: Decimal,
    },
    Add {
        requested_qty: Decimal,
        reference_price: Decimal,
        baseline_qty: Decimal,
    },
}

/// Holds a symbol for one operation; released on drop.
struct SymbolGuard<'a> {
    in_flight: &'a StdMutex<HashSet<String>>,
    symbol: String,
}

impl Drop for SymbolGuard<'_> {
    fn drop(&mut self) {
        let mut set = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        set.remove(&self.symbol);
    }
}

/// PositionLifecycle drives every open position and every new entry.
pub struct PositionLifecycle {
    gateway: Arc<dyn ExchangeGateway>,
    store: Arc<PositionStore>,
    journal: Option<Arc<dyn TradeJournal>>,
    risk: Mutex<RiskManager>,
    notifier: Arc<dyn Notifier>,
    settings: LifecycleSettings,
    rules_cache: RwLock<HashMap<String, SymbolTradingRules>>,
    in_flight: StdMutex<HashSet<String>>,
    unreconciled: Mutex<HashMap<String, PendingAction>>,
    /// Set once a breaker warning went out; cleared on day roll.
    breaker_warned: AtomicBool,
}

impl PositionLifecycle {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        store: Arc<PositionStore>,
        journal: Option<Arc<dyn TradeJournal>>,
        risk: RiskManager,
        notifier: Arc<dyn Notifier>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            gateway,
            store,
            journal,
            risk: Mutex::new(risk),
            notifier,
            settings,
            rules_cache: RwLock::new(HashMap::new()),
            in_flight: StdMutex::new(HashSet::new()),
            unreconciled: Mutex::new(HashMap::new()),
            breaker_warned: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<PositionStore> {
        &self.store
    }

    pub async fn risk_state(&self) -> RiskState {
        self.risk.lock().await.state().clone()
    }

    pub async fn can_trade(&self) -> bool {
        self.risk.lock().await.can_trade()
    }

    /// Symbols that are held, in flight or awaiting reconciliation.
    pub async fn held_or_pending(&self) -> HashSet<String> {
        let mut symbols: HashSet<String> = self
            .store
            .all()
            .await
            .into_iter()
            .map(|p| p.symbol)
            .collect();
        symbols.extend(self.unreconciled.lock().await.keys().cloned());
        symbols.extend(self.lock_set().iter().cloned());
        symbols
    }

    /// Open positions plus entries whose outcome is still unknown. An
    /// unknown entry may have filled, so it holds a slot until reconciled.
    pub async fn open_slots_used(&self) -> usize {
        let held = self.store.len().await;
        let pending_entries = self
            .unreconciled
            .lock()
            .await
            .values()
            .filter(|action| matches!(action, PendingAction::Entry { .. }))
            .count();
        held + pending_entries
    }

    pub async fn unreconciled_count(&self) -> usize {
        self.unreconciled.lock().await.len()
    }

    /// Resets the risk ledger on a new calendar day. Returns true if it rolled.
    pub async fn roll_day(&self, today: NaiveDate) -> bool {
        let rolled = self.risk.lock().await.roll_day(today);
        if rolled {
            self.breaker_warned.store(false, Ordering::SeqCst);
        }
        rolled
    }

    /// Rebuilds today's risk ledger by replaying today's journaled trades in
    /// close order, so a cooldown latched earlier in the day stays latched.
    pub async fn restore_risk_state(&self, today: NaiveDate) -> Result<(), StorageError> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        let since = today
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc())
            .unwrap_or_else(Utc::now);

        let trades = journal.closed_since(since).await?;
        let mut risk = self.risk.lock().await;
        let mut replayed = RiskManager::new(*risk.settings(), today);
        for trade in &trades {
            replayed.register_trade_result(trade.realized_pnl);
        }

        let state = replayed.state();
        info!(
            trades = trades.len(),
            realized_pnl = %state.daily_realized_pnl,
            consecutive_losses = state.consecutive_losses,
            cooldown = state.cooldown_active,
            "risk state restored from journal"
        );
        *risk = replayed;
        Ok(())
    }

    // === Entry ===

    /// Attempts to open a position for a screened candidate.
    pub async fn try_enter(&self, candidate: &Candidate) -> Result<EntryOutcome, LifecycleError> {
        let symbol = candidate.symbol.as_str();

        if self.unreconciled.lock().await.contains_key(symbol) || self.store.contains(symbol).await
        {
            return Ok(EntryOutcome::Skipped(SkipReason::HeldOrPending));
        }
        let Some(_guard) = self.try_lock_symbol(symbol) else {
            return Ok(EntryOutcome::Skipped(SkipReason::HeldOrPending));
        };
        // The store may have changed while the guard was not held
        if self.store.contains(symbol).await {
            return Ok(EntryOutcome::Skipped(SkipReason::HeldOrPending));
        }

        let blocked = self.risk.lock().await.block_reason();
        if let Some(reason) = blocked {
            self.warn_breaker(reason).await;
            return Ok(EntryOutcome::Skipped(SkipReason::RiskBlocked(reason)));
        }

        if self.open_slots_used().await >= self.settings.max_open_positions {
            return Ok(EntryOutcome::Skipped(SkipReason::MaxPositions));
        }

        let op = Operation::Enter;
        let rules = self.rules(symbol).await.map_err(|e| read_error(symbol, op, e))?;

        let book = self
            .gateway
            .get_orderbook(symbol)
            .await
            .map_err(|e| read_error(symbol, op, e))?;
        let spread_bps = book.spread_bps();
        let depth_quote = book.depth_quote(self.settings.depth_band);
        let liquid = spread_bps.is_some_and(|spread| {
            RiskManager::validate_liquidity(
                spread,
                self.settings.max_spread_bps,
                depth_quote,
                self.settings.min_depth_quote,
            )
        });
        if !liquid {
            debug!(symbol = %symbol, spread_bps = ?spread_bps, depth_quote = %depth_quote, "liquidity check failed");
            return Ok(EntryOutcome::Skipped(SkipReason::Illiquid {
                spread_bps,
                depth_quote,
            }));
        }

        let price = self
            .gateway
            .current_price(symbol)
            .await
            .map_err(|e| read_error(symbol, op, e))?;

        let Some((stop_loss, take_profit)) = self.exit_levels(price, candidate.atr, &rules) else {
            return Ok(EntryOutcome::Skipped(SkipReason::NoAtr));
        };
        if stop_loss <= Decimal::ZERO || stop_loss >= price {
            warn!(symbol = %symbol, price = %price, stop_loss = %stop_loss, "stop level not below entry, skipping");
            return Ok(EntryOutcome::Skipped(SkipReason::InvalidLevels));
        }

        let balance = self
            .gateway
            .fetch_quote_balance()
            .await
            .map_err(|e| read_error(symbol, op, e))?;

        let mut qty = self
            .risk
            .lock()
            .await
            .size_position(balance, price, stop_loss, &rules);
        if qty.checked_mul(price).is_none_or(|notional| notional > balance) {
            // Risk-based size exceeds what the balance can pay for
            qty = balance
                .checked_div(price)
                .map_or(Decimal::ZERO, |affordable| rules.floor_qty(affordable));
        }
        if !rules.accepts(qty, price) {
            debug!(symbol = %symbol, qty = %qty, balance = %balance, "entry size below minimums");
            return Ok(EntryOutcome::Skipped(SkipReason::BelowMinimums));
        }

        info!(
            symbol = %symbol,
            qty = %qty,
            price = %price,
            stop_loss = %stop_loss,
            take_profit = %take_profit,
            score = %candidate.score,
            "submitting entry order"
        );

        let fill = match self.gateway.place_market_order(symbol, OrderSide::Buy, qty).await {
            Ok(fill) if fill.filled_quantity > Decimal::ZERO => fill,
            Ok(_) => {
                return Err(self
                    .order_rejected(symbol, op, "empty fill".to_string())
                    .await);
            }
            Err(e) if e.is_outcome_unknown() => {
                let pending = PendingAction::Entry {
                    requested_qty: qty,
                    reference_price: price,
                    stop_loss,
                    take_profit,
                    atr: candidate.atr,
                };
                return Err(self.mark_unreconciled(symbol, op, pending, &e).await);
            }
            Err(e) => return Err(self.order_rejected(symbol, op, e.to_string()).await),
        };

        // Levels follow the actual fill price
        let (stop_loss, take_profit) = self
            .exit_levels(fill.filled_price, candidate.atr, &rules)
            .filter(|(stop, _)| *stop > Decimal::ZERO && *stop < fill.filled_price)
            .unwrap_or((stop_loss, take_profit));

        let position = Position::open(
            symbol,
            &fill,
            stop_loss,
            take_profit,
            candidate.atr,
            &self.settings.strategy.tag,
        );
        self.commit_entry(position).await.map(EntryOutcome::Opened)
    }

    async fn commit_entry(&self, position: Position) -> Result<Position, LifecycleError> {
        let symbol = position.symbol.clone();
        self.persist(&symbol, Operation::Enter, || self.store.upsert(position.clone()))
            .await?;

        info!(
            symbol = %symbol,
            qty = %position.quantity,
            price = %position.average_entry_price,
            stop_loss = %position.stop_loss_price,
            take_profit = %position.take_profit_price,
            "position opened"
        );
        self.notify(Event::entry_opened(EntryData {
            symbol: symbol.clone(),
            quantity: to_f64(position.quantity),
            price: to_f64(position.average_entry_price),
            notional: to_f64(position.invested_quote),
            stop_loss: to_f64(position.stop_loss_price),
            take_profit: to_f64(position.take_profit_price),
        }))
        .await;
        Ok(position)
    }

    // === Management ===

    /// Runs one management pass for a held symbol: trailing, then at most
    /// one of exit or DCA add.
    pub async fn manage(&self, symbol: &str) -> Result<ManageOutcome, LifecycleError> {
        if self.unreconciled.lock().await.contains_key(symbol) {
            return Ok(ManageOutcome::Busy);
        }
        let Some(_guard) = self.try_lock_symbol(symbol) else {
            return Ok(ManageOutcome::Busy);
        };
        let Some(mut position) = self.store.get(symbol).await else {
            return Ok(ManageOutcome::NotHeld);
        };

        let op = Operation::Manage;
        let price = self
            .gateway
            .current_price(symbol)
            .await
            .map_err(|e| read_error(symbol, op, e))?;

        if track_price(&mut position, price, self.settings.strategy.trailing) {
            debug!(
                symbol = %symbol,
                highest = %position.highest_price_since_entry,
                stop_loss = %position.stop_loss_price,
                "position levels updated"
            );
            if let Err(e) = self.store.upsert(position.clone()).await {
                warn!(symbol = %symbol, error = %e, "failed to persist trailing update");
            }
        }

        // Stop wins over take-profit when both trigger on the same price
        if price <= position.stop_loss_price {
            let reason = if position.is_trailing() {
                ExitReason::TrailingStop
            } else {
                ExitReason::StopLoss
            };
            return self.exit(position, price, reason).await;
        }
        if price >= position.take_profit_price {
            return self.exit(position, price, ExitReason::TakeProfit).await;
        }

        if let Some(dca) = &self.settings.strategy.dca {
            if let Some(level) = next_dca_level(&position, price, dca) {
                return self.add(position, price, level).await;
            }
        }

        Ok(ManageOutcome::Held)
    }

    async fn exit(
        &self,
        position: Position,
        price: Decimal,
        reason: ExitReason,
    ) -> Result<ManageOutcome, LifecycleError> {
        let symbol = position.symbol.clone();
        let op = Operation::Exit;

        info!(
            symbol = %symbol,
            qty = %position.quantity,
            price = %price,
            stop_loss = %position.stop_loss_price,
            reason = %reason,
            "submitting exit order"
        );

        match self
            .gateway
            .place_market_order(&symbol, OrderSide::Sell, position.quantity)
            .await
        {
            Ok(fill) if fill.filled_quantity > Decimal::ZERO => {
                let record = self
                    .complete_exit(&position, fill.filled_price, reason, fill.timestamp)
                    .await?;
                Ok(ManageOutcome::Closed(record))
            }
            Ok(_) => Err(self.order_rejected(&symbol, op, "empty fill".to_string()).await),
            Err(e) if e.is_outcome_unknown() => {
                let pending = PendingAction::Exit {
                    reference_price: price,
                };
                Err(self.mark_unreconciled(&symbol, op, pending, &e).await)
            }
            Err(e) => Err(self.order_rejected(&symbol, op, e.to_string()).await),
        }
    }

    /// Removes the position, books PnL once, then journals and notifies.
    async fn complete_exit(
        &self,
        position: &Position,
        exit_price: Decimal,
        reason: ExitReason,
        closed_at: DateTime<Utc>,
    ) -> Result<TradeRecord, LifecycleError> {
        let symbol = position.symbol.as_str();
        let record = TradeRecord::close(position, exit_price, self.settings.fee_rate, reason, closed_at);

        self.persist(symbol, Operation::Exit, || self.store.remove(symbol))
            .await?;

        let blocked = {
            let mut risk = self.risk.lock().await;
            risk.register_trade_result(record.realized_pnl);
            risk.block_reason()
        };

        info!(
            symbol = %symbol,
            qty = %record.quantity,
            entry_price = %record.entry_price,
            exit_price = %record.exit_price,
            pnl = %record.realized_pnl,
            reason = %reason,
            "position closed"
        );

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(&record).await {
                warn!(symbol = %symbol, error = %e, "failed to journal closed trade");
            }
        }

        let holding_time = (closed_at - position.opened_at).to_std().unwrap_or_default();
        self.notify(Event::position_closed(ExitData {
            symbol: symbol.to_string(),
            reason: reason.to_string(),
            quantity: to_f64(record.quantity),
            entry_price: to_f64(record.entry_price),
            exit_price: to_f64(record.exit_price),
            pnl: to_f64(record.realized_pnl),
            fees: to_f64(record.fees),
            holding_time,
        }))
        .await;

        if let Some(reason) = blocked {
            self.warn_breaker(reason).await;
        }
        Ok(record)
    }

    async fn add(
        &self,
        mut position: Position,
        price: Decimal,
        level: DcaLevelConfig,
    ) -> Result<ManageOutcome, LifecycleError> {
        let symbol = position.symbol.clone();
        let op = Operation::Add;

        let blocked = self.risk.lock().await.block_reason();
        if let Some(reason) = blocked {
            debug!(symbol = %symbol, reason = %reason, "DCA add skipped, risk blocked");
            self.warn_breaker(reason).await;
            return Ok(ManageOutcome::Held);
        }

        if let Some(cap) = self.settings.strategy.max_invested_per_symbol {
            if position.invested_quote + level.allocation > cap {
                debug!(
                    symbol = %symbol,
                    invested = %position.invested_quote,
                    allocation = %level.allocation,
                    cap = %cap,
                    "DCA add skipped, symbol budget exhausted"
                );
                return Ok(ManageOutcome::Held);
            }
        }

        let balance = self
            .gateway
            .fetch_quote_balance()
            .await
            .map_err(|e| read_error(&symbol, op, e))?;
        if balance < level.allocation {
            debug!(symbol = %symbol, balance = %balance, allocation = %level.allocation, "DCA add skipped, insufficient balance");
            return Ok(ManageOutcome::Held);
        }

        let rules = self.rules(&symbol).await.map_err(|e| read_error(&symbol, op, e))?;
        let qty = level
            .allocation
            .checked_div(price)
            .map_or(Decimal::ZERO, |q| rules.floor_qty(q));
        if !rules.accepts(qty, price) {
            debug!(symbol = %symbol, qty = %qty, "DCA add below minimums");
            return Ok(ManageOutcome::Held);
        }

        info!(
            symbol = %symbol,
            level = position.dca_levels_filled + 1,
            qty = %qty,
            price = %price,
            "submitting DCA order"
        );

        let fill = match self.gateway.place_market_order(&symbol, OrderSide::Buy, qty).await {
            Ok(fill) if fill.filled_quantity > Decimal::ZERO => fill,
            Ok(_) => return Err(self.order_rejected(&symbol, op, "empty fill".to_string()).await),
            Err(e) if e.is_outcome_unknown() => {
                let pending = PendingAction::Add {
                    requested_qty: qty,
                    reference_price: price,
                    baseline_qty: position.quantity,
                };
                return Err(self.mark_unreconciled(&symbol, op, pending, &e).await);
            }
            Err(e) => return Err(self.order_rejected(&symbol, op, e.to_string()).await),
        };

        position.apply_add(&fill);
        self.commit_add(position, &fill).await.map(ManageOutcome::Added)
    }

    async fn commit_add(&self, position: Position, fill: &Fill) -> Result<Position, LifecycleError> {
        let symbol = position.symbol.clone();
        self.persist(&symbol, Operation::Add, || self.store.upsert(position.clone()))
            .await?;

        info!(
            symbol = %symbol,
            level = position.dca_levels_filled,
            qty = %fill.filled_quantity,
            price = %fill.filled_price,
            average_entry_price = %position.average_entry_price,
            "DCA add filled"
        );
        self.notify(Event::dca_executed(DcaData {
            symbol: symbol.clone(),
            level: position.dca_levels_filled,
            quantity: to_f64(fill.filled_quantity),
            price: to_f64(fill.filled_price),
            average_entry_price: to_f64(position.average_entry_price),
            total_quantity: to_f64(position.quantity),
            invested: to_f64(position.invested_quote),
        }))
        .await;
        Ok(position)
    }

    // === Reconciliation ===

    /// Resolves orders with unknown outcome against the venue's balances.
    ///
    /// A symbol whose balance cannot be read stays pending. Only persistence
    /// failures are returned as errors.
    pub async fn reconcile_pending(&self) -> Result<Vec<ReconcileOutcome>, LifecycleError> {
        let pending: Vec<(String, PendingAction)> = self
            .unreconciled
            .lock()
            .await
            .iter()
            .map(|(s, a)| (s.clone(), a.clone()))
            .collect();

        let mut outcomes = Vec::new();
        for (symbol, action) in pending {
            let Some(_guard) = self.try_lock_symbol(&symbol) else {
                continue;
            };
            match self.reconcile_one(&symbol, action).await {
                Ok(outcome) => {
                    self.unreconciled.lock().await.remove(&symbol);
                    info!(symbol = %symbol, outcome = ?outcome, "order outcome reconciled");
                    outcomes.push(outcome);
                }
                Err(e) if e.is_fatal() => {
                    self.unreconciled.lock().await.remove(&symbol);
                    return Err(e);
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "reconciliation deferred");
                }
            }
        }
        Ok(outcomes)
    }

    async fn reconcile_one(
        &self,
        symbol: &str,
        action: PendingAction,
    ) -> Result<ReconcileOutcome, LifecycleError> {
        let op = Operation::Reconcile;
        let rules = self.rules(symbol).await.map_err(|e| transport(symbol, op, e))?;
        let held = self
            .gateway
            .fetch_asset_balance(base_asset(symbol))
            .await
            .map_err(|e| transport(symbol, op, e))?;

        match action {
            PendingAction::Entry {
                requested_qty,
                reference_price,
                stop_loss,
                take_profit,
                atr,
            } => {
                let qty = rules.floor_qty(held.min(requested_qty));
                if qty <= Decimal::ZERO || qty < rules.min_qty {
                    return Ok(ReconcileOutcome::NotFilled(symbol.to_string()));
                }
                let fill = Fill {
                    order_id: "reconciled".to_string(),
                    filled_quantity: qty,
                    filled_price: reference_price,
                    timestamp: Utc::now(),
                };
                let position = Position::open(
                    symbol,
                    &fill,
                    stop_loss,
                    take_profit,
                    atr,
                    &self.settings.strategy.tag,
                );
                self.commit_entry(position).await.map(ReconcileOutcome::Opened)
            }
            PendingAction::Exit { reference_price } => {
                let Some(position) = self.store.get(symbol).await else {
                    return Ok(ReconcileOutcome::NotFilled(symbol.to_string()));
                };
                if held >= rules.min_qty && held > Decimal::ZERO {
                    // Still holding: the next management pass retries the exit
                    return Ok(ReconcileOutcome::NotFilled(symbol.to_string()));
                }
                self.complete_exit(&position, reference_price, ExitReason::Reconciled, Utc::now())
                    .await
                    .map(ReconcileOutcome::Closed)
            }
            PendingAction::Add {
                requested_qty,
                reference_price,
                baseline_qty,
            } => {
                let Some(mut position) = self.store.get(symbol).await else {
                    return Ok(ReconcileOutcome::NotFilled(symbol.to_string()));
                };
                let grown = rules.floor_qty((held - baseline_qty).min(requested_qty));
                if grown * Decimal::TWO < requested_qty || grown <= Decimal::ZERO {
                    return Ok(ReconcileOutcome::NotFilled(symbol.to_string()));
                }
                let fill = Fill {
                    order_id: "reconciled".to_string(),
                    filled_quantity: grown,
                    filled_price: reference_price,
                    timestamp: Utc::now(),
                };
                position.apply_add(&fill);
                self.commit_add(position, &fill).await.map(ReconcileOutcome::Added)
            }
        }
    }

    // === Helpers ===

    fn lock_set(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claims a symbol for one operation. None if another operation holds it.
    fn try_lock_symbol(&self, symbol: &str) -> Option<SymbolGuard<'_>> {
        if !self.lock_set().insert(symbol.to_string()) {
            return None;
        }
        Some(SymbolGuard {
            in_flight: &self.in_flight,
            symbol: symbol.to_string(),
        })
    }

    async fn rules(&self, symbol: &str) -> Result<SymbolTradingRules, ExchangeError> {
        if let Some(rules) = self.rules_cache.read().await.get(symbol) {
            return Ok(*rules);
        }
        let rules = self.gateway.load_trading_rules(symbol).await?;
        self.rules_cache
            .write()
            .await
            .insert(symbol.to_string(), rules);
        Ok(rules)
    }

    /// Stop-loss and take-profit for an entry at `price`. None when a level
    /// needs an ATR that is missing.
    fn exit_levels(
        &self,
        price: Decimal,
        atr: Option<Decimal>,
        rules: &SymbolTradingRules,
    ) -> Option<(Decimal, Decimal)> {
        let stop = offset(self.settings.strategy.stop, price, atr)?;
        let take_profit = offset(self.settings.strategy.take_profit, price, atr)?;
        Some((rules.floor_price(price - stop), rules.floor_price(price + take_profit)))
    }

    /// Retries a store write with backoff. Giving up is fatal.
    async fn persist<T, F, Fut>(&self, symbol: &str, op: Operation, mut write: F) -> Result<T, LifecycleError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let policy = self.settings.retry;
        let mut attempt = 1;
        loop {
            match write().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < policy.max_attempts => {
                    let delay = policy.delay(attempt);
                    warn!(
                        symbol = %symbol,
                        op = %op,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "failed to persist position state, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        symbol = %symbol,
                        op = %op,
                        attempts = attempt,
                        error = %e,
                        "giving up persisting position state"
                    );
                    let err = LifecycleError::Persistence {
                        symbol: symbol.to_string(),
                        op,
                        reason: e.to_string(),
                    };
                    self.notify_error(&err).await;
                    return Err(err);
                }
            }
        }
    }

    async fn mark_unreconciled(
        &self,
        symbol: &str,
        op: Operation,
        action: PendingAction,
        cause: &ExchangeError,
    ) -> LifecycleError {
        warn!(symbol = %symbol, op = %op, error = %cause, "order outcome unknown, symbol excluded until reconciled");
        self.unreconciled
            .lock()
            .await
            .insert(symbol.to_string(), action);
        let err = LifecycleError::Unreconciled {
            symbol: symbol.to_string(),
            op,
        };
        self.notify_error(&err).await;
        err
    }

    async fn order_rejected(&self, symbol: &str, op: Operation, reason: String) -> LifecycleError {
        warn!(symbol = %symbol, op = %op, reason = %reason, "order rejected");
        let err = LifecycleError::Rejected {
            symbol: symbol.to_string(),
            op,
            reason,
        };
        self.notify_error(&err).await;
        err
    }

    /// Sends one risk warning per breaker trip.
    async fn warn_breaker(&self, reason: BlockReason) {
        if self.breaker_warned.swap(true, Ordering::SeqCst) {
            return;
        }
        let state = self.risk_state().await;
        warn!(reason = %reason, "new entries blocked by risk breaker");
        self.notify(Event::risk_warning(RiskWarningData {
            reason: reason.to_string(),
            daily_pnl: to_f64(state.daily_realized_pnl),
            consecutive_losses: state.consecutive_losses,
        }))
        .await;
    }

    async fn notify_error(&self, err: &LifecycleError) {
        self.notify(Event::error(ErrorData {
            component: "lifecycle".to_string(),
            message: err.to_string(),
            error: None,
        }))
        .await;
    }

    /// Queues the event; delivery never holds up a trading decision.
    async fn notify(&self, event: Event) {
        if !self.notifier.is_enabled(event.event_type) {
            return;
        }
        debug!(event_type = %event.event_type, "queueing notification");
        self.notifier.send_async(event);
    }
}

/// Records `price` and ratchets the stop from the trailing rule.
/// Returns true if either the high or the stop moved.
pub fn track_price(position: &mut Position, price: Decimal, trailing: Option<OffsetRule>) -> bool {
    let new_high = position.observe_price(price);
    let Some(rule) = trailing else {
        return new_high;
    };
    let Some(distance) = offset(rule, position.highest_price_since_entry, position.entry_atr) else {
        return new_high;
    };
    let candidate = position.highest_price_since_entry - distance;
    let moved = candidate > Decimal::ZERO && position.ratchet_stop(candidate);
    new_high || moved
}

/// Next unfilled DCA rung if `price` is at or below its trigger.
pub fn next_dca_level(position: &Position, price: Decimal, dca: &DcaConfig) -> Option<DcaLevelConfig> {
    let level = *dca.levels.get(position.dca_levels_filled as usize)?;
    let distance = offset(
        OffsetRule {
            mode: dca.mode,
            value: level.offset,
        },
        position.first_entry_price,
        position.entry_atr,
    )?;
    let trigger = position.first_entry_price - distance;
    (price <= trigger).then_some(level)
}

/// Absolute price distance of an offset rule applied at `reference`.
fn offset(rule: OffsetRule, reference: Decimal, atr: Option<Decimal>) -> Option<Decimal> {
    match rule.mode {
        OffsetMode::Percent => Some(reference * rule.value),
        OffsetMode::Atr => atr.map(|a| a * rule.value),
        OffsetMode::Absolute => Some(rule.value),
    }
}

fn read_error(symbol: &str, op: Operation, e: ExchangeError) -> LifecycleError {
    LifecycleError::Exchange {
        symbol: symbol.to_string(),
        op,
        reason: e.to_string(),
    }
}

fn transport(symbol: &str, op: Operation, e: ExchangeError) -> LifecycleError {
    LifecycleError::Transport {
        symbol: symbol.to_string(),
        op,
        reason: e.to_string(),
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

#[cfg(test)]
mod tests;
