use super::*;

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone};
use proptest::prelude::*;

use crate::domain::{Candle, Orderbook, PriceLevel};
use crate::exchanges::Result as ExchangeResult;
use crate::notification::{EventType, NotificationError};
use crate::risk::RiskSettings;
use crate::storage::{PersistedState, StateStore};

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

// === Mocks ===

#[derive(Debug, Clone, Copy)]
enum OrderScript {
    Reject,
    /// Executes on the venue but the call times out.
    TimeoutFilled,
    /// Times out without executing.
    TimeoutLost,
    /// Acknowledged with nothing filled.
    EmptyFill,
}

struct MockGateway {
    prices: StdMutex<HashMap<String, Decimal>>,
    spread_bps: StdMutex<Decimal>,
    quote: StdMutex<Decimal>,
    assets: StdMutex<HashMap<String, Decimal>>,
    script: StdMutex<VecDeque<OrderScript>>,
    orders: StdMutex<Vec<(String, OrderSide, Decimal)>>,
}

impl MockGateway {
    fn new(quote: &str) -> Self {
        Self {
            prices: StdMutex::new(HashMap::new()),
            spread_bps: StdMutex::new(d("10")),
            quote: StdMutex::new(d(quote)),
            assets: StdMutex::new(HashMap::new()),
            script: StdMutex::new(VecDeque::new()),
            orders: StdMutex::new(Vec::new()),
        }
    }

    fn set_price(&self, symbol: &str, price: &str) {
        self.prices.lock().unwrap().insert(symbol.to_string(), d(price));
    }

    fn set_spread(&self, bps: &str) {
        *self.spread_bps.lock().unwrap() = d(bps);
    }

    fn push_script(&self, step: OrderScript) {
        self.script.lock().unwrap().push_back(step);
    }

    fn quote(&self) -> Decimal {
        *self.quote.lock().unwrap()
    }

    fn asset(&self, asset: &str) -> Decimal {
        self.assets
            .lock()
            .unwrap()
            .get(asset)
            .copied()
            .unwrap_or_default()
    }

    fn order_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    fn price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        self.prices
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::PairNotSupported(symbol.to_string()))
    }

    fn execute(&self, symbol: &str, side: OrderSide, qty: Decimal, price: Decimal) {
        let asset = base_asset(symbol).to_string();
        let mut quote = self.quote.lock().unwrap();
        let mut assets = self.assets.lock().unwrap();
        let held = assets.entry(asset).or_default();
        match side {
            OrderSide::Buy => {
                *quote -= qty * price;
                *held += qty;
            }
            OrderSide::Sell => {
                *quote += qty * price;
                *held = (*held - qty).max(Decimal::ZERO);
            }
        }
    }
}

#[async_trait]
impl ExchangeGateway for MockGateway {
    fn name(&self) -> &str {
        "mock"
    }

    async fn load_trading_rules(&self, _symbol: &str) -> ExchangeResult<SymbolTradingRules> {
        Ok(SymbolTradingRules {
            min_qty: d("0.001"),
            min_notional: d("10"),
            qty_step: d("0.001"),
            price_step: d("0.01"),
        })
    }

    async fn current_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        self.price(symbol)
    }

    async fn get_orderbook(&self, symbol: &str) -> ExchangeResult<Orderbook> {
        let price = self.price(symbol)?;
        let half = price * *self.spread_bps.lock().unwrap() / d("20000");
        Ok(Orderbook {
            symbol: symbol.to_string(),
            bids: vec![PriceLevel {
                price: price - half,
                quantity: d("100"),
            }],
            asks: vec![PriceLevel {
                price: price + half,
                quantity: d("100"),
            }],
            timestamp: SystemTime::now(),
        })
    }

    async fn get_candles(&self, _: &str, _: &str, _: usize) -> ExchangeResult<Vec<Candle>> {
        Ok(Vec::new())
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> ExchangeResult<Fill> {
        let price = self.price(symbol)?;
        self.orders
            .lock()
            .unwrap()
            .push((symbol.to_string(), side, quantity));
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(OrderScript::Reject) => Err(ExchangeError::Rejected("insufficient liquidity".into())),
            Some(OrderScript::TimeoutFilled) => {
                self.execute(symbol, side, quantity, price);
                Err(ExchangeError::Timeout(Duration::from_secs(10)))
            }
            Some(OrderScript::TimeoutLost) => Err(ExchangeError::Timeout(Duration::from_secs(10))),
            Some(OrderScript::EmptyFill) => Ok(Fill {
                order_id: format!("mock-{}", self.order_count()),
                filled_quantity: Decimal::ZERO,
                filled_price: price,
                timestamp: Utc::now(),
            }),
            None => {
                self.execute(symbol, side, quantity, price);
                Ok(Fill {
                    order_id: format!("mock-{}", self.order_count()),
                    filled_quantity: quantity,
                    filled_price: price,
                    timestamp: Utc::now(),
                })
            }
        }
    }

    async fn fetch_quote_balance(&self) -> ExchangeResult<Decimal> {
        Ok(self.quote())
    }

    async fn fetch_asset_balance(&self, asset: &str) -> ExchangeResult<Decimal> {
        Ok(self.asset(asset))
    }
}

#[derive(Default)]
struct MemoryStore {
    state: StdMutex<Option<PersistedState>>,
    fail: AtomicBool,
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn read(&self) -> Result<Option<PersistedState>, StorageError> {
        Ok(self.state.lock().unwrap().clone())
    }

    async fn write(&self, state: &PersistedState) -> Result<(), StorageError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("disk full")));
        }
        *self.state.lock().unwrap() = Some(state.clone());
        Ok(())
    }
}

#[derive(Default)]
struct MemoryJournal {
    records: StdMutex<Vec<TradeRecord>>,
}

#[async_trait]
impl TradeJournal for MemoryJournal {
    async fn append(&self, record: &TradeRecord) -> Result<bool, StorageError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(true)
    }

    async fn closed_since(&self, since: DateTime<Utc>) -> Result<Vec<TradeRecord>, StorageError> {
        let mut records: Vec<TradeRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.closed_at >= since)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.closed_at.cmp(&b.closed_at));
        Ok(records)
    }

    async fn count(&self) -> Result<i64, StorageError> {
        Ok(self.records.lock().unwrap().len() as i64)
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    events: StdMutex<Vec<EventType>>,
}

impl RecordingNotifier {
    fn count(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| **e == event_type)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, event: &Event) -> Result<(), NotificationError> {
        self.events.lock().unwrap().push(event.event_type);
        Ok(())
    }

    fn send_async(&self, event: Event) {
        self.events.lock().unwrap().push(event.event_type);
    }

    fn is_enabled(&self, _event_type: EventType) -> bool {
        true
    }

    async fn close(&self) -> Result<(), NotificationError> {
        Ok(())
    }
}

/// Delivery takes far longer than a pass may wait.
#[derive(Default)]
struct StalledNotifier {
    queued: StdMutex<Vec<EventType>>,
}

#[async_trait]
impl Notifier for StalledNotifier {
    async fn send(&self, _event: &Event) -> Result<(), NotificationError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }

    fn send_async(&self, event: Event) {
        self.queued.lock().unwrap().push(event.event_type);
    }

    fn is_enabled(&self, _event_type: EventType) -> bool {
        true
    }

    async fn close(&self) -> Result<(), NotificationError> {
        Ok(())
    }
}

// === Harness ===

fn percent(value: &str) -> OffsetRule {
    OffsetRule {
        mode: OffsetMode::Percent,
        value: d(value),
    }
}

fn settings() -> LifecycleSettings {
    LifecycleSettings {
        strategy: StrategyConfig {
            tag: "trend".to_string(),
            stop: percent("0.02"),
            take_profit: percent("0.04"),
            trailing: None,
            dca: None,
            max_invested_per_symbol: None,
        },
        max_open_positions: 3,
        max_spread_bps: d("50"),
        min_depth_quote: d("1000"),
        depth_band: d("0.002"),
        fee_rate: Decimal::ZERO,
        retry: RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
        },
    }
}

fn risk_settings(streak: u32) -> RiskSettings {
    RiskSettings {
        risk_per_trade: d("0.01"),
        max_daily_loss: d("500"),
        losing_streak_threshold: streak,
    }
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
}

struct Harness {
    gateway: Arc<MockGateway>,
    backend: Arc<MemoryStore>,
    journal: Arc<MemoryJournal>,
    notifier: Arc<RecordingNotifier>,
    lifecycle: PositionLifecycle,
}

fn harness_with(settings: LifecycleSettings, risk: RiskSettings) -> Harness {
    let gateway = Arc::new(MockGateway::new("10000"));
    gateway.set_price("BTC/USDT", "100");
    gateway.set_price("ETH/USDT", "100");
    let backend = Arc::new(MemoryStore::default());
    let journal = Arc::new(MemoryJournal::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let lifecycle = PositionLifecycle::new(
        gateway.clone(),
        Arc::new(PositionStore::new(backend.clone())),
        Some(journal.clone()),
        RiskManager::new(risk, today()),
        notifier.clone(),
        settings,
    );
    Harness {
        gateway,
        backend,
        journal,
        notifier,
        lifecycle,
    }
}

fn harness() -> Harness {
    harness_with(settings(), risk_settings(3))
}

fn candidate(symbol: &str) -> Candidate {
    Candidate::new(symbol, d("1.5")).with_atr(d("2"))
}

async fn enter(h: &Harness, symbol: &str) -> Position {
    match h.lifecycle.try_enter(&candidate(symbol)).await.unwrap() {
        EntryOutcome::Opened(p) => p,
        other => panic!("expected entry, got {:?}", other),
    }
}

// === Entry ===

#[tokio::test]
async fn test_entry_sizes_by_stop_distance() {
    let h = harness();
    let p = enter(&h, "BTC/USDT").await;

    // risk 1% of 10000 = 100 over a 2.00 stop distance
    assert_eq!(p.quantity, d("50"));
    assert_eq!(p.average_entry_price, d("100"));
    assert_eq!(p.stop_loss_price, d("98"));
    assert_eq!(p.take_profit_price, d("104"));
    assert_eq!(p.entry_atr, Some(d("2")));
    assert!(h.lifecycle.store().contains("BTC/USDT").await);
    assert_eq!(h.gateway.asset("BTC"), d("50"));
    assert_eq!(h.notifier.count(EventType::EntryOpened), 1);

    // persisted, not just cached
    let saved = h.backend.read().await.unwrap().unwrap();
    assert!(saved.positions.contains_key("BTC/USDT"));
}

#[tokio::test]
async fn test_entry_skips_held_symbol() {
    let h = harness();
    enter(&h, "BTC/USDT").await;

    let outcome = h.lifecycle.try_enter(&candidate("BTC/USDT")).await.unwrap();
    assert_eq!(outcome, EntryOutcome::Skipped(SkipReason::HeldOrPending));
    assert_eq!(h.gateway.order_count(), 1);
}

#[tokio::test]
async fn test_entry_respects_position_ceiling() {
    let h = harness_with(
        LifecycleSettings {
            max_open_positions: 1,
            ..settings()
        },
        risk_settings(3),
    );
    enter(&h, "BTC/USDT").await;

    let outcome = h.lifecycle.try_enter(&candidate("ETH/USDT")).await.unwrap();
    assert_eq!(outcome, EntryOutcome::Skipped(SkipReason::MaxPositions));
}

#[tokio::test]
async fn test_entry_rejects_wide_spread() {
    let h = harness();
    h.gateway.set_spread("100");

    let outcome = h.lifecycle.try_enter(&candidate("BTC/USDT")).await.unwrap();
    assert!(matches!(
        outcome,
        EntryOutcome::Skipped(SkipReason::Illiquid { .. })
    ));
    assert_eq!(h.gateway.order_count(), 0);
}

#[tokio::test]
async fn test_entry_needs_atr_for_atr_stops() {
    let mut s = settings();
    s.strategy.stop = OffsetRule {
        mode: OffsetMode::Atr,
        value: d("1.5"),
    };
    let h = harness_with(s, risk_settings(3));

    let no_atr = Candidate::new("BTC/USDT", d("1"));
    let outcome = h.lifecycle.try_enter(&no_atr).await.unwrap();
    assert_eq!(outcome, EntryOutcome::Skipped(SkipReason::NoAtr));

    // 1.5 ATR of 2 below 100
    let p = enter(&h, "BTC/USDT").await;
    assert_eq!(p.stop_loss_price, d("97"));
}

#[tokio::test]
async fn test_entry_caps_size_to_balance() {
    let mut s = settings();
    s.strategy.stop = percent("0.005");
    let h = harness_with(s, risk_settings(3));

    // risk sizing asks for 200 units (20000 quote) with 10000 available
    let p = enter(&h, "BTC/USDT").await;
    assert_eq!(p.quantity, d("100"));
    assert!(h.gateway.quote() >= Decimal::ZERO);
}

#[tokio::test]
async fn test_rejected_entry_changes_nothing() {
    let h = harness();
    h.gateway.push_script(OrderScript::Reject);

    let err = h
        .lifecycle
        .try_enter(&candidate("BTC/USDT"))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Rejected { op: Operation::Enter, .. }));
    assert!(!err.is_fatal());
    assert!(!h.lifecycle.store().contains("BTC/USDT").await);
    assert!(h.lifecycle.held_or_pending().await.is_empty());
    assert_eq!(h.gateway.quote(), d("10000"));
    assert_eq!(h.notifier.count(EventType::Error), 1);
}

#[tokio::test]
async fn test_entry_persistence_failure_is_fatal() {
    let h = harness();
    h.backend.fail.store(true, Ordering::SeqCst);

    let err = h
        .lifecycle
        .try_enter(&candidate("BTC/USDT"))
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(err.symbol(), "BTC/USDT");
    assert!(!h.lifecycle.store().contains("BTC/USDT").await);
    assert_eq!(h.notifier.count(EventType::Error), 1);
}

// === Unknown outcomes ===

#[tokio::test]
async fn test_unknown_entry_adopted_after_reconcile() {
    let h = harness();
    h.gateway.push_script(OrderScript::TimeoutFilled);

    let err = h
        .lifecycle
        .try_enter(&candidate("BTC/USDT"))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Unreconciled { op: Operation::Enter, .. }));
    assert!(h.lifecycle.held_or_pending().await.contains("BTC/USDT"));

    // excluded from further entries until resolved
    let outcome = h.lifecycle.try_enter(&candidate("BTC/USDT")).await.unwrap();
    assert_eq!(outcome, EntryOutcome::Skipped(SkipReason::HeldOrPending));
    assert_eq!(h.gateway.order_count(), 1);

    let outcomes = h.lifecycle.reconcile_pending().await.unwrap();
    assert_eq!(outcomes.len(), 1);
    match &outcomes[0] {
        ReconcileOutcome::Opened(p) => {
            assert_eq!(p.quantity, d("50"));
            assert_eq!(p.stop_loss_price, d("98"));
        }
        other => panic!("expected adoption, got {:?}", other),
    }
    assert!(h.lifecycle.store().contains("BTC/USDT").await);
    assert_eq!(h.lifecycle.unreconciled_count().await, 0);
}

#[tokio::test]
async fn test_unknown_entry_holds_a_position_slot() {
    let h = harness_with(
        LifecycleSettings {
            max_open_positions: 1,
            ..settings()
        },
        risk_settings(3),
    );
    h.gateway.push_script(OrderScript::TimeoutFilled);
    assert!(h.lifecycle.try_enter(&candidate("BTC/USDT")).await.is_err());
    assert_eq!(h.lifecycle.open_slots_used().await, 1);

    let outcome = h.lifecycle.try_enter(&candidate("ETH/USDT")).await.unwrap();
    assert_eq!(outcome, EntryOutcome::Skipped(SkipReason::MaxPositions));
    assert_eq!(h.gateway.order_count(), 1);

    h.lifecycle.reconcile_pending().await.unwrap();
    assert_eq!(h.lifecycle.store().len().await, 1);
    assert_eq!(h.lifecycle.open_slots_used().await, 1);
}

#[tokio::test]
async fn test_unknown_entry_released_when_not_filled() {
    let h = harness();
    h.gateway.push_script(OrderScript::TimeoutLost);

    assert!(h.lifecycle.try_enter(&candidate("BTC/USDT")).await.is_err());
    let outcomes = h.lifecycle.reconcile_pending().await.unwrap();
    assert_eq!(outcomes, vec![ReconcileOutcome::NotFilled("BTC/USDT".to_string())]);
    assert!(h.lifecycle.held_or_pending().await.is_empty());

    // free to enter again
    enter(&h, "BTC/USDT").await;
}

#[tokio::test]
async fn test_unknown_exit_closed_after_reconcile() {
    let h = harness();
    enter(&h, "BTC/USDT").await;

    h.gateway.set_price("BTC/USDT", "97");
    h.gateway.push_script(OrderScript::TimeoutFilled);
    let err = h.lifecycle.manage("BTC/USDT").await.unwrap_err();
    assert!(matches!(err, LifecycleError::Unreconciled { op: Operation::Exit, .. }));
    assert!(h.lifecycle.store().contains("BTC/USDT").await);
    assert_eq!(h.lifecycle.manage("BTC/USDT").await.unwrap(), ManageOutcome::Busy);

    let outcomes = h.lifecycle.reconcile_pending().await.unwrap();
    let record = match &outcomes[0] {
        ReconcileOutcome::Closed(r) => r.clone(),
        other => panic!("expected close, got {:?}", other),
    };
    assert_eq!(record.reason, ExitReason::Reconciled);
    assert_eq!(record.realized_pnl, d("-150"));
    assert!(!h.lifecycle.store().contains("BTC/USDT").await);
    assert_eq!(h.lifecycle.risk_state().await.daily_realized_pnl, d("-150"));
    assert_eq!(h.journal.count().await.unwrap(), 1);
}

// === Management ===

#[tokio::test]
async fn test_stop_wins_over_take_profit() {
    let h = harness();
    let fill = Fill {
        order_id: "seed".to_string(),
        filled_quantity: d("1"),
        filled_price: d("102"),
        timestamp: Utc::now(),
    };
    let crossed = Position::open("BTC/USDT", &fill, d("105"), d("100"), None, "trend");
    h.lifecycle.store().upsert(crossed).await.unwrap();
    h.gateway.set_price("BTC/USDT", "102");

    match h.lifecycle.manage("BTC/USDT").await.unwrap() {
        ManageOutcome::Closed(r) => assert_eq!(r.reason, ExitReason::StopLoss),
        other => panic!("expected close, got {:?}", other),
    }
}

#[tokio::test]
async fn test_take_profit_exit() {
    let h = harness();
    enter(&h, "BTC/USDT").await;
    h.gateway.set_price("BTC/USDT", "104");

    match h.lifecycle.manage("BTC/USDT").await.unwrap() {
        ManageOutcome::Closed(r) => {
            assert_eq!(r.reason, ExitReason::TakeProfit);
            assert_eq!(r.realized_pnl, d("200"));
            assert!(r.is_win());
        }
        other => panic!("expected close, got {:?}", other),
    }
    assert_eq!(h.lifecycle.risk_state().await.daily_realized_pnl, d("200"));
    assert_eq!(h.notifier.count(EventType::PositionClosed), 1);
    assert_eq!(h.gateway.asset("BTC"), Decimal::ZERO);
}

#[tokio::test]
async fn test_trailing_stop_ratchets_then_exits() {
    let mut s = settings();
    s.strategy.take_profit = percent("0.5");
    s.strategy.trailing = Some(percent("0.05"));
    let h = harness_with(s, risk_settings(3));
    enter(&h, "BTC/USDT").await;

    h.gateway.set_price("BTC/USDT", "110");
    assert_eq!(h.lifecycle.manage("BTC/USDT").await.unwrap(), ManageOutcome::Held);
    let p = h.lifecycle.store().get("BTC/USDT").await.unwrap();
    assert_eq!(p.highest_price_since_entry, d("110"));
    assert_eq!(p.stop_loss_price, d("104.5"));

    h.gateway.set_price("BTC/USDT", "108");
    assert_eq!(h.lifecycle.manage("BTC/USDT").await.unwrap(), ManageOutcome::Held);
    let p = h.lifecycle.store().get("BTC/USDT").await.unwrap();
    assert_eq!(p.stop_loss_price, d("104.5"));

    h.gateway.set_price("BTC/USDT", "104");
    match h.lifecycle.manage("BTC/USDT").await.unwrap() {
        ManageOutcome::Closed(r) => {
            assert_eq!(r.reason, ExitReason::TrailingStop);
            assert_eq!(r.realized_pnl, d("200"));
        }
        other => panic!("expected close, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rejected_exit_keeps_position() {
    let h = harness();
    enter(&h, "BTC/USDT").await;
    h.gateway.set_price("BTC/USDT", "97");
    h.gateway.push_script(OrderScript::Reject);

    let err = h.lifecycle.manage("BTC/USDT").await.unwrap_err();
    assert!(matches!(err, LifecycleError::Rejected { op: Operation::Exit, .. }));
    assert!(h.lifecycle.store().contains("BTC/USDT").await);
    assert_eq!(h.lifecycle.risk_state().await.daily_realized_pnl, Decimal::ZERO);

    // next pass retries
    assert!(matches!(
        h.lifecycle.manage("BTC/USDT").await.unwrap(),
        ManageOutcome::Closed(_)
    ));
}

#[tokio::test]
async fn test_empty_exit_fill_keeps_position() {
    let h = harness();
    enter(&h, "BTC/USDT").await;
    h.gateway.set_price("BTC/USDT", "97");
    h.gateway.push_script(OrderScript::EmptyFill);

    let err = h.lifecycle.manage("BTC/USDT").await.unwrap_err();
    assert!(matches!(err, LifecycleError::Rejected { op: Operation::Exit, .. }));
    assert!(h.lifecycle.store().contains("BTC/USDT").await);
    assert_eq!(h.lifecycle.risk_state().await.daily_realized_pnl, Decimal::ZERO);
    assert_eq!(h.journal.count().await.unwrap(), 0);
    assert_eq!(h.notifier.count(EventType::PositionClosed), 0);
}

#[tokio::test]
async fn test_stalled_notifier_does_not_delay_exit() {
    let gateway = Arc::new(MockGateway::new("10000"));
    gateway.set_price("BTC/USDT", "100");
    let notifier = Arc::new(StalledNotifier::default());
    let lifecycle = PositionLifecycle::new(
        gateway.clone(),
        Arc::new(PositionStore::new(Arc::new(MemoryStore::default()))),
        None,
        RiskManager::new(risk_settings(3), today()),
        notifier.clone(),
        settings(),
    );

    let pass = async {
        lifecycle.try_enter(&candidate("BTC/USDT")).await.unwrap();
        gateway.set_price("BTC/USDT", "97");
        lifecycle.manage("BTC/USDT").await.unwrap()
    };
    let outcome = tokio::time::timeout(Duration::from_secs(5), pass)
        .await
        .expect("entry and exit must not wait on notification delivery");

    assert!(matches!(outcome, ManageOutcome::Closed(_)));
    let queued = notifier.queued.lock().unwrap().clone();
    assert_eq!(queued, vec![EventType::EntryOpened, EventType::PositionClosed]);
}

#[tokio::test]
async fn test_manage_unknown_symbol() {
    let h = harness();
    assert_eq!(h.lifecycle.manage("BTC/USDT").await.unwrap(), ManageOutcome::NotHeld);
}

// === DCA ===

fn dca_settings(cap: Option<&str>) -> LifecycleSettings {
    let mut s = settings();
    s.strategy.dca = Some(DcaConfig {
        mode: OffsetMode::Percent,
        levels: vec![DcaLevelConfig {
            offset: d("0.01"),
            allocation: d("500"),
        }],
    });
    s.strategy.max_invested_per_symbol = cap.map(d);
    s
}

#[tokio::test]
async fn test_dca_add_lowers_average() {
    let h = harness_with(dca_settings(None), risk_settings(3));
    enter(&h, "BTC/USDT").await;
    h.gateway.set_price("BTC/USDT", "99");

    let p = match h.lifecycle.manage("BTC/USDT").await.unwrap() {
        ManageOutcome::Added(p) => p,
        other => panic!("expected add, got {:?}", other),
    };
    // floor(500 / 99) at 0.001 step
    assert_eq!(p.quantity, d("55.05"));
    assert_eq!(p.dca_levels_filled, 1);
    assert!(p.average_entry_price < d("100") && p.average_entry_price > d("99"));
    assert_eq!(p.stop_loss_price, d("98"));
    assert_eq!(h.notifier.count(EventType::DcaExecuted), 1);

    // ladder exhausted
    assert_eq!(h.lifecycle.manage("BTC/USDT").await.unwrap(), ManageOutcome::Held);
    assert_eq!(h.gateway.order_count(), 2);
}

#[tokio::test]
async fn test_dca_respects_symbol_budget() {
    let h = harness_with(dca_settings(Some("5200")), risk_settings(3));
    enter(&h, "BTC/USDT").await;
    h.gateway.set_price("BTC/USDT", "99");

    assert_eq!(h.lifecycle.manage("BTC/USDT").await.unwrap(), ManageOutcome::Held);
    assert_eq!(h.gateway.order_count(), 1);
}

#[tokio::test]
async fn test_unknown_add_reconciled() {
    let h = harness_with(dca_settings(None), risk_settings(3));
    enter(&h, "BTC/USDT").await;
    h.gateway.set_price("BTC/USDT", "99");
    h.gateway.push_script(OrderScript::TimeoutFilled);

    let err = h.lifecycle.manage("BTC/USDT").await.unwrap_err();
    assert!(matches!(err, LifecycleError::Unreconciled { op: Operation::Add, .. }));

    let outcomes = h.lifecycle.reconcile_pending().await.unwrap();
    match &outcomes[0] {
        ReconcileOutcome::Added(p) => {
            assert_eq!(p.quantity, d("55.05"));
            assert_eq!(p.dca_levels_filled, 1);
        }
        other => panic!("expected add, got {:?}", other),
    }
}

// === Risk ===

#[tokio::test]
async fn test_losing_streak_blocks_entries_and_warns_once() {
    let h = harness_with(settings(), risk_settings(1));
    enter(&h, "BTC/USDT").await;
    h.gateway.set_price("BTC/USDT", "97");
    assert!(matches!(
        h.lifecycle.manage("BTC/USDT").await.unwrap(),
        ManageOutcome::Closed(_)
    ));
    assert!(!h.lifecycle.can_trade().await);

    let outcome = h.lifecycle.try_enter(&candidate("ETH/USDT")).await.unwrap();
    assert!(matches!(
        outcome,
        EntryOutcome::Skipped(SkipReason::RiskBlocked(BlockReason::Cooldown { .. }))
    ));
    assert_eq!(h.notifier.count(EventType::RiskWarning), 1);

    // a new day clears the breaker
    let tomorrow = today().succ_opt().unwrap();
    assert!(h.lifecycle.roll_day(tomorrow).await);
    enter(&h, "ETH/USDT").await;
}

#[tokio::test]
async fn test_restore_risk_state_from_journal() {
    let h = harness_with(settings(), risk_settings(2));
    let at = |hour: u32| Utc.with_ymd_and_hms(2026, 3, 10, hour, 0, 0).unwrap();
    let trade = |pnl: &str, closed_at: DateTime<Utc>| TradeRecord {
        symbol: "BTC/USDT".to_string(),
        side: OrderSide::Sell,
        quantity: d("1"),
        entry_price: d("100"),
        exit_price: d("100"),
        realized_pnl: d(pnl),
        fees: Decimal::ZERO,
        reason: ExitReason::StopLoss,
        strategy: "trend".to_string(),
        opened_at: closed_at,
        closed_at,
    };
    let yesterday = Utc.with_ymd_and_hms(2026, 3, 9, 23, 0, 0).unwrap();
    for record in [
        trade("-400", yesterday),
        trade("50", at(9)),
        trade("-20", at(10)),
        trade("-30", at(11)),
    ] {
        h.journal.append(&record).await.unwrap();
    }

    h.lifecycle.restore_risk_state(today()).await.unwrap();
    let state = h.lifecycle.risk_state().await;
    assert_eq!(state.daily_realized_pnl, Decimal::ZERO);
    assert_eq!(state.consecutive_losses, 2);
    assert!(state.cooldown_active);
    assert_eq!(state.trading_day, today());
}

#[tokio::test]
async fn test_restored_cooldown_stays_latched_after_win() {
    let h = harness_with(settings(), risk_settings(2));
    let at = |minute: u32| Utc.with_ymd_and_hms(2026, 3, 10, 12, minute, 0).unwrap();
    let trade = |pnl: &str, closed_at: DateTime<Utc>| TradeRecord {
        symbol: "ETH/USDT".to_string(),
        side: OrderSide::Sell,
        quantity: d("1"),
        entry_price: d("100"),
        exit_price: d("100"),
        realized_pnl: d(pnl),
        fees: Decimal::ZERO,
        reason: ExitReason::TakeProfit,
        strategy: "trend".to_string(),
        opened_at: closed_at,
        closed_at,
    };

    let mut live = RiskManager::new(risk_settings(2), today());
    // appended out of order; replay follows close time
    for record in [trade("5", at(30)), trade("-20", at(10)), trade("-30", at(20))] {
        h.journal.append(&record).await.unwrap();
    }
    for pnl in ["-20", "-30", "5"] {
        live.register_trade_result(d(pnl));
    }

    h.lifecycle.restore_risk_state(today()).await.unwrap();
    let restored = h.lifecycle.risk_state().await;
    assert_eq!(&restored, live.state());
    assert_eq!(restored.daily_realized_pnl, d("-45"));
    assert_eq!(restored.consecutive_losses, 0);
    assert!(restored.cooldown_active);
    assert!(!h.lifecycle.can_trade().await);
}

// === Properties ===

fn seeded(entry_atr: Option<Decimal>) -> Position {
    let fill = Fill {
        order_id: "p".to_string(),
        filled_quantity: d("1"),
        filled_price: d("100"),
        timestamp: Utc::now(),
    };
    Position::open("BTC/USDT", &fill, d("95"), d("150"), entry_atr, "trend")
}

proptest! {
    #[test]
    fn prop_trailing_stop_never_decreases(
        prices in prop::collection::vec(50u32..200, 1..60),
        use_atr in any::<bool>(),
    ) {
        let (rule, atr) = if use_atr {
            (OffsetRule { mode: OffsetMode::Atr, value: d("2") }, Some(d("3")))
        } else {
            (percent("0.05"), None)
        };
        let mut p = seeded(atr);
        let mut last_stop = p.stop_loss_price;
        let mut last_high = p.highest_price_since_entry;
        for price in prices {
            track_price(&mut p, Decimal::from(price), Some(rule));
            prop_assert!(p.stop_loss_price >= last_stop);
            prop_assert!(p.highest_price_since_entry >= last_high);
            prop_assert!(p.stop_loss_price < p.highest_price_since_entry);
            last_stop = p.stop_loss_price;
            last_high = p.highest_price_since_entry;
        }
    }

    #[test]
    fn prop_dca_average_stays_within_fill_prices(
        adds in prop::collection::vec((1u32..1000, 1u32..200), 1..10),
    ) {
        let mut p = seeded(None);
        let mut lo = d("100");
        let mut hi = d("100");
        for (qty, price) in adds {
            let price = Decimal::from(price);
            lo = lo.min(price);
            hi = hi.max(price);
            p.apply_add(&Fill {
                order_id: "a".to_string(),
                filled_quantity: Decimal::new(i64::from(qty), 2),
                filled_price: price,
                timestamp: Utc::now(),
            });
            prop_assert!(p.average_entry_price >= lo && p.average_entry_price <= hi);
        }
        prop_assert_eq!(p.stop_loss_price, d("95"));
    }
}

#[test]
fn test_next_dca_level_trigger() {
    let dca = DcaConfig {
        mode: OffsetMode::Absolute,
        levels: vec![
            DcaLevelConfig { offset: d("2"), allocation: d("100") },
            DcaLevelConfig { offset: d("5"), allocation: d("200") },
        ],
    };
    let mut p = seeded(None);
    assert!(next_dca_level(&p, d("98.01"), &dca).is_none());
    assert_eq!(next_dca_level(&p, d("98"), &dca).unwrap().allocation, d("100"));

    p.dca_levels_filled = 1;
    assert!(next_dca_level(&p, d("96"), &dca).is_none());
    assert_eq!(next_dca_level(&p, d("95"), &dca).unwrap().allocation, d("200"));

    p.dca_levels_filled = 2;
    assert!(next_dca_level(&p, d("1"), &dca).is_none());
}

#[test]
fn test_settings_from_config_defaults_depth_band() {
    let yaml = r#"
app:
  name: spotbot
  env: test
exchange:
  name: poloniex
  enabled: true
pairs: ["BTC/USDT"]
strategy:
  stop: { mode: percent, value: 0.02 }
  take_profit: { mode: percent, value: 0.04 }
risk:
  risk_per_trade: 0.01
  max_daily_loss: 100
  max_spread_bps: 20
  min_depth_quote: 1000
"#;
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    let s = LifecycleSettings::from_config(&config);
    assert_eq!(s.depth_band, d("0.002"));
    assert_eq!(s.max_open_positions, 3);
    assert_eq!(s.retry, RetryPolicy::default());
}
