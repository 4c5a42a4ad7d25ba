//! Scan loop driver.
//!
//! Wires the gateway, screener, stores and notifier into a `PositionLifecycle`
//! and runs one evaluation pass per interval: manage what is held first, then
//! look for new entries.

mod config;
mod error;
mod stats;

pub use config::BotConfig;
pub use error::BotError;
pub use stats::Stats;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::exchanges::build_gateway;
use crate::lifecycle::{
    EntryOutcome, LifecycleError, LifecycleSettings, ManageOutcome, PositionLifecycle,
    ReconcileOutcome, SkipReason,
};
use crate::notification::{
    Event, EventType, NoopNotifier, Notifier, OverviewData, ShutdownData, StartupData, TelegramConfig,
    TelegramNotifier,
};
use crate::risk::{RiskManager, RiskSettings};
use crate::screener::{CandidateSource, MarketScreener, ScreenerSettings};
use crate::storage::{
    JsonFileStore, PositionStore, SqliteStorage, SqliteStorageConfig, TradeJournal,
};

const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_OVERVIEW_INTERVAL: Duration = Duration::from_secs(3600);
const DEFAULT_POSITIONS_PATH: &str = "state/positions.json";

/// Bot runs the scan loop over one `PositionLifecycle`.
pub struct Bot {
    cfg: Config,
    exchange_name: String,
    screener: Arc<dyn CandidateSource>,
    lifecycle: PositionLifecycle,
    journal: Option<Arc<dyn TradeJournal>>,
    notifier: Arc<dyn Notifier>,

    scan_interval: Duration,
    overview_interval: Duration,

    // Runtime state
    version: String,
    build_time: String,
    dry_run: bool,
    started_at: Mutex<Option<Instant>>,
    running: Mutex<bool>,
    stats: Mutex<Stats>,
}

impl Bot {
    /// Builds the gateway, screener, stores and notifier, then restores
    /// open positions and today's risk ledger.
    pub async fn new(cfg: BotConfig) -> Result<Self, BotError> {
        let app = &cfg.app_config;

        let gateway = build_gateway(app).map_err(|e| BotError::Exchange(e.to_string()))?;
        let screener: Arc<dyn CandidateSource> = Arc::new(MarketScreener::new(
            gateway.clone(),
            app.pairs.clone(),
            ScreenerSettings::from(app.screener.as_ref()),
        ));

        let storage = app.storage.as_ref();
        let positions_path = storage
            .and_then(|s| s.positions_path.clone())
            .unwrap_or_else(|| DEFAULT_POSITIONS_PATH.to_string());
        let store = Arc::new(PositionStore::new(Arc::new(JsonFileStore::new(
            &positions_path,
        ))));
        let restored = store.load().await;
        info!(path = %positions_path, positions = restored.len(), "position state loaded");

        let journal: Option<Arc<dyn TradeJournal>> = if storage.is_none_or(|s| s.journal_enabled) {
            let mut sqlite = SqliteStorageConfig::default();
            if let Some(path) = storage.and_then(|s| s.trades_path.clone()) {
                sqlite.path = path;
            }
            let journal: Arc<dyn TradeJournal> = Arc::new(
                SqliteStorage::new(sqlite)
                    .await
                    .map_err(|e| BotError::Storage(e.to_string()))?,
            );
            Some(journal)
        } else {
            None
        };

        let notifier = build_notifier(app);
        let today = Utc::now().date_naive();
        let lifecycle = PositionLifecycle::new(
            gateway.clone(),
            store,
            journal.clone(),
            RiskManager::new(RiskSettings::from(&app.risk), today),
            notifier.clone(),
            LifecycleSettings::from_config(app),
        );
        if let Err(e) = lifecycle.restore_risk_state(today).await {
            warn!(error = %e, "failed to restore risk state from journal, starting clean");
        }

        let exchange_name = gateway.name().to_string();
        Ok(Self::with_components(
            cfg,
            exchange_name,
            screener,
            lifecycle,
            journal,
            notifier,
        ))
    }

    /// Assembles a bot from prebuilt components.
    pub fn with_components(
        cfg: BotConfig,
        exchange_name: String,
        screener: Arc<dyn CandidateSource>,
        lifecycle: PositionLifecycle,
        journal: Option<Arc<dyn TradeJournal>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let scan = cfg.app_config.scan.as_ref();
        let scan_interval = scan
            .map(|s| s.interval)
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_SCAN_INTERVAL);
        let overview_interval = scan
            .map(|s| s.overview_interval)
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_OVERVIEW_INTERVAL);

        Bot {
            cfg: cfg.app_config,
            exchange_name,
            screener,
            lifecycle,
            journal,
            notifier,
            scan_interval,
            overview_interval,
            version: cfg.version,
            build_time: cfg.build_time,
            dry_run: cfg.dry_run,
            started_at: Mutex::new(None),
            running: Mutex::new(false),
            stats: Mutex::new(Stats::default()),
        }
    }

    /// Runs the scan loop until `shutdown` resolves or a fatal error occurs.
    ///
    /// A shutdown request is honoured between passes, never mid-pass.
    pub async fn start<S>(&self, shutdown: S) -> Result<(), BotError>
    where
        S: Future<Output = ()>,
    {
        {
            let mut running = self.running.lock().await;
            if *running {
                return Err(BotError::AlreadyRunning);
            }
            *running = true;
        }

        {
            let mut started_at = self.started_at.lock().await;
            *started_at = Some(Instant::now());
        }

        let open_positions = self.lifecycle.store().len().await;
        info!(
            version = %self.version,
            build_time = %self.build_time,
            dry_run = self.dry_run,
            exchange = %self.exchange_name,
            pairs = ?self.cfg.pairs,
            open_positions = open_positions,
            "Starting spot bot"
        );

        self.send_notification(Event::startup(StartupData {
            version: self.version.clone(),
            exchange: self.exchange_name.clone(),
            pairs: self.cfg.pairs.clone(),
            open_positions,
            dry_run: self.dry_run,
        }))
        .await;

        self.run_main_loop(shutdown).await
    }

    /// Stops the bot and sends the shutdown notification.
    pub async fn stop(&self, reason: &str, graceful: bool) -> Result<(), BotError> {
        {
            let mut running = self.running.lock().await;
            if !*running {
                return Ok(());
            }
            *running = false;
        }

        info!(reason = %reason, "Stopping bot...");

        let uptime = self.uptime().await;

        self.send_notification(Event::shutdown(ShutdownData {
            reason: reason.to_string(),
            uptime,
            graceful,
        }))
        .await;

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.close().await {
                warn!(error = %e, "failed to close trade journal");
            }
        }
        let _ = self.notifier.close().await;

        info!(uptime = ?uptime, "Bot stopped");

        Ok(())
    }

    /// Returns a copy of the current statistics.
    pub async fn stats(&self) -> Stats {
        self.stats.lock().await.clone()
    }

    /// Returns true if the bot is currently running.
    pub async fn is_running(&self) -> bool {
        *self.running.lock().await
    }

    /// Returns how long the bot has been running.
    pub async fn uptime(&self) -> Duration {
        self.started_at
            .lock()
            .await
            .map(|s| s.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    async fn run_main_loop<S>(&self, shutdown: S) -> Result<(), BotError>
    where
        S: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.scan_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut overview_timer = tokio::time::interval(self.overview_interval);
        // The first tick fires immediately; skip it so the overview waits a full period
        overview_timer.tick().await;

        tokio::pin!(shutdown);

        info!(
            scan_interval = ?self.scan_interval,
            overview_interval = ?self.overview_interval,
            "Starting scan loop"
        );

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested, leaving scan loop");
                    break;
                }
                _ = interval.tick() => {
                    if !self.is_running().await {
                        break;
                    }
                    if let Err(e) = self.run_pass().await {
                        error!(error = %e, "fatal error, stopping scan loop");
                        return Err(e);
                    }
                }
                _ = overview_timer.tick() => {
                    self.send_overview().await;
                }
            }
        }

        Ok(())
    }

    /// Runs one evaluation pass.
    ///
    /// Order: day roll, reconciliation of unknown outcomes, management of every
    /// open position, then entries while below the position ceiling.
    pub async fn run_pass(&self) -> Result<(), BotError> {
        let pass = {
            let mut stats = self.stats.lock().await;
            stats.passes += 1;
            stats.passes
        };
        debug!(pass = pass, "scan pass started");

        self.lifecycle.roll_day(Utc::now().date_naive()).await;

        let reconciled = self.lifecycle.reconcile_pending().await?;
        for outcome in &reconciled {
            self.record_reconcile(outcome).await;
        }

        self.manage_open_positions().await?;
        self.scan_entries().await?;

        let open = self.lifecycle.store().len().await;
        if pass % 10 == 1 {
            info!(pass = pass, open_positions = open, "scan pass complete");
        } else {
            debug!(pass = pass, open_positions = open, "scan pass complete");
        }
        Ok(())
    }

    async fn manage_open_positions(&self) -> Result<(), BotError> {
        for position in self.lifecycle.store().all().await {
            match self.lifecycle.manage(&position.symbol).await {
                Ok(ManageOutcome::Closed(record)) => {
                    self.stats.lock().await.record_close(&record);
                }
                Ok(ManageOutcome::Added(_)) => {
                    self.stats.lock().await.dca_adds += 1;
                }
                Ok(outcome) => {
                    debug!(symbol = %position.symbol, outcome = ?outcome, "position managed");
                }
                Err(e) => self.handle_lifecycle_error(e).await?,
            }
        }
        Ok(())
    }

    async fn scan_entries(&self) -> Result<(), BotError> {
        let max_open = self.cfg.risk.max_open_positions;
        if self.lifecycle.open_slots_used().await >= max_open {
            debug!(max_open_positions = max_open, "position ceiling reached, skipping screening");
            return Ok(());
        }

        let candidates = self.screener.ranked_candidates().await;
        let excluded = self.lifecycle.held_or_pending().await;

        for candidate in candidates
            .iter()
            .filter(|c| !excluded.contains(&c.symbol))
        {
            if self.lifecycle.open_slots_used().await >= max_open {
                break;
            }
            match self.lifecycle.try_enter(candidate).await {
                Ok(EntryOutcome::Opened(_)) => {
                    self.stats.lock().await.entries += 1;
                }
                Ok(EntryOutcome::Skipped(reason @ SkipReason::RiskBlocked(_))) => {
                    debug!(reason = %reason, "entries blocked for this pass");
                    break;
                }
                Ok(EntryOutcome::Skipped(reason)) => {
                    debug!(symbol = %candidate.symbol, reason = %reason, "entry skipped");
                }
                Err(e) => self.handle_lifecycle_error(e).await?,
            }
        }
        Ok(())
    }

    async fn record_reconcile(&self, outcome: &ReconcileOutcome) {
        let mut stats = self.stats.lock().await;
        match outcome {
            ReconcileOutcome::Opened(_) => stats.entries += 1,
            ReconcileOutcome::Closed(record) => stats.record_close(record),
            ReconcileOutcome::Added(_) => stats.dca_adds += 1,
            ReconcileOutcome::NotFilled(_) => {}
        }
    }

    /// Fatal errors stop the loop; everything else is counted and logged.
    async fn handle_lifecycle_error(&self, e: LifecycleError) -> Result<(), BotError> {
        if e.is_fatal() {
            return Err(BotError::Fatal(e));
        }
        self.stats.lock().await.errors += 1;
        warn!(symbol = %e.symbol(), error = %e, "lifecycle operation failed");
        Ok(())
    }

    /// Sends a notification event if the notifier wants it.
    async fn send_notification(&self, event: Event) {
        if !self.notifier.is_enabled(event.event_type) {
            return;
        }
        if let Err(e) = self.notifier.send(&event).await {
            debug!(
                event_type = %event.event_type,
                error = %e,
                "Failed to send notification"
            );
        }
    }

    /// Sends a periodic overview notification with current stats.
    async fn send_overview(&self) {
        if !self.notifier.is_enabled(EventType::Overview) {
            return;
        }
        let stats = self.stats().await;
        let uptime = self.uptime().await;
        let open_positions = self.lifecycle.store().len().await;
        let journaled_trades = match &self.journal {
            Some(journal) => match journal.count().await {
                Ok(count) => Some(count),
                Err(e) => {
                    warn!(error = %e, "failed to count journaled trades");
                    None
                }
            },
            None => None,
        };

        // Queued, never awaited inside the loop
        self.notifier.send_async(Event::overview(OverviewData {
            uptime,
            passes: stats.passes,
            entries: stats.entries,
            exits: stats.exits,
            wins: stats.wins,
            losses: stats.losses,
            dca_adds: stats.dca_adds,
            realized_pnl: stats.realized_pnl,
            open_positions,
            journaled_trades,
            dry_run: self.dry_run,
        }));
    }
}

/// Telegram when enabled and configured, otherwise a no-op sink.
fn build_notifier(config: &Config) -> Arc<dyn Notifier> {
    let telegram = config
        .notification
        .as_ref()
        .and_then(|n| n.telegram.as_ref())
        .filter(|t| t.enabled);

    if let Some(telegram) = telegram {
        if telegram.bot_token.is_empty() || telegram.chat_id.is_empty() {
            warn!("Telegram enabled but TELEGRAM_BOT_TOKEN or TELEGRAM_CHAT_ID is missing");
        } else {
            match TelegramNotifier::new(TelegramConfig::from_settings(telegram)) {
                Ok(notifier) => {
                    info!("Telegram notifier created");
                    return Arc::new(notifier);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to create Telegram notifier");
                }
            }
        }
    }
    Arc::new(NoopNotifier::new())
}
