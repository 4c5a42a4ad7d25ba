//! Exchange integration abstractions and implementations.

mod paper;
pub mod poloniex;
mod timeout;
mod utils;

use crate::config::Config;
use crate::domain::{Candle, Fill, OrderSide, Orderbook, SymbolTradingRules};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub use paper::PaperExchange;
pub use poloniex::PoloniexExchange;
pub use timeout::TimeoutGateway;

/// Default upper bound for a single exchange call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default virtual quote balance in dry-run mode.
const DEFAULT_PAPER_BALANCE: i64 = 1000;

/// Exchange errors.
///
/// Rejections are final for the attempt: nothing happened on the venue.
/// Transport failures and timeouts leave the outcome of an order unknown.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The venue refused the request (precision, notional, state).
    #[error("rejected: {0}")]
    Rejected(String),

    /// Insufficient funds for the operation.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// Trading pair is not supported by this exchange.
    #[error("pair {0} is not supported")]
    PairNotSupported(String),

    /// Connection or protocol failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The call did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ExchangeError {
    /// True if the venue definitely did not act on the request.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ExchangeError::Rejected(_)
                | ExchangeError::InsufficientFunds
                | ExchangeError::PairNotSupported(_)
        )
    }

    /// True if an order may or may not have been executed.
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(self, ExchangeError::Transport(_) | ExchangeError::Timeout(_))
    }
}

/// Result type for exchange operations.
pub type Result<T> = std::result::Result<T, ExchangeError>;

/// ExchangeGateway is everything the trading core needs from a spot venue.
///
/// Symbols are in "BASE/QUOTE" format (e.g., "BTC/USDT").
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Name returns the unique identifier of this exchange (e.g., "poloniex").
    fn name(&self) -> &str;

    /// Fetches quantity and notional constraints for a symbol.
    async fn load_trading_rules(&self, symbol: &str) -> Result<SymbolTradingRules>;

    /// Returns the last traded price.
    async fn current_price(&self, symbol: &str) -> Result<Decimal>;

    /// Fetches the current orderbook.
    async fn get_orderbook(&self, symbol: &str) -> Result<Orderbook>;

    /// Fetches the most recent `limit` candles, oldest first.
    async fn get_candles(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>>;

    /// Submits a market order for `quantity` base units and waits for its fill.
    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<Fill>;

    /// Available balance of the quote asset.
    async fn fetch_quote_balance(&self) -> Result<Decimal>;

    /// Available balance of any asset (e.g., "BTC").
    async fn fetch_asset_balance(&self, asset: &str) -> Result<Decimal>;
}

/// Builds the gateway stack described by the config.
///
/// The venue adapter is wrapped by a paper-trading layer in dry-run mode,
/// and every call is bounded by the execution timeout.
pub fn build_gateway(config: &Config) -> Result<Arc<dyn ExchangeGateway>> {
    let venue: Arc<dyn ExchangeGateway> = match config.exchange.name.as_str() {
        poloniex::EXCHANGE_NAME => Arc::new(PoloniexExchange::from_config(config)?),
        other => {
            return Err(ExchangeError::Internal(format!(
                "unsupported exchange: {}",
                other
            )));
        }
    };

    let gateway: Arc<dyn ExchangeGateway> = if config.app.dry_run {
        let balance = config
            .exchange
            .paper_balance
            .unwrap_or_else(|| Decimal::from(DEFAULT_PAPER_BALANCE));
        info!(balance = %balance, quote = %config.exchange.quote_asset, "paper trading enabled");
        Arc::new(PaperExchange::new(
            venue,
            config.exchange.quote_asset.clone(),
            balance,
        ))
    } else {
        venue
    };

    let timeout = config
        .execution
        .as_ref()
        .map(|e| e.timeout)
        .filter(|t| !t.is_zero())
        .unwrap_or(DEFAULT_CALL_TIMEOUT);

    Ok(Arc::new(TimeoutGateway::new(gateway, timeout)))
}
