//! Dry-run gateway: live market data, simulated fills.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::{Candle, Fill, OrderSide, Orderbook, SymbolTradingRules, base_asset};
use crate::exchanges::{ExchangeError, ExchangeGateway, Result};

struct PaperBalances {
    quote: Decimal,
    assets: HashMap<String, Decimal>,
}

/// PaperExchange forwards market-data calls to a real venue and fills
/// market orders locally at the current price against virtual balances.
pub struct PaperExchange {
    market: Arc<dyn ExchangeGateway>,
    quote_asset: String,
    balances: Mutex<PaperBalances>,
    next_order_id: AtomicU64,
}

impl PaperExchange {
    pub fn new(market: Arc<dyn ExchangeGateway>, quote_asset: String, quote_balance: Decimal) -> Self {
        Self {
            market,
            quote_asset,
            balances: Mutex::new(PaperBalances {
                quote: quote_balance,
                assets: HashMap::new(),
            }),
            next_order_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    fn name(&self) -> &str {
        self.market.name()
    }

    async fn load_trading_rules(&self, symbol: &str) -> Result<SymbolTradingRules> {
        self.market.load_trading_rules(symbol).await
    }

    async fn current_price(&self, symbol: &str) -> Result<Decimal> {
        self.market.current_price(symbol).await
    }

    async fn get_orderbook(&self, symbol: &str) -> Result<Orderbook> {
        self.market.get_orderbook(symbol).await
    }

    async fn get_candles(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        self.market.get_candles(symbol, interval, limit).await
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<Fill> {
        if quantity <= Decimal::ZERO {
            return Err(ExchangeError::Rejected(format!(
                "invalid quantity {} for {}",
                quantity, symbol
            )));
        }

        let price = self.market.current_price(symbol).await?;
        let notional = quantity * price;
        let asset = base_asset(symbol).to_string();

        let mut balances = self.balances.lock().await;
        match side {
            OrderSide::Buy => {
                if notional > balances.quote {
                    return Err(ExchangeError::InsufficientFunds);
                }
                balances.quote -= notional;
                *balances.assets.entry(asset).or_default() += quantity;
            }
            OrderSide::Sell => {
                let held = balances.assets.entry(asset).or_default();
                if quantity > *held {
                    return Err(ExchangeError::InsufficientFunds);
                }
                *held -= quantity;
                balances.quote += notional;
            }
        }

        let order_id = format!("paper-{}", self.next_order_id.fetch_add(1, Ordering::SeqCst));
        info!(
            symbol = %symbol,
            side = %side,
            quantity = %quantity,
            price = %price,
            order_id = %order_id,
            "[DRY RUN] order filled"
        );

        Ok(Fill {
            order_id,
            filled_quantity: quantity,
            filled_price: price,
            timestamp: Utc::now(),
        })
    }

    async fn fetch_quote_balance(&self) -> Result<Decimal> {
        let quote = self.balances.lock().await.quote;
        debug!(quote = %quote, "paper quote balance");
        Ok(quote)
    }

    async fn fetch_asset_balance(&self, asset: &str) -> Result<Decimal> {
        if asset == self.quote_asset {
            return self.fetch_quote_balance().await;
        }
        let balances = self.balances.lock().await;
        Ok(balances.assets.get(asset).copied().unwrap_or_default())
    }
}
