//! Per-call deadline for any gateway.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::warn;

use crate::domain::{Candle, Fill, OrderSide, Orderbook, SymbolTradingRules};
use crate::exchanges::{ExchangeError, ExchangeGateway, Result};

/// TimeoutGateway bounds every call of the wrapped gateway.
///
/// An expired call surfaces as `ExchangeError::Timeout`; for orders that
/// means the outcome is unknown and must be reconciled.
pub struct TimeoutGateway {
    inner: Arc<dyn ExchangeGateway>,
    timeout: Duration,
}

impl TimeoutGateway {
    pub fn new(inner: Arc<dyn ExchangeGateway>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(&self, op: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(op = op, timeout = ?self.timeout, "exchange call timed out");
                Err(ExchangeError::Timeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl ExchangeGateway for TimeoutGateway {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn load_trading_rules(&self, symbol: &str) -> Result<SymbolTradingRules> {
        self.bounded("load_trading_rules", self.inner.load_trading_rules(symbol))
            .await
    }

    async fn current_price(&self, symbol: &str) -> Result<Decimal> {
        self.bounded("current_price", self.inner.current_price(symbol))
            .await
    }

    async fn get_orderbook(&self, symbol: &str) -> Result<Orderbook> {
        self.bounded("get_orderbook", self.inner.get_orderbook(symbol))
            .await
    }

    async fn get_candles(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        self.bounded("get_candles", self.inner.get_candles(symbol, interval, limit))
            .await
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<Fill> {
        self.bounded(
            "place_market_order",
            self.inner.place_market_order(symbol, side, quantity),
        )
        .await
    }

    async fn fetch_quote_balance(&self) -> Result<Decimal> {
        self.bounded("fetch_quote_balance", self.inner.fetch_quote_balance())
            .await
    }

    async fn fetch_asset_balance(&self, asset: &str) -> Result<Decimal> {
        self.bounded("fetch_asset_balance", self.inner.fetch_asset_balance(asset))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    /// Gateway that answers prices instantly and never finishes orders.
    struct Stuck;

    #[async_trait]
    impl ExchangeGateway for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn load_trading_rules(&self, _symbol: &str) -> Result<SymbolTradingRules> {
            Err(ExchangeError::PairNotSupported("X/Y".into()))
        }

        async fn current_price(&self, _symbol: &str) -> Result<Decimal> {
            Ok(Decimal::from(100))
        }

        async fn get_orderbook(&self, _symbol: &str) -> Result<Orderbook> {
            Err(ExchangeError::Internal("unused".into()))
        }

        async fn get_candles(&self, _: &str, _: &str, _: usize) -> Result<Vec<Candle>> {
            Ok(vec![])
        }

        async fn place_market_order(&self, _: &str, _: OrderSide, q: Decimal) -> Result<Fill> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Fill {
                order_id: "late".into(),
                filled_quantity: q,
                filled_price: Decimal::ONE,
                timestamp: Utc::now(),
            })
        }

        async fn fetch_quote_balance(&self) -> Result<Decimal> {
            Ok(Decimal::ZERO)
        }

        async fn fetch_asset_balance(&self, _asset: &str) -> Result<Decimal> {
            Ok(Decimal::ZERO)
        }
    }

    #[tokio::test]
    async fn test_passes_through_fast_calls() {
        let gw = TimeoutGateway::new(Arc::new(Stuck), Duration::from_millis(200));
        assert_eq!(gw.current_price("BTC/USDT").await.unwrap(), Decimal::from(100));
        assert_eq!(gw.name(), "stuck");
        assert!(matches!(
            gw.load_trading_rules("X/Y").await,
            Err(ExchangeError::PairNotSupported(_))
        ));
    }

    #[tokio::test]
    async fn test_slow_order_times_out() {
        let gw = TimeoutGateway::new(Arc::new(Stuck), Duration::from_millis(20));
        let err = gw
            .place_market_order("BTC/USDT", OrderSide::Buy, Decimal::ONE)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Timeout(_)));
        assert!(err.is_outcome_unknown());
    }
}
