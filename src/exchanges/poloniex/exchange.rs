use std::collections::HashMap;
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::domain::{Candle, Fill, OrderSide, Orderbook, SymbolTradingRules};
use crate::exchanges::poloniex::client::{Client, ClientError};
use crate::exchanges::utils::{pair_to_symbol, parse_decimal, parse_price_levels, step_from_scale};
use crate::exchanges::{ExchangeError, ExchangeGateway, Result};

pub const EXCHANGE_NAME: &str = "poloniex";

/// Default orderbook depth.
const DEFAULT_ORDERBOOK_DEPTH: i32 = 20;

/// How often an accepted market order is polled for its fill.
const FILL_POLL_ATTEMPTS: usize = 5;

/// Pause between fill polls.
const FILL_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Poloniex spot gateway over the REST API.
pub struct PoloniexExchange {
    client: Client,
    quote_asset: String,
    orderbook_depth: i32,
    /// Quote-amount decimals per symbol, needed for market buys.
    amount_scales: RwLock<HashMap<String, u32>>,
}

impl PoloniexExchange {
    /// Creates a new PoloniexExchange from the application config.
    ///
    /// Returns an error if Poloniex is not the configured venue or not enabled.
    pub fn from_config(config: &Config) -> Result<Self> {
        let exchange_config = &config.exchange;

        if exchange_config.name != EXCHANGE_NAME {
            return Err(ExchangeError::Internal(format!(
                "{} not found in config",
                EXCHANGE_NAME
            )));
        }

        if !exchange_config.enabled {
            return Err(ExchangeError::Internal(format!(
                "{} is not enabled",
                EXCHANGE_NAME
            )));
        }

        if exchange_config.testnet {
            warn!("poloniex has no spot testnet, using production endpoint");
        }

        let client = Client::from_config(exchange_config)
            .map_err(|e| ExchangeError::Internal(format!("build poloniex client: {}", e)))?;

        Ok(Self::with_client(client, exchange_config.quote_asset.clone()))
    }

    fn with_client(client: Client, quote_asset: String) -> Self {
        Self {
            client,
            quote_asset,
            orderbook_depth: DEFAULT_ORDERBOOK_DEPTH,
            amount_scales: RwLock::new(HashMap::new()),
        }
    }

    /// Request parameters for a market order. Market buys are sized in quote
    /// on this venue, so the price and amount scale are read first; failing
    /// those reads means no order was sent.
    async fn order_params(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<HashMap<String, String>> {
        let mut params = HashMap::new();
        params.insert("symbol".to_string(), pair_to_symbol(symbol));
        params.insert("type".to_string(), "MARKET".to_string());

        match side {
            OrderSide::Buy => {
                let price = self
                    .current_price(symbol)
                    .await
                    .map_err(|e| not_submitted(e, symbol))?;
                let scale = self
                    .amount_scale(symbol)
                    .await
                    .map_err(|e| not_submitted(e, symbol))?;
                let amount = quantity
                    .checked_mul(price)
                    .ok_or_else(|| {
                        ExchangeError::Rejected(format!("order amount overflow for {}", symbol))
                    })?
                    .round_dp_with_strategy(scale, RoundingStrategy::ToZero);
                params.insert("side".to_string(), "BUY".to_string());
                params.insert("amount".to_string(), amount.to_string());
            }
            OrderSide::Sell => {
                params.insert("side".to_string(), "SELL".to_string());
                params.insert("quantity".to_string(), quantity.to_string());
            }
        }
        Ok(params)
    }

    async fn fetch_market(&self, symbol: &str) -> Result<MarketInfo> {
        let endpoint = format!("/markets/{}", pair_to_symbol(symbol));
        let body = self
            .client
            .request(Method::GET, &endpoint, None, false)
            .await
            .map_err(|e| map_client_error(e, symbol))?;

        let markets: Vec<MarketInfo> = serde_json::from_slice(&body)
            .map_err(|e| ExchangeError::Transport(format!("parse market {}: {}", symbol, e)))?;

        markets
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::PairNotSupported(symbol.to_string()))
    }

    async fn amount_scale(&self, symbol: &str) -> Result<u32> {
        if let Some(scale) = self.amount_scales.read().await.get(symbol) {
            return Ok(*scale);
        }
        let market = self.fetch_market(symbol).await?;
        let scale = market.symbol_trade_limit.amount_scale;
        self.amount_scales
            .write()
            .await
            .insert(symbol.to_string(), scale);
        Ok(scale)
    }

    async fn get_order(&self, order_id: &str, symbol: &str) -> Result<OrderInfo> {
        let endpoint = format!("/orders/{}", order_id);
        let body = self
            .client
            .request(Method::GET, &endpoint, None, true)
            .await
            .map_err(|e| map_client_error(e, symbol))?;

        serde_json::from_slice(&body)
            .map_err(|e| ExchangeError::Transport(format!("parse order {}: {}", order_id, e)))
    }

    async fn balances(&self) -> Result<HashMap<String, Decimal>> {
        let body = self
            .client
            .request(Method::GET, "/accounts/balances", None, true)
            .await
            .map_err(|e| map_client_error(e, "balances"))?;

        let accounts: Vec<AccountBalance> = serde_json::from_slice(&body)
            .map_err(|e| ExchangeError::Transport(format!("parse balances: {}", e)))?;

        let mut balances = HashMap::new();
        for account in accounts {
            if account.account_type != "SPOT" {
                continue;
            }
            for bal in account.balances {
                let available = parse_decimal("available", &bal.available)?;
                if available > Decimal::ZERO {
                    balances.insert(bal.currency, available);
                }
            }
        }

        debug!(balances = ?balances, "fetched balances");
        Ok(balances)
    }
}

#[async_trait]
impl ExchangeGateway for PoloniexExchange {
    fn name(&self) -> &str {
        EXCHANGE_NAME
    }

    async fn load_trading_rules(&self, symbol: &str) -> Result<SymbolTradingRules> {
        let market = self.fetch_market(symbol).await?;
        self.amount_scales
            .write()
            .await
            .insert(symbol.to_string(), market.symbol_trade_limit.amount_scale);
        market.to_rules(symbol)
    }

    async fn current_price(&self, symbol: &str) -> Result<Decimal> {
        let endpoint = format!("/markets/{}/price", pair_to_symbol(symbol));
        let body = self
            .client
            .request(Method::GET, &endpoint, None, false)
            .await
            .map_err(|e| map_client_error(e, symbol))?;

        let resp: PriceResponse = serde_json::from_slice(&body)
            .map_err(|e| ExchangeError::Transport(format!("parse price {}: {}", symbol, e)))?;

        parse_decimal("price", &resp.price)
    }

    async fn get_orderbook(&self, symbol: &str) -> Result<Orderbook> {
        let endpoint = format!("/markets/{}/orderBook", pair_to_symbol(symbol));

        let mut params = HashMap::new();
        params.insert("limit".to_string(), self.orderbook_depth.to_string());

        let body = self
            .client
            .request(Method::GET, &endpoint, Some(params), false)
            .await
            .map_err(|e| map_client_error(e, symbol))?;

        let resp: OrderbookResponse = serde_json::from_slice(&body)
            .map_err(|e| ExchangeError::Transport(format!("parse orderbook: {}", e)))?;

        Ok(resp.to_orderbook(symbol))
    }

    async fn get_candles(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let endpoint = format!("/markets/{}/candles", pair_to_symbol(symbol));

        let mut params = HashMap::new();
        params.insert("interval".to_string(), interval.to_string());
        params.insert("limit".to_string(), limit.to_string());

        let body = self
            .client
            .request(Method::GET, &endpoint, Some(params), false)
            .await
            .map_err(|e| map_client_error(e, symbol))?;

        let rows: Vec<Vec<Value>> = serde_json::from_slice(&body)
            .map_err(|e| ExchangeError::Transport(format!("parse candles {}: {}", symbol, e)))?;

        let mut candles = rows
            .iter()
            .map(|row| parse_candle(row))
            .collect::<Result<Vec<_>>>()?;
        candles.sort_by_key(|c| c.open_time);
        Ok(candles)
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<Fill> {
        let params = self.order_params(symbol, side, quantity).await?;

        let body = self
            .client
            .request(Method::POST, "/orders", Some(params), true)
            .await
            .map_err(|e| map_client_error(e, symbol))?;

        let resp: PlaceOrderResponse = serde_json::from_slice(&body).map_err(|e| {
            ExchangeError::Transport(format!("parse order response for {}: {}", symbol, e))
        })?;

        info!(symbol = %symbol, side = %side, order_id = %resp.id, "order accepted");

        for attempt in 1..=FILL_POLL_ATTEMPTS {
            let order = self.get_order(&resp.id, symbol).await?;
            if let Some(fill) = order.to_fill()? {
                return Ok(fill);
            }
            if order.is_dead() {
                return Err(ExchangeError::Rejected(format!(
                    "order {} for {} ended {}",
                    resp.id, symbol, order.state
                )));
            }
            debug!(order_id = %resp.id, attempt, state = %order.state, "waiting for fill");
            tokio::time::sleep(FILL_POLL_INTERVAL).await;
        }

        Err(ExchangeError::Transport(format!(
            "fill for order {} on {} not confirmed",
            resp.id, symbol
        )))
    }

    async fn fetch_quote_balance(&self) -> Result<Decimal> {
        self.fetch_asset_balance(&self.quote_asset).await
    }

    async fn fetch_asset_balance(&self, asset: &str) -> Result<Decimal> {
        Ok(self.balances().await?.get(asset).copied().unwrap_or_default())
    }
}

/// Poloniex market description.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketInfo {
    symbol_trade_limit: SymbolTradeLimit,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolTradeLimit {
    price_scale: u32,
    quantity_scale: u32,
    amount_scale: u32,
    min_quantity: String,
    min_amount: String,
}

impl MarketInfo {
    fn to_rules(&self, symbol: &str) -> Result<SymbolTradingRules> {
        let limit = &self.symbol_trade_limit;
        let rules = SymbolTradingRules {
            min_qty: parse_decimal("minQuantity", &limit.min_quantity)?,
            min_notional: parse_decimal("minAmount", &limit.min_amount)?,
            qty_step: step_from_scale(limit.quantity_scale),
            price_step: step_from_scale(limit.price_scale),
        };
        debug!(symbol = %symbol, rules = ?rules, "trading rules loaded");
        Ok(rules)
    }
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: String,
}

/// Poloniex orderbook response.
#[derive(Debug, Deserialize)]
struct OrderbookResponse {
    time: i64,
    asks: Vec<String>,
    bids: Vec<String>,
    ts: i64,
}

impl OrderbookResponse {
    fn to_orderbook(&self, symbol: &str) -> Orderbook {
        let timestamp_ms = if self.ts != 0 { self.ts } else { self.time };

        Orderbook {
            symbol: symbol.to_string(),
            bids: parse_price_levels(&self.bids),
            asks: parse_price_levels(&self.asks),
            timestamp: UNIX_EPOCH + Duration::from_millis(timestamp_ms.max(0) as u64),
        }
    }
}

/// Candle rows are positional:
/// [low, high, open, close, amount, quantity, ..., startTime at 12].
fn parse_candle(row: &[Value]) -> Result<Candle> {
    let field = |idx: usize, name: &str| -> Result<Decimal> {
        match row.get(idx) {
            Some(Value::String(s)) => parse_decimal(name, s),
            Some(Value::Number(n)) => parse_decimal(name, &n.to_string()),
            _ => Err(ExchangeError::Transport(format!("candle missing {}", name))),
        }
    };

    let start_ms = row
        .get(12)
        .and_then(Value::as_i64)
        .ok_or_else(|| ExchangeError::Transport("candle missing startTime".to_string()))?;

    Ok(Candle {
        low: field(0, "low")?,
        high: field(1, "high")?,
        open: field(2, "open")?,
        close: field(3, "close")?,
        volume: field(4, "amount")?,
        open_time: DateTime::<Utc>::from_timestamp_millis(start_ms).unwrap_or_default(),
    })
}

/// Poloniex place order response.
#[derive(Debug, Deserialize)]
struct PlaceOrderResponse {
    id: String,
}

/// Poloniex order info response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderInfo {
    id: String,
    state: String,
    filled_quantity: String,
    avg_price: String,
    update_time: i64,
}

impl OrderInfo {
    /// Returns the fill once the order is done executing.
    fn to_fill(&self) -> Result<Option<Fill>> {
        if self.state != "FILLED" && self.state != "PARTIALLY_CANCELED" {
            return Ok(None);
        }
        let filled_quantity = parse_decimal("filledQuantity", &self.filled_quantity)?;
        let filled_price = parse_decimal("avgPrice", &self.avg_price)?;
        if filled_quantity <= Decimal::ZERO || filled_price <= Decimal::ZERO {
            return Ok(None);
        }

        Ok(Some(Fill {
            order_id: self.id.clone(),
            filled_quantity,
            filled_price,
            timestamp: DateTime::<Utc>::from_timestamp_millis(self.update_time)
                .unwrap_or_else(Utc::now),
        }))
    }

    /// True if the order ended without executing anything.
    fn is_dead(&self) -> bool {
        matches!(self.state.as_str(), "CANCELED" | "FAILED" | "EXPIRED")
    }
}

/// Poloniex account balance response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountBalance {
    account_type: String,
    balances: Vec<Balance>,
}

/// Individual currency balance.
#[derive(Debug, Deserialize)]
struct Balance {
    currency: String,
    available: String,
}

/// Maps Poloniex client errors to exchange errors.
fn map_client_error(err: ClientError, symbol: &str) -> ExchangeError {
    match err {
        ClientError::Api(api_err) => match api_err.code {
            21603 => ExchangeError::InsufficientFunds,
            21601 => ExchangeError::PairNotSupported(symbol.to_string()),
            _ if api_err.status >= 500 => {
                ExchangeError::Transport(format!("poloniex error for {}: {}", symbol, api_err))
            }
            _ => ExchangeError::Rejected(format!("poloniex error for {}: {}", symbol, api_err)),
        },
        // Refused locally before anything was sent
        ClientError::RateLimitExceeded { .. } => {
            ExchangeError::Rejected(format!("rate limit exceeded for {}", symbol))
        }
        ClientError::InvalidHeader(e) => ExchangeError::Internal(e.to_string()),
        other => ExchangeError::Transport(other.to_string()),
    }
}

/// A read that failed before the order was built: the venue never saw it.
fn not_submitted(err: ExchangeError, symbol: &str) -> ExchangeError {
    if err.is_outcome_unknown() {
        ExchangeError::Rejected(format!("order for {} not sent: {}", symbol, err))
    } else {
        err
    }
}
