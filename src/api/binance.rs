use super::{
    BuyFill, ExchangeClient, ExchangeError, ExchangeResult, MarketDataClient, OrderAck,
    OrderStatus,
};
use crate::config::BinanceSettings;
use crate::market::{DepthSnapshot, PriceLevel};
use crate::models::{precision_from_step, Balance, Candle, Interval, SymbolInfo};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 10;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Binance spot REST client
///
/// Cloneable; all clones share the HTTP pool and the request rate limiter.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    rest_url: String,
    api_key: String,
    api_secret: String,
    recv_window_ms: u64,
    rate_limiter: Arc<BinanceRateLimiter>,
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullOrderResponse {
    order_id: u64,
    status: String,
    #[serde(default)]
    executed_qty: String,
    #[serde(default)]
    cummulative_quote_qty: String,
    #[serde(default)]
    fills: Vec<FillResponse>,
}

#[derive(Debug, Deserialize)]
struct FillResponse {
    price: String,
    qty: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderIdResponse {
    order_id: u64,
}

#[derive(Debug, Deserialize)]
struct OrderStatusResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct OrderListResponse {
    orders: Vec<OrderIdResponse>,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<BalanceResponse>,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<SymbolResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolResponse {
    symbol: String,
    status: String,
    base_asset: String,
    quote_asset: String,
    #[serde(default)]
    permissions: Vec<String>,
    #[serde(default)]
    permission_sets: Vec<Vec<String>>,
    #[serde(default)]
    filters: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DepthResponse {
    last_update_id: u64,
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

type KlineRow = (
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    u64,
    String,
    String,
    serde_json::Value,
);

// ============================================================================
// Helpers
// ============================================================================

/// HMAC-SHA256 of the query string, hex encoded
pub fn sign_query(secret: &str, query: &str) -> ExchangeResult<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| ExchangeError::InvalidSecret)?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Plain decimal notation without trailing zeros ("0.00100000" -> "0.001")
pub fn format_decimal(value: f64) -> String {
    let formatted = format!("{:.8}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

pub(crate) fn parse_f64(field: &str, value: &str) -> ExchangeResult<f64> {
    value
        .parse::<f64>()
        .map_err(|_| ExchangeError::Decode(format!("{} is not a number: {:?}", field, value)))
}

fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn parse_levels(levels: &[[String; 2]]) -> ExchangeResult<Vec<PriceLevel>> {
    levels
        .iter()
        .map(|[price, qty]| Ok(PriceLevel::new(parse_f64("price", price)?, parse_f64("qty", qty)?)))
        .collect()
}

/// Quantity-weighted fill price, falling back to cumulative quote / executed
fn average_fill(order: &FullOrderResponse) -> ExchangeResult<(f64, f64)> {
    let mut cost = 0.0;
    let mut qty = 0.0;
    for fill in &order.fills {
        let fill_qty = parse_f64("fill qty", &fill.qty)?;
        cost += parse_f64("fill price", &fill.price)? * fill_qty;
        qty += fill_qty;
    }

    if qty > 0.0 {
        return Ok((cost / qty, qty));
    }

    let executed = if order.executed_qty.is_empty() {
        0.0
    } else {
        parse_f64("executedQty", &order.executed_qty)?
    };
    let quote = if order.cummulative_quote_qty.is_empty() {
        0.0
    } else {
        parse_f64("cummulativeQuoteQty", &order.cummulative_quote_qty)?
    };
    if executed > 0.0 {
        Ok((quote / executed, executed))
    } else {
        Ok((0.0, 0.0))
    }
}

fn filter_value<'a>(filters: &'a [serde_json::Value], filter_type: &str, key: &str) -> Option<&'a str> {
    filters
        .iter()
        .find(|f| f.get("filterType").and_then(|t| t.as_str()) == Some(filter_type))
        .and_then(|f| f.get(key))
        .and_then(|v| v.as_str())
}

fn symbol_info(raw: SymbolResponse) -> SymbolInfo {
    let price_precision = filter_value(&raw.filters, "PRICE_FILTER", "tickSize")
        .map(precision_from_step)
        .unwrap_or(8);
    let quantity_precision = filter_value(&raw.filters, "LOT_SIZE", "stepSize")
        .map(precision_from_step)
        .unwrap_or(8);

    let mut permissions = raw.permissions;
    permissions.extend(raw.permission_sets.into_iter().flatten());
    permissions.sort();
    permissions.dedup();

    SymbolInfo {
        symbol: raw.symbol,
        base_asset: raw.base_asset,
        quote_asset: raw.quote_asset,
        status: raw.status,
        permissions,
        price_precision,
        quantity_precision,
    }
}

fn candle_from_row(row: KlineRow) -> ExchangeResult<Candle> {
    let (open_time, open, high, low, close, volume, close_time, quote, trades, taker_base, taker_quote, _) =
        row;
    Ok(Candle {
        open_time,
        close_time,
        open: parse_f64("open", &open)?,
        high: parse_f64("high", &high)?,
        low: parse_f64("low", &low)?,
        close: parse_f64("close", &close)?,
        base_volume: parse_f64("volume", &volume)?,
        quote_volume: parse_f64("quote volume", &quote)?,
        trade_count: trades,
        taker_buy_base_volume: parse_f64("taker base", &taker_base)?,
        taker_buy_quote_volume: parse_f64("taker quote", &taker_quote)?,
        closed: true,
    })
}

impl BinanceClient {
    /// Create a new client from the `[binance]` settings
    pub fn new(settings: &BinanceSettings) -> ExchangeResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let per_second = NonZeroU32::new(settings.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        Ok(Self {
            client,
            rest_url: settings.rest_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            api_secret: settings.api_secret.clone(),
            recv_window_ms: settings.recv_window_ms,
            rate_limiter,
        })
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        url: String,
        with_key: bool,
    ) -> ExchangeResult<T> {
        self.rate_limiter.until_ready().await;

        let mut request = self.client.request(method, &url);
        if with_key {
            request = request.header("X-MBX-APIKEY", &self.api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::debug!("Binance {} -> {}: {}", url, status, body);
            return Err(ExchangeError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }

    async fn public<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        let url = if params.is_empty() {
            format!("{}{}", self.rest_url, path)
        } else {
            format!("{}{}?{}", self.rest_url, path, encode_query(params))
        };
        self.send(Method::GET, url, false).await
    }

    /// Signed endpoint: appends timestamp, recvWindow and the signature
    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> ExchangeResult<T> {
        params.push(("recvWindow", self.recv_window_ms.to_string()));
        params.push(("timestamp", chrono::Utc::now().timestamp_millis().to_string()));

        let query = encode_query(&params);
        let signature = sign_query(&self.api_secret, &query)?;
        let url = format!("{}{}?{}&signature={}", self.rest_url, path, query, signature);
        self.send(method, url, true).await
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    async fn place_market_buy(
        &self,
        symbol: &str,
        quote_notional: f64,
    ) -> ExchangeResult<BuyFill> {
        let order: FullOrderResponse = self
            .signed(
                Method::POST,
                "/api/v3/order",
                vec![
                    ("symbol", symbol.to_string()),
                    ("side", "BUY".to_string()),
                    ("type", "MARKET".to_string()),
                    ("quoteOrderQty", format_decimal(quote_notional)),
                    ("newOrderRespType", "FULL".to_string()),
                ],
            )
            .await?;

        let status = OrderStatus::parse(&order.status);
        if status == OrderStatus::Rejected {
            return Err(ExchangeError::Rejected(format!(
                "market buy {} order {}",
                symbol, order.order_id
            )));
        }

        let (avg_fill_price, filled_qty) = average_fill(&order)?;
        Ok(BuyFill {
            order_id: order.order_id,
            avg_fill_price,
            filled_qty,
            status,
        })
    }

    async fn order_status(&self, symbol: &str, order_id: u64) -> ExchangeResult<OrderStatus> {
        let response: OrderStatusResponse = self
            .signed(
                Method::GET,
                "/api/v3/order",
                vec![("symbol", symbol.to_string()), ("orderId", order_id.to_string())],
            )
            .await?;
        Ok(OrderStatus::parse(&response.status))
    }

    async fn cancel_order(&self, symbol: &str, order_id: u64) -> ExchangeResult<()> {
        let _: serde_json::Value = self
            .signed(
                Method::DELETE,
                "/api/v3/order",
                vec![("symbol", symbol.to_string()), ("orderId", order_id.to_string())],
            )
            .await?;
        Ok(())
    }

    async fn place_market_sell(&self, symbol: &str, quantity: f64) -> ExchangeResult<OrderAck> {
        let response: OrderIdResponse = self
            .signed(
                Method::POST,
                "/api/v3/order",
                vec![
                    ("symbol", symbol.to_string()),
                    ("side", "SELL".to_string()),
                    ("type", "MARKET".to_string()),
                    ("quantity", format_decimal(quantity)),
                ],
            )
            .await?;
        Ok(OrderAck {
            order_id: response.order_id,
        })
    }

    async fn place_oco_sell(
        &self,
        symbol: &str,
        quantity: f64,
        take_profit: f64,
        stop: f64,
        stop_limit: f64,
    ) -> ExchangeResult<OrderAck> {
        let response: OrderListResponse = self
            .signed(
                Method::POST,
                "/api/v3/order/oco",
                vec![
                    ("symbol", symbol.to_string()),
                    ("side", "SELL".to_string()),
                    ("quantity", format_decimal(quantity)),
                    ("price", format_decimal(take_profit)),
                    ("stopPrice", format_decimal(stop)),
                    ("stopLimitPrice", format_decimal(stop_limit)),
                    ("stopLimitTimeInForce", "GTC".to_string()),
                    ("newOrderRespType", "FULL".to_string()),
                ],
            )
            .await?;

        // Cancelling either leg cancels the whole list
        let first = response
            .orders
            .first()
            .ok_or_else(|| ExchangeError::Decode("OCO response without orders".to_string()))?;
        Ok(OrderAck {
            order_id: first.order_id,
        })
    }

    async fn place_stop_limit_sell(
        &self,
        symbol: &str,
        quantity: f64,
        stop: f64,
        limit: f64,
    ) -> ExchangeResult<OrderAck> {
        let response: OrderIdResponse = self
            .signed(
                Method::POST,
                "/api/v3/order",
                vec![
                    ("symbol", symbol.to_string()),
                    ("side", "SELL".to_string()),
                    ("type", "STOP_LOSS_LIMIT".to_string()),
                    ("timeInForce", "GTC".to_string()),
                    ("quantity", format_decimal(quantity)),
                    ("price", format_decimal(limit)),
                    ("stopPrice", format_decimal(stop)),
                    ("newOrderRespType", "FULL".to_string()),
                ],
            )
            .await?;
        Ok(OrderAck {
            order_id: response.order_id,
        })
    }

    async fn account_balances(&self) -> ExchangeResult<HashMap<String, Balance>> {
        let account: AccountResponse = self.signed(Method::GET, "/api/v3/account", vec![]).await?;

        account
            .balances
            .into_iter()
            .map(|b| {
                let balance = Balance {
                    free: parse_f64("free", &b.free)?,
                    locked: parse_f64("locked", &b.locked)?,
                };
                Ok((b.asset, balance))
            })
            .collect()
    }
}

#[async_trait]
impl MarketDataClient for BinanceClient {
    async fn exchange_info(&self) -> ExchangeResult<Vec<SymbolInfo>> {
        let info: ExchangeInfoResponse = self.public("/api/v3/exchangeInfo", &[]).await?;
        Ok(info.symbols.into_iter().map(symbol_info).collect())
    }

    async fn depth_snapshot(&self, symbol: &str, limit: u32) -> ExchangeResult<DepthSnapshot> {
        let depth: DepthResponse = self
            .public(
                "/api/v3/depth",
                &[("symbol", symbol.to_string()), ("limit", limit.to_string())],
            )
            .await?;

        Ok(DepthSnapshot {
            last_update_id: depth.last_update_id,
            bids: parse_levels(&depth.bids)?,
            asks: parse_levels(&depth.asks)?,
        })
    }

    async fn klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>> {
        let rows: Vec<KlineRow> = self
            .public(
                "/api/v3/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.as_str().to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        let now = chrono::Utc::now().timestamp_millis();
        let mut candles = rows
            .into_iter()
            .map(candle_from_row)
            .collect::<ExchangeResult<Vec<_>>>()?;

        // The newest kline is still forming
        if let Some(last) = candles.last_mut() {
            last.closed = last.close_time < now;
        }
        Ok(candles)
    }
}
