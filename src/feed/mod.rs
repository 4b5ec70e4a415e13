// Market data feed module
// Parses combined-stream messages and routes them into the shared instruments
pub mod binance_ws;

pub use binance_ws::{spawn_feed, stream_names};

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::api::MarketDataClient;
use crate::market::{DepthUpdate, Markets, Pair, PriceLevel, SyncOutcome};
use crate::models::{AggTrade, Candle, Interval, TickerUpdate};

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("malformed stream message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid number in {field}: {value:?}")]
    Number { field: &'static str, value: String },

    #[error("unknown kline interval {0:?}")]
    Interval(String),

    #[error("stream error: {0}")]
    Stream(String),
}

pub type FeedResult<T> = std::result::Result<T, FeedError>;

/// One decoded stream event
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    Ticker { symbol: String, ticker: TickerUpdate },
    AggTrade { symbol: String, trade: AggTrade },
    Depth { symbol: String, update: DepthUpdate },
    Kline { symbol: String, interval: Interval, candle: Candle },
}

impl MarketEvent {
    pub fn symbol(&self) -> &str {
        match self {
            MarketEvent::Ticker { symbol, .. }
            | MarketEvent::AggTrade { symbol, .. }
            | MarketEvent::Depth { symbol, .. }
            | MarketEvent::Kline { symbol, .. } => symbol,
        }
    }
}

// ============================================================================
// Wire formats
// ============================================================================

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
struct RawTicker {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price_change: String,
    #[serde(rename = "P")]
    price_change_percent: String,
    #[serde(rename = "w")]
    weighted_avg_price: String,
    #[serde(rename = "c")]
    last_price: String,
    #[serde(rename = "Q")]
    last_quantity: String,
    #[serde(rename = "b")]
    best_bid: String,
    #[serde(rename = "B")]
    best_bid_quantity: String,
    #[serde(rename = "a")]
    best_ask: String,
    #[serde(rename = "A")]
    best_ask_quantity: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "v")]
    base_volume: String,
    #[serde(rename = "q")]
    quote_volume: String,
    #[serde(rename = "n")]
    trade_count: u64,
}

#[derive(Deserialize)]
struct RawAggTrade {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "a")]
    id: u64,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "f")]
    first_trade_id: u64,
    #[serde(rename = "l")]
    last_trade_id: u64,
    #[serde(rename = "T")]
    trade_time: i64,
    #[serde(rename = "m")]
    buyer_is_maker: bool,
}

#[derive(Deserialize)]
struct RawDepth {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "U")]
    first_update_id: u64,
    #[serde(rename = "u")]
    final_update_id: u64,
    #[serde(rename = "b")]
    bids: Vec<[String; 2]>,
    #[serde(rename = "a")]
    asks: Vec<[String; 2]>,
}

#[derive(Deserialize)]
struct RawKlineEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: RawKline,
}

#[derive(Deserialize)]
struct RawKline {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    base_volume: String,
    #[serde(rename = "q")]
    quote_volume: String,
    #[serde(rename = "n")]
    trade_count: u64,
    #[serde(rename = "V")]
    taker_buy_base_volume: String,
    #[serde(rename = "Q")]
    taker_buy_quote_volume: String,
    #[serde(rename = "x")]
    closed: bool,
}

fn num(field: &'static str, value: &str) -> FeedResult<f64> {
    value.parse::<f64>().map_err(|_| FeedError::Number {
        field,
        value: value.to_string(),
    })
}

fn levels(raw: &[[String; 2]]) -> FeedResult<Vec<PriceLevel>> {
    raw.iter()
        .map(|[price, qty]| Ok(PriceLevel::new(num("price", price)?, num("quantity", qty)?)))
        .collect()
}

fn decode<T: DeserializeOwned>(data: Value) -> FeedResult<T> {
    Ok(serde_json::from_value(data)?)
}

impl RawTicker {
    fn into_event(self) -> FeedResult<MarketEvent> {
        let ticker = TickerUpdate {
            price_change: num("p", &self.price_change)?,
            price_change_percent: num("P", &self.price_change_percent)?,
            weighted_avg_price: num("w", &self.weighted_avg_price)?,
            last_price: num("c", &self.last_price)?,
            last_quantity: num("Q", &self.last_quantity)?,
            best_bid: num("b", &self.best_bid)?,
            best_bid_quantity: num("B", &self.best_bid_quantity)?,
            best_ask: num("a", &self.best_ask)?,
            best_ask_quantity: num("A", &self.best_ask_quantity)?,
            open: num("o", &self.open)?,
            high: num("h", &self.high)?,
            low: num("l", &self.low)?,
            base_volume: num("v", &self.base_volume)?,
            quote_volume: num("q", &self.quote_volume)?,
            trade_count: self.trade_count,
        };
        Ok(MarketEvent::Ticker {
            symbol: self.symbol,
            ticker,
        })
    }
}

impl RawKlineEvent {
    fn into_event(self) -> FeedResult<MarketEvent> {
        let k = self.kline;
        let interval = Interval::parse(&k.interval).ok_or_else(|| FeedError::Interval(k.interval.clone()))?;
        let candle = Candle {
            open_time: k.open_time,
            close_time: k.close_time,
            open: num("o", &k.open)?,
            high: num("h", &k.high)?,
            low: num("l", &k.low)?,
            close: num("c", &k.close)?,
            base_volume: num("v", &k.base_volume)?,
            quote_volume: num("q", &k.quote_volume)?,
            trade_count: k.trade_count,
            taker_buy_base_volume: num("V", &k.taker_buy_base_volume)?,
            taker_buy_quote_volume: num("Q", &k.taker_buy_quote_volume)?,
            closed: k.closed,
        };
        Ok(MarketEvent::Kline {
            symbol: self.symbol,
            interval,
            candle,
        })
    }
}

/// Decode one combined-stream text frame
///
/// Returns `Ok(None)` for well-formed messages carrying an event type the
/// feed does not track. Exchange `error` messages are reported as
/// `FeedError::Stream`.
pub fn parse_message(text: &str) -> FeedResult<Option<MarketEvent>> {
    let envelope: Envelope = serde_json::from_str(text)?;
    if let Some(error) = envelope.error {
        return Err(FeedError::Stream(error.to_string()));
    }
    let Some(data) = envelope.data else {
        return Ok(None);
    };

    let kind = data.get("e").and_then(Value::as_str).unwrap_or_default().to_string();
    let event = match kind.as_str() {
        "24hrTicker" => decode::<RawTicker>(data)?.into_event()?,
        "aggTrade" => {
            let raw: RawAggTrade = decode(data)?;
            MarketEvent::AggTrade {
                trade: AggTrade {
                    id: raw.id,
                    price: num("p", &raw.price)?,
                    quantity: num("q", &raw.quantity)?,
                    first_trade_id: raw.first_trade_id,
                    last_trade_id: raw.last_trade_id,
                    trade_time: raw.trade_time,
                    buyer_is_maker: raw.buyer_is_maker,
                },
                symbol: raw.symbol,
            }
        }
        "depthUpdate" => {
            let raw: RawDepth = decode(data)?;
            MarketEvent::Depth {
                update: DepthUpdate {
                    first_update_id: raw.first_update_id,
                    final_update_id: raw.final_update_id,
                    bids: levels(&raw.bids)?,
                    asks: levels(&raw.asks)?,
                },
                symbol: raw.symbol,
            }
        }
        "kline" => decode::<RawKlineEvent>(data)?.into_event()?,
        _ => return Ok(None),
    };

    Ok(Some(event))
}

// ============================================================================
// Routing
// ============================================================================

/// Apply one event to its instrument
///
/// Returns true when the instrument's order book can only be repaired with a
/// fresh snapshot.
pub fn apply_event(markets: &Markets, event: MarketEvent) -> bool {
    let Some(pair) = markets.get(event.symbol()) else {
        tracing::debug!("Event for untracked symbol {}", event.symbol());
        return false;
    };

    match event {
        MarketEvent::Ticker { ticker, .. } => pair.apply_ticker(ticker),
        MarketEvent::AggTrade { trade, .. } => pair.apply_agg_trade(trade),
        MarketEvent::Kline {
            interval, candle, ..
        } => pair.apply_kline(interval, candle),
        MarketEvent::Depth { update, .. } => match pair.apply_depth_update(update) {
            SyncOutcome::ResyncRequired => {
                tracing::warn!("🔄 {} order book out of sync, resync required", pair.symbol());
                return true;
            }
            SyncOutcome::Gap {
                expected,
                first_update_id,
            } => {
                tracing::debug!(
                    symbol = pair.symbol(),
                    expected,
                    first_update_id,
                    "depth gap, diff dropped"
                );
            }
            SyncOutcome::Applied | SyncOutcome::Stale | SyncOutcome::Buffered => {}
        },
    }

    false
}

/// Install fresh REST snapshots into books reset before the stream connected
///
/// Diffs that arrive meanwhile are buffered by each book and replayed on
/// install. Returns false when any book could not be brought live.
pub async fn sync_books(client: &dyn MarketDataClient, pairs: &[Arc<Pair>], depth_limit: u32) -> bool {
    let mut all_live = true;
    for pair in pairs {
        match client.depth_snapshot(pair.symbol(), depth_limit).await {
            Ok(snapshot) => {
                if pair.install_depth_snapshot(snapshot) == SyncOutcome::ResyncRequired {
                    tracing::warn!("{} buffered depth does not straddle snapshot", pair.symbol());
                    all_live = false;
                }
            }
            Err(e) => {
                tracing::warn!("Depth snapshot for {} failed: {}", pair.symbol(), e);
                all_live = false;
            }
        }
    }

    all_live
}

/// Load `history` candles of every interval for every instrument
///
/// Returns the number of instruments whose three series all loaded.
pub async fn bootstrap_klines(client: &dyn MarketDataClient, markets: &Markets, history: u32) -> usize {
    let total = markets.len();
    let mut ready = 0;

    for (i, pair) in markets.iter().enumerate() {
        let mut loaded = true;
        for interval in Interval::ALL {
            match client.klines(pair.symbol(), interval, history).await {
                Ok(candles) => pair.init_klines(interval, candles),
                Err(e) => {
                    tracing::warn!("{} {} klines failed: {}", pair.symbol(), interval.as_str(), e);
                    loaded = false;
                }
            }
        }

        if loaded {
            ready += 1;
        }
        tracing::info!("📈 Klines loaded for {} ({}/{})", pair.symbol(), i + 1, total);
    }

    ready
}
