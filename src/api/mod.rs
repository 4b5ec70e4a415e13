// Exchange API module
// Order, account and market-data contracts plus the Binance REST client

pub mod binance;

pub use binance::BinanceClient;

use crate::market::DepthSnapshot;
use crate::models::{Balance, Candle, Interval, SymbolInfo};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Exchange-reported order state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    PendingCancel,
    Rejected,
    Expired,
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "NEW" => OrderStatus::New,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "FILLED" => OrderStatus::Filled,
            "CANCELED" => OrderStatus::Canceled,
            "PENDING_CANCEL" => OrderStatus::PendingCancel,
            "REJECTED" => OrderStatus::Rejected,
            "EXPIRED" | "EXPIRED_IN_MATCH" => OrderStatus::Expired,
            _ => OrderStatus::Unknown,
        }
    }

    pub fn is_filled(&self) -> bool {
        matches!(self, OrderStatus::Filled)
    }
}

/// Result of a market buy sized in quote currency
#[derive(Debug, Clone, PartialEq)]
pub struct BuyFill {
    pub order_id: u64,
    /// Quantity-weighted price over all partial fills
    pub avg_fill_price: f64,
    pub filled_qty: f64,
    pub status: OrderStatus,
}

/// Acknowledged sell-side order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderAck {
    pub order_id: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("exchange API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("failed to decode exchange response: {0}")]
    Decode(String),

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("invalid API secret")]
    InvalidSecret,
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::Decode(err.to_string())
    }
}

pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

/// Order placement and account access used by the trade lifecycle
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn place_market_buy(&self, symbol: &str, quote_notional: f64)
        -> ExchangeResult<BuyFill>;

    async fn order_status(&self, symbol: &str, order_id: u64) -> ExchangeResult<OrderStatus>;

    async fn cancel_order(&self, symbol: &str, order_id: u64) -> ExchangeResult<()>;

    async fn place_market_sell(&self, symbol: &str, quantity: f64) -> ExchangeResult<OrderAck>;

    /// One-cancels-other sell: take-profit limit leg plus stop-limit leg
    async fn place_oco_sell(
        &self,
        symbol: &str,
        quantity: f64,
        take_profit: f64,
        stop: f64,
        stop_limit: f64,
    ) -> ExchangeResult<OrderAck>;

    async fn place_stop_limit_sell(
        &self,
        symbol: &str,
        quantity: f64,
        stop: f64,
        limit: f64,
    ) -> ExchangeResult<OrderAck>;

    /// Asset -> free/locked, assets with no entry hold nothing
    async fn account_balances(&self) -> ExchangeResult<HashMap<String, Balance>>;
}

/// Public market data needed to bootstrap and repair instrument state
#[async_trait]
pub trait MarketDataClient: Send + Sync {
    async fn exchange_info(&self) -> ExchangeResult<Vec<SymbolInfo>>;

    async fn depth_snapshot(&self, symbol: &str, limit: u32) -> ExchangeResult<DepthSnapshot>;

    async fn klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_status_parse() {
        assert_eq!(OrderStatus::parse("FILLED"), OrderStatus::Filled);
        assert_eq!(OrderStatus::parse("EXPIRED_IN_MATCH"), OrderStatus::Expired);
        assert_eq!(OrderStatus::parse("SOMETHING_NEW"), OrderStatus::Unknown);
        assert!(OrderStatus::Filled.is_filled());
        assert!(!OrderStatus::PartiallyFilled.is_filled());
    }

    #[test]
    fn test_order_status_deserialize() {
        let status: OrderStatus = serde_json::from_str("\"PARTIALLY_FILLED\"").unwrap();
        assert_eq!(status, OrderStatus::PartiallyFilled);
        let status: OrderStatus = serde_json::from_str("\"WHATEVER\"").unwrap();
        assert_eq!(status, OrderStatus::Unknown);
    }
}
