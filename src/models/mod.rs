use serde::{Deserialize, Serialize};

/// Candle interval tracked per instrument
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Interval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
}

impl Interval {
    pub const ALL: [Interval; 3] = [
        Interval::OneMinute,
        Interval::FifteenMinutes,
        Interval::OneHour,
    ];

    /// Exchange notation ("1m", "15m", "1h")
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::FifteenMinutes => "15m",
            Interval::OneHour => "1h",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Interval::OneMinute),
            "15m" => Some(Interval::FifteenMinutes),
            "1h" => Some(Interval::OneHour),
            _ => None,
        }
    }
}

/// OHLCV kline as delivered by the exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub open_time: i64, // ms since epoch
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub base_volume: f64,
    pub quote_volume: f64,
    pub trade_count: u64,
    pub taker_buy_base_volume: f64,
    pub taker_buy_quote_volume: f64,
    pub closed: bool,
}

/// Position horizon
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Horizon {
    ShortTerm,
    LongTerm,
}

impl Horizon {
    pub fn is_long_term(&self) -> bool {
        matches!(self, Horizon::LongTerm)
    }
}

/// Free/locked amounts of one asset
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Balance {
    pub free: f64,
    pub locked: f64,
}

impl Balance {
    pub fn total(&self) -> f64 {
        self.free + self.locked
    }
}

/// Aggregated trade print
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggTrade {
    pub id: u64,
    pub price: f64,
    pub quantity: f64,
    pub first_trade_id: u64,
    pub last_trade_id: u64,
    pub trade_time: i64,
    pub buyer_is_maker: bool,
}

/// Rolling 24h ticker statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TickerUpdate {
    pub price_change: f64,
    pub price_change_percent: f64,
    pub weighted_avg_price: f64,
    pub last_price: f64,
    pub last_quantity: f64,
    pub best_bid: f64,
    pub best_bid_quantity: f64,
    pub best_ask: f64,
    pub best_ask_quantity: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub base_volume: f64,
    pub quote_volume: f64,
    pub trade_count: u64,
}

/// Exchange metadata for one spot symbol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SymbolInfo {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub status: String,
    pub permissions: Vec<String>,
    pub price_precision: u32,
    pub quantity_precision: u32,
}

impl SymbolInfo {
    /// Spot instrument quoted in `quote`, trading, not a leveraged token and
    /// not a stablecoin pair.
    pub fn is_tradeable(&self, quote: &str) -> bool {
        self.quote_asset == quote
            && self.status == "TRADING"
            && !self.permissions.iter().any(|p| p == "LEVERAGED")
            && !self.base_asset.contains("USD")
    }
}

/// Number of decimals implied by an exchange step ("0.00010000" -> 4)
pub fn precision_from_step(step: &str) -> u32 {
    let trimmed = step.trim_end_matches('0');
    match trimmed.split_once('.') {
        Some((_, decimals)) => decimals.len() as u32,
        None => 0,
    }
}

/// Round to `precision` decimals
pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

/// Truncate (towards zero) to `precision` decimals
pub fn truncate_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).trunc() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precision_from_step() {
        assert_eq!(precision_from_step("0.01000000"), 2);
        assert_eq!(precision_from_step("0.00000100"), 6);
        assert_eq!(precision_from_step("1.00000000"), 0);
        assert_eq!(precision_from_step("10"), 0);
    }

    #[test]
    fn test_round_and_truncate() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(1.235001, 2), 1.24);
        assert_eq!(truncate_to(1.23999, 2), 1.23);
        assert_eq!(truncate_to(1.8 * 0.999999999, 4), 1.7999);
    }

    #[test]
    fn test_tradeable_filter() {
        let mut info = SymbolInfo {
            symbol: "ADAUSDT".to_string(),
            base_asset: "ADA".to_string(),
            quote_asset: "USDT".to_string(),
            status: "TRADING".to_string(),
            permissions: vec!["SPOT".to_string()],
            price_precision: 4,
            quantity_precision: 1,
        };
        assert!(info.is_tradeable("USDT"));
        assert!(!info.is_tradeable("BTC"));

        info.permissions.push("LEVERAGED".to_string());
        assert!(!info.is_tradeable("USDT"));

        info.permissions.pop();
        info.base_asset = "TUSD".to_string();
        assert!(!info.is_tradeable("USDT"));
    }

    #[test]
    fn test_interval_roundtrip_names() {
        for interval in Interval::ALL {
            assert_eq!(Interval::parse(interval.as_str()), Some(interval));
        }
        assert_eq!(Interval::parse("4h"), None);
    }
}
