use crate::market::candle_series::CandleSeries;
use crate::market::order_book::{DepthSnapshot, DepthUpdate, OrderBook, SyncOutcome};
use crate::models::{AggTrade, Candle, Horizon, Interval, SymbolInfo, TickerUpdate};
use crate::strategy::rating::{self, Rating};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Aggregated trades kept per instrument
pub const AGG_TRADE_HISTORY: usize = 1000;

/// Everything the feed mutates for one instrument
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PairState {
    pub last_price: Option<f64>,
    pub ticker: TickerUpdate,
    pub order_book: OrderBook,
    pub klines_1m: CandleSeries,
    pub klines_15m: CandleSeries,
    pub klines_1h: CandleSeries,
    #[serde(skip)]
    pub agg_trades: VecDeque<AggTrade>,
}

impl PairState {
    pub fn series(&self, interval: Interval) -> &CandleSeries {
        match interval {
            Interval::OneMinute => &self.klines_1m,
            Interval::FifteenMinutes => &self.klines_15m,
            Interval::OneHour => &self.klines_1h,
        }
    }

    pub fn series_mut(&mut self, interval: Interval) -> &mut CandleSeries {
        match interval {
            Interval::OneMinute => &mut self.klines_1m,
            Interval::FifteenMinutes => &mut self.klines_15m,
            Interval::OneHour => &mut self.klines_1h,
        }
    }
}

/// Immutable copy of an instrument at one point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairSnapshot {
    pub info: SymbolInfo,
    pub state: PairState,
}

impl PairSnapshot {
    pub fn short_term_rating(&self) -> Rating {
        rating::short_term_rating(&self.state)
    }

    pub fn long_term_rating(&self) -> Rating {
        rating::long_term_rating(&self.state)
    }
}

/// Live instrument shared between the feed and the worker loops
///
/// Feed events take the write lock for the whole event, so readers never see
/// a partially merged depth diff.
#[derive(Debug)]
pub struct Pair {
    info: SymbolInfo,
    state: RwLock<PairState>,
}

impl Pair {
    pub fn new(info: SymbolInfo) -> Self {
        Self {
            info,
            state: RwLock::new(PairState::default()),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.info.symbol
    }

    pub fn info(&self) -> &SymbolInfo {
        &self.info
    }

    pub fn base_asset(&self) -> &str {
        &self.info.base_asset
    }

    fn read(&self) -> RwLockReadGuard<'_, PairState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PairState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> PairSnapshot {
        PairSnapshot {
            info: self.info.clone(),
            state: self.read().clone(),
        }
    }

    pub fn last_price(&self) -> Option<f64> {
        self.read().last_price
    }

    /// All three candle series loaded
    pub fn klines_ready(&self) -> bool {
        let state = self.read();
        Interval::ALL.iter().all(|i| state.series(*i).is_ready())
    }

    pub fn order_book_live(&self) -> bool {
        self.read().order_book.is_live()
    }

    // ---- feed events ----

    pub fn install_depth_snapshot(&self, snapshot: DepthSnapshot) -> SyncOutcome {
        self.write().order_book.install_snapshot(snapshot)
    }

    pub fn apply_depth_update(&self, update: DepthUpdate) -> SyncOutcome {
        self.write().order_book.apply_update(update)
    }

    pub fn reset_order_book(&self) {
        self.write().order_book.reset();
    }

    pub fn apply_ticker(&self, ticker: TickerUpdate) {
        let mut state = self.write();
        state.last_price = Some(ticker.last_price);
        state.ticker = ticker;
    }

    pub fn apply_agg_trade(&self, trade: AggTrade) {
        let mut state = self.write();
        state.agg_trades.push_back(trade);
        while state.agg_trades.len() > AGG_TRADE_HISTORY {
            state.agg_trades.pop_front();
        }
    }

    pub fn init_klines(&self, interval: Interval, candles: Vec<Candle>) {
        self.write().series_mut(interval).init(candles);
    }

    pub fn apply_kline(&self, interval: Interval, candle: Candle) {
        self.write().series_mut(interval).apply_live(candle);
    }

    // ---- ratings ----

    pub fn short_term_rating(&self) -> Rating {
        rating::short_term_rating(&self.read())
    }

    pub fn long_term_rating(&self) -> Rating {
        rating::long_term_rating(&self.read())
    }

    pub fn sell_signal(&self, horizon: Horizon) -> bool {
        rating::sell_signal(&self.read(), horizon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::PriceLevel;
    use std::sync::Arc;
    use std::thread;

    fn test_info(symbol: &str, base: &str) -> SymbolInfo {
        SymbolInfo {
            symbol: symbol.to_string(),
            base_asset: base.to_string(),
            quote_asset: "USDT".to_string(),
            status: "TRADING".to_string(),
            permissions: vec!["SPOT".to_string()],
            price_precision: 4,
            quantity_precision: 2,
        }
    }

    fn agg_trade(id: u64) -> AggTrade {
        AggTrade {
            id,
            price: 1.0,
            quantity: 2.0,
            first_trade_id: id,
            last_trade_id: id,
            trade_time: id as i64,
            buyer_is_maker: false,
        }
    }

    #[test]
    fn test_ticker_sets_last_price() {
        let pair = Pair::new(test_info("ADAUSDT", "ADA"));
        assert_eq!(pair.last_price(), None);

        pair.apply_ticker(TickerUpdate {
            last_price: 1.25,
            best_bid: 1.24,
            best_ask: 1.26,
            ..Default::default()
        });
        assert_eq!(pair.last_price(), Some(1.25));
        assert_eq!(pair.snapshot().state.ticker.best_ask, 1.26);
    }

    #[test]
    fn test_agg_trade_history_is_bounded() {
        let pair = Pair::new(test_info("ADAUSDT", "ADA"));
        for id in 0..(AGG_TRADE_HISTORY as u64 + 50) {
            pair.apply_agg_trade(agg_trade(id));
        }
        let state = pair.snapshot().state;
        assert_eq!(state.agg_trades.len(), AGG_TRADE_HISTORY);
        assert_eq!(state.agg_trades.front().map(|t| t.id), Some(50));
    }

    #[test]
    fn test_klines_ready_needs_all_intervals() {
        let pair = Pair::new(test_info("ADAUSDT", "ADA"));
        let candle = Candle {
            open_time: 0,
            close_time: 59_999,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            base_volume: 1.0,
            quote_volume: 1.0,
            trade_count: 1,
            taker_buy_base_volume: 0.5,
            taker_buy_quote_volume: 0.5,
            closed: true,
        };
        pair.init_klines(Interval::OneMinute, vec![candle.clone()]);
        pair.init_klines(Interval::FifteenMinutes, vec![candle.clone()]);
        assert!(!pair.klines_ready());
        pair.init_klines(Interval::OneHour, vec![candle]);
        assert!(pair.klines_ready());
    }

    #[test]
    fn test_snapshot_survives_json() {
        let pair = Pair::new(test_info("ADAUSDT", "ADA"));
        pair.install_depth_snapshot(DepthSnapshot {
            last_update_id: 7,
            bids: vec![PriceLevel::new(1.0, 5.0)],
            asks: vec![PriceLevel::new(1.1, 5.0)],
        });
        pair.apply_ticker(TickerUpdate {
            last_price: 1.05,
            ..Default::default()
        });

        let json = serde_json::to_string(&pair.snapshot()).unwrap();
        let restored: PairSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.info.symbol, "ADAUSDT");
        assert!(restored.state.order_book.is_live());
        assert_eq!(restored.state.order_book.last_update_id(), 7);
        assert_eq!(
            restored.short_term_rating(),
            pair.snapshot().short_term_rating()
        );
    }

    #[test]
    fn test_concurrent_readers_see_whole_diffs() {
        let pair = Arc::new(Pair::new(test_info("ADAUSDT", "ADA")));
        pair.install_depth_snapshot(DepthSnapshot {
            last_update_id: 0,
            bids: vec![],
            asks: vec![],
        });

        let writer = {
            let pair = pair.clone();
            thread::spawn(move || {
                for id in 1..=500u64 {
                    // each diff moves one bid and one ask level together
                    pair.apply_depth_update(DepthUpdate {
                        first_update_id: id,
                        final_update_id: id,
                        bids: vec![PriceLevel::new(1.0, id as f64)],
                        asks: vec![PriceLevel::new(2.0, id as f64)],
                    });
                }
            })
        };

        for _ in 0..500 {
            let state = pair.snapshot().state;
            let bid = state.order_book.best_bid().map(|l| l.quantity);
            let ask = state.order_book.best_ask().map(|l| l.quantity);
            assert_eq!(bid, ask);
        }

        writer.join().unwrap();
        assert_eq!(pair.snapshot().state.order_book.last_update_id(), 500);
    }
}
