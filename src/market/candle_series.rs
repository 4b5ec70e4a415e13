use crate::models::Candle;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Maximum candles kept per interval
pub const MAX_CANDLES: usize = 1024;

/// Rolling window of candles for one interval
///
/// Oldest candles are evicted once `max_candles` is exceeded. The newest
/// candle is amended in place while the exchange keeps updating it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleSeries {
    candles: VecDeque<Candle>,
    max_candles: usize,
    initialized: bool,
}

impl Default for CandleSeries {
    fn default() -> Self {
        Self::new(MAX_CANDLES)
    }
}

impl CandleSeries {
    /// Create an empty, uninitialized series
    ///
    /// # Arguments
    /// * `max_candles` - Maximum number of candles to keep
    pub fn new(max_candles: usize) -> Self {
        Self {
            candles: VecDeque::new(),
            max_candles,
            initialized: false,
        }
    }

    /// Bulk-load historical candles, replacing anything already held
    pub fn init(&mut self, historical: Vec<Candle>) {
        let skip = historical.len().saturating_sub(self.max_candles);
        self.candles = historical.into_iter().skip(skip).collect();
        self.initialized = true;
    }

    /// Apply a streamed candle
    ///
    /// Ignored until the series has been initialized. Replaces the last
    /// candle when open and close times match, otherwise appends.
    pub fn apply_live(&mut self, candle: Candle) {
        if !self.initialized {
            return;
        }

        match self.candles.back_mut() {
            Some(last)
                if last.open_time == candle.open_time && last.close_time == candle.close_time =>
            {
                *last = candle;
            }
            _ => {
                self.candles.push_back(candle);
                while self.candles.len() > self.max_candles {
                    self.candles.pop_front();
                }
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Initialized and holding at least one candle
    pub fn is_ready(&self) -> bool {
        self.initialized && !self.candles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn candles(&self) -> Vec<Candle> {
        self.candles.iter().cloned().collect()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE_MS: i64 = 60_000;

    fn create_test_candle(index: i64, close: f64) -> Candle {
        Candle {
            open_time: index * MINUTE_MS,
            close_time: (index + 1) * MINUTE_MS - 1,
            open: close,
            high: close,
            low: close,
            close,
            base_volume: 10.0,
            quote_volume: 10.0 * close,
            trade_count: 5,
            taker_buy_base_volume: 5.0,
            taker_buy_quote_volume: 5.0 * close,
            closed: true,
        }
    }

    #[test]
    fn test_live_update_ignored_before_init() {
        let mut series = CandleSeries::new(10);
        series.apply_live(create_test_candle(0, 100.0));
        assert!(series.is_empty());
        assert!(!series.is_ready());
    }

    #[test]
    fn test_init_keeps_newest_candles() {
        let mut series = CandleSeries::new(5);
        series.init((0..10).map(|i| create_test_candle(i, 100.0 + i as f64)).collect());

        assert_eq!(series.len(), 5);
        assert_eq!(series.closes(), vec![105.0, 106.0, 107.0, 108.0, 109.0]);
    }

    #[test]
    fn test_amends_open_candle_in_place() {
        let mut series = CandleSeries::new(10);
        series.init(vec![create_test_candle(0, 100.0)]);

        let mut forming = create_test_candle(1, 101.0);
        forming.closed = false;
        series.apply_live(forming.clone());

        forming.close = 102.5;
        forming.high = 103.0;
        series.apply_live(forming.clone());

        forming.closed = true;
        series.apply_live(forming);

        assert_eq!(series.len(), 2);
        let last = series.last().unwrap();
        assert_eq!(last.close, 102.5);
        assert_eq!(last.high, 103.0);
        assert!(last.closed);
    }

    #[test]
    fn test_appends_and_evicts() {
        let mut series = CandleSeries::new(3);
        series.init(vec![create_test_candle(0, 1.0), create_test_candle(1, 2.0)]);

        for i in 2..6 {
            series.apply_live(create_test_candle(i, i as f64 + 1.0));
        }

        assert_eq!(series.len(), 3);
        assert_eq!(series.closes(), vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_empty_init_accepts_live_candles() {
        let mut series = CandleSeries::new(3);
        series.init(Vec::new());
        assert!(series.is_initialized());
        assert!(!series.is_ready());

        series.apply_live(create_test_candle(0, 1.0));
        assert!(series.is_ready());
    }
}
