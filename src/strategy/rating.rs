use crate::indicators::{adx_adxr_series, rsi_series, stoch_rsi};
use crate::market::PairState;
use crate::models::{round_to, Horizon};
use crate::strategy::patterns::{detect_pattern, PatternKind};
use serde::{Deserialize, Serialize};

/// Composite score of one instrument for one horizon
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Rating {
    /// Mean of the accuracy weights, 2 decimals
    pub accuracy: f64,
    /// Mean of the investment contributions, 2 decimals
    pub investment: f64,
    pub pattern: PatternKind,
    pub distance: usize,
    /// Ask share of the order-book notional in the horizon band, 0 when empty
    pub order_book_ratio: f64,
}

// Short horizon (1m + 15m)
const SHORT_BOOK_BAND: f64 = 0.02;
const SHORT_RSI_1M: usize = 10;
const SHORT_RSI_15M: usize = 6;
const SHORT_ADX_PERIOD: usize = 5;
const SHORT_ADX_LOOKBACK_1M: usize = 6;
const SHORT_ADX_LOOKBACK_15M: usize = 3;

// Long horizon (1h)
const LONG_BOOK_BAND: f64 = 0.5;
const LONG_RSI: usize = 14;
const LONG_ADX_PERIOD: usize = 10;
const LONG_ADX_LOOKBACK: usize = 3;

// StochRSI(smooth K, smooth D, period)
const STOCH_SMOOTH_K: usize = 3;
const STOCH_SMOOTH_D: usize = 3;
const STOCH_PERIOD: usize = 14;
const STOCH_LOOKBACK: usize = 3;

const SELL_RSI: usize = 14;

#[derive(Default)]
struct Scorecard {
    accuracy: Vec<f64>,
    investment: Vec<f64>,
}

impl Scorecard {
    fn add(&mut self, accuracy: f64, investment: f64) {
        self.accuracy.push(accuracy);
        self.investment.push(investment);
    }

    fn finish(self, pattern: PatternKind, distance: usize, order_book_ratio: f64) -> Rating {
        Rating {
            accuracy: round_to(mean(&self.accuracy), 2),
            investment: round_to(mean(&self.investment), 2),
            pattern,
            distance,
            order_book_ratio,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Short-term rating from 1m and 15m candles and the ±2% book
pub fn short_term_rating(state: &PairState) -> Rating {
    let mut card = Scorecard::default();

    let candles_1m = state.klines_1m.candles();
    let candles_15m = state.klines_15m.candles();
    let closes_1m = state.klines_1m.closes();
    let closes_15m = state.klines_15m.closes();

    let pattern_1m = detect_pattern(&closes_1m);
    let pattern_15m = detect_pattern(&closes_15m);
    card.investment.push(pattern_1m.kind.investment_signal());
    card.investment.push(pattern_15m.kind.investment_signal());
    if pattern_15m.distance <= 16 && pattern_1m.distance <= 20 {
        card.accuracy.push(freshness(pattern_1m.distance, 10, 20));
        card.accuracy.push(freshness(pattern_15m.distance, 8, 12));
    } else {
        card.accuracy.push(0.0);
        card.accuracy.push(0.0);
    }

    let mut order_book_ratio = 0.0;
    if let Some(ratio) = book_ratio(state, SHORT_BOOK_BAND) {
        card.add(1.0, ratio);
        order_book_ratio = ratio;
    }

    let rsi_1m = rsi_series(&closes_1m, SHORT_RSI_1M);
    let rsi_15m = rsi_series(&closes_15m, SHORT_RSI_15M);
    for rsi in [&rsi_1m, &rsi_15m] {
        if let Some(last) = rsi.last() {
            card.add(1.0, 1.0 - last / 100.0);
        }
    }

    card.add(1.0, stoch_rsi_signal(&rsi_1m));
    card.add(1.0, stoch_rsi_signal(&rsi_15m));

    let (adx, adxr) = adx_adxr_series(&candles_1m, SHORT_ADX_PERIOD);
    card.add(1.0, adx_adxr_analysis(&adx, &adxr, SHORT_ADX_LOOKBACK_1M));
    let (adx, adxr) = adx_adxr_series(&candles_15m, SHORT_ADX_PERIOD);
    card.add(1.0, adx_adxr_analysis(&adx, &adxr, SHORT_ADX_LOOKBACK_15M));

    card.finish(pattern_1m.kind, pattern_1m.distance, order_book_ratio)
}

/// Long-term rating from 1h candles and the ±50% book
pub fn long_term_rating(state: &PairState) -> Rating {
    let mut card = Scorecard::default();

    let candles_1h = state.klines_1h.candles();
    let closes_1h = state.klines_1h.closes();

    let pattern = detect_pattern(&closes_1h);
    let accuracy = if pattern.distance <= 24 {
        freshness(pattern.distance, 5, 24)
    } else {
        0.0
    };
    card.add(accuracy, pattern.kind.investment_signal());

    let rsi = rsi_series(&closes_1h, LONG_RSI);
    if let Some(last) = rsi.last() {
        card.add(1.0, 1.0 - last / 100.0);
    }
    card.add(1.0, stoch_rsi_signal(&rsi));

    let (adx, adxr) = adx_adxr_series(&candles_1h, LONG_ADX_PERIOD);
    card.add(1.0, adx_adxr_analysis(&adx, &adxr, LONG_ADX_LOOKBACK));

    let mut order_book_ratio = 0.0;
    if let Some(ratio) = book_ratio(state, LONG_BOOK_BAND) {
        card.add(1.0, ratio);
        order_book_ratio = ratio;
    }

    card.finish(pattern.kind, pattern.distance, order_book_ratio)
}

/// Exit signal: bearish StochRSI cross on the horizon's candles while asks
/// are thinner than bids near the price
pub fn sell_signal(state: &PairState, horizon: Horizon) -> bool {
    let (closes, band) = match horizon {
        Horizon::LongTerm => (state.klines_1h.closes(), 0.1),
        Horizon::ShortTerm => (state.klines_15m.closes(), 0.05),
    };

    let rsi = rsi_series(&closes, SELL_RSI);
    let stoch = stoch_rsi_signal(&rsi);
    let ratio = book_ratio(state, band).unwrap_or(0.0);

    stoch == 0.0 && ratio < 0.5
}

/// Ask notional over total notional within `band` of the last price
///
/// None when there is no last price, the book is not live or the band is empty.
pub fn book_ratio(state: &PairState, band: f64) -> Option<f64> {
    let last_price = state.last_price?;
    let ask = state.order_book.ask_notional_within(last_price, band);
    let bid = state.order_book.bid_notional_within(last_price, band);
    let total = ask + bid;
    if total > 0.0 {
        Some(ask / total)
    } else {
        None
    }
}

/// Weight that is 1 up to `fresh` bars and decays linearly over `span` bars
fn freshness(distance: usize, fresh: usize, span: usize) -> f64 {
    let late = distance.saturating_sub(fresh) as f64;
    (span as f64 - late) / span as f64
}

fn stoch_rsi_signal(rsi: &[f64]) -> f64 {
    let (k, d) = stoch_rsi(rsi, STOCH_SMOOTH_K, STOCH_SMOOTH_D, STOCH_PERIOD);
    stoch_rsi_analysis(&k, &d, STOCH_LOOKBACK)
}

/// 1 on a %K cross above %D below 20, 0 on a cross below above 80, else 0.5
pub fn stoch_rsi_analysis(k: &[f64], d: &[f64], lookback: usize) -> f64 {
    if lookback == 0 || k.len() < lookback || d.len() < lookback {
        return 0.5;
    }
    let k = &k[k.len() - lookback..];
    let d = &d[d.len() - lookback..];
    let (k_first, k_last) = (k[0], k[lookback - 1]);
    let (d_first, d_last) = (d[0], d[lookback - 1]);

    if k_last < 20.0 && k_first < d_first && k_last > d_last {
        1.0
    } else if k_last > 80.0 && k_first > d_first && k_last < d_last {
        0.0
    } else {
        0.5
    }
}

/// 1 when ADX crosses above ADXR in a strong trend, 0 on the downward cross
pub fn adx_adxr_analysis(adx: &[f64], adxr: &[f64], lookback: usize) -> f64 {
    if lookback == 0 || adx.len() < lookback || adxr.len() < lookback {
        return 0.5;
    }
    let adx = &adx[adx.len() - lookback..];
    let adxr = &adxr[adxr.len() - lookback..];
    let (adx_first, adx_last) = (adx[0], adx[lookback - 1]);
    let (adxr_first, adxr_last) = (adxr[0], adxr[lookback - 1]);

    if adxr_last > 25.0 && adx_first < adxr_first && adx_last > adxr_last {
        1.0
    } else if adxr_last > 25.0 && adx_first > adxr_first && adx_last < adxr_last {
        0.0
    } else {
        0.5
    }
}
