/// Average Directional Index (ADX) - Measures trend strength
///
/// ADX ranges from 0 to 100:
/// - ADX > 25: Strong trend (bull or bear)
/// - ADX 20-25: Moderate trend
/// - ADX < 20: Weak trend / choppy / ranging market
///
/// ADXR averages the current ADX with the ADX `period - 1` bars earlier and
/// lags it, so ADX crossing ADXR marks a change in trend strength.
use crate::models::Candle;

/// ADX for every bar where it is defined
///
/// Needs `2 * period` candles. The last element lines up with the last candle.
pub fn adx_series(candles: &[Candle], period: usize) -> Vec<f64> {
    if period == 0 || candles.len() < 2 * period {
        return Vec::new();
    }

    // Step 1: True Range (TR) and Directional Movement (+DM, -DM)
    let mut true_ranges = Vec::with_capacity(candles.len() - 1);
    let mut plus_dms = Vec::with_capacity(candles.len() - 1);
    let mut minus_dms = Vec::with_capacity(candles.len() - 1);

    for i in 1..candles.len() {
        let high = candles[i].high;
        let low = candles[i].low;
        let prev_close = candles[i - 1].close;
        let prev_high = candles[i - 1].high;
        let prev_low = candles[i - 1].low;

        // True Range = max(high - low, abs(high - prev_close), abs(low - prev_close))
        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        true_ranges.push(tr);

        let up_move = high - prev_high;
        let down_move = prev_low - low;

        plus_dms.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        minus_dms.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });
    }

    // Step 2: Wilder running sums, seeded with the first `period` values
    let p = period as f64;
    let mut tr_sum: f64 = true_ranges[..period].iter().sum();
    let mut plus_sum: f64 = plus_dms[..period].iter().sum();
    let mut minus_sum: f64 = minus_dms[..period].iter().sum();

    let mut dx_values = Vec::with_capacity(true_ranges.len() - period + 1);
    dx_values.push(directional_index(tr_sum, plus_sum, minus_sum));

    for i in period..true_ranges.len() {
        tr_sum = tr_sum - tr_sum / p + true_ranges[i];
        plus_sum = plus_sum - plus_sum / p + plus_dms[i];
        minus_sum = minus_sum - minus_sum / p + minus_dms[i];
        dx_values.push(directional_index(tr_sum, plus_sum, minus_sum));
    }

    if dx_values.len() < period {
        return Vec::new();
    }

    // Step 3: ADX is the Wilder average of DX
    let mut adx: f64 = dx_values[..period].iter().sum::<f64>() / p;
    let mut series = Vec::with_capacity(dx_values.len() - period + 1);
    series.push(adx);
    for dx in &dx_values[period..] {
        adx = (adx * (p - 1.0) + dx) / p;
        series.push(adx);
    }

    series
}

/// ADX and ADXR, both trimmed to the bars where ADXR is defined
///
/// Returns `(adx, adxr)` of equal length, last element on the last candle.
pub fn adx_adxr_series(candles: &[Candle], period: usize) -> (Vec<f64>, Vec<f64>) {
    let adx = adx_series(candles, period);
    let lag = period.saturating_sub(1);
    if adx.len() <= lag {
        return (Vec::new(), Vec::new());
    }

    let adxr: Vec<f64> = (lag..adx.len())
        .map(|i| (adx[i] + adx[i - lag]) / 2.0)
        .collect();
    (adx[lag..].to_vec(), adxr)
}

/// Latest ADX value
pub fn calculate_adx(candles: &[Candle], period: usize) -> Option<f64> {
    adx_series(candles, period).last().copied()
}

fn directional_index(tr_sum: f64, plus_sum: f64, minus_sum: f64) -> f64 {
    if tr_sum <= 0.0 {
        return 0.0;
    }
    let plus_di = 100.0 * plus_sum / tr_sum;
    let minus_di = 100.0 * minus_sum / tr_sum;
    let di_sum = plus_di + minus_di;
    if di_sum > 0.0 {
        100.0 * (plus_di - minus_di).abs() / di_sum
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_candles(prices: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &(open, high, low, close))| Candle {
                open_time: i as i64 * 3_600_000,
                close_time: (i as i64 + 1) * 3_600_000 - 1,
                open,
                high,
                low,
                close,
                base_volume: 1000.0,
                quote_volume: 1000.0 * close,
                trade_count: 10,
                taker_buy_base_volume: 500.0,
                taker_buy_quote_volume: 500.0 * close,
                closed: true,
            })
            .collect()
    }

    fn trend(n: usize, step: f64) -> Vec<(f64, f64, f64, f64)> {
        (0..n)
            .map(|i| {
                let base = 100.0 + step * i as f64;
                (base, base + 2.0, base - 2.0, base + step * 0.8)
            })
            .collect()
    }

    #[test]
    fn test_adx_strong_uptrend() {
        let candles = create_test_candles(&trend(40, 3.0));
        let adx = calculate_adx(&candles, 14).unwrap();
        assert!(adx > 25.0, "ADX should be high in a trend, got {:.2}", adx);
    }

    #[test]
    fn test_adx_choppy_market() {
        let prices: Vec<(f64, f64, f64, f64)> = (0..40)
            .map(|i| {
                let close = if i % 2 == 0 { 100.0 } else { 101.0 };
                (100.5, 103.0, 97.0, close)
            })
            .collect();

        let candles = create_test_candles(&prices);
        let adx = calculate_adx(&candles, 14).unwrap();
        assert!(adx < 20.0, "ADX should be low in a range, got {:.2}", adx);
    }

    #[test]
    fn test_adx_insufficient_data() {
        let candles = create_test_candles(&trend(10, 1.0));
        assert!(calculate_adx(&candles, 14).is_none());
    }

    #[test]
    fn test_adxr_alignment() {
        let candles = create_test_candles(&trend(30, 1.0));
        let (adx, adxr) = adx_adxr_series(&candles, 5);
        // adx defined from bar 2*5-1, adxr a further 4 bars later
        assert_eq!(adx.len(), 30 - 9 - 4);
        assert_eq!(adx.len(), adxr.len());
        assert_eq!(adx.last(), adx_series(&candles, 5).last());
    }
}
