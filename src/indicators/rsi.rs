/// Calculate Relative Strength Index (RSI)
///
/// RSI measures the magnitude of recent price changes to evaluate
/// overbought or oversold conditions.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
/// Uses Wilder smoothing and returns the most recent value.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Option<f64> {
    rsi_series(prices, period).last().copied()
}

/// RSI for every bar from `period` onwards
///
/// The first value averages the first `period` changes, later values use
/// Wilder smoothing. The last element lines up with the last price.
pub fn rsi_series(prices: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || prices.len() < period + 1 {
        return Vec::new();
    }

    let mut gains = Vec::with_capacity(prices.len() - 1);
    let mut losses = Vec::with_capacity(prices.len() - 1);

    // Calculate price changes
    for i in 1..prices.len() {
        let change = prices[i] - prices[i - 1];
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(change.abs());
        }
    }

    let p = period as f64;
    let mut avg_gain: f64 = gains[..period].iter().sum::<f64>() / p;
    let mut avg_loss: f64 = losses[..period].iter().sum::<f64>() / p;

    let mut series = Vec::with_capacity(gains.len() - period + 1);
    series.push(rsi_value(avg_gain, avg_loss));

    for i in period..gains.len() {
        avg_gain = (avg_gain * (p - 1.0) + gains[i]) / p;
        avg_loss = (avg_loss * (p - 1.0) + losses[i]) / p;
        series.push(rsi_value(avg_gain, avg_loss));
    }

    series
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }

    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}
