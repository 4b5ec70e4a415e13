/// Calculate Simple Moving Average (SMA) of the last `period` values
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Rolling mean over every full window
///
/// Element `i` of the result covers `values[i..i + period]`, so the output
/// has `len - period + 1` values and ends on the last input.
pub fn sma_series(values: &[f64], period: usize) -> Vec<f64> {
    values
        .windows(period.max(1))
        .map(|w| w.iter().sum::<f64>() / w.len() as f64)
        .collect()
}

/// Rolling minimum over every full window (same alignment as `sma_series`)
pub fn rolling_min(values: &[f64], period: usize) -> Vec<f64> {
    values
        .windows(period.max(1))
        .map(|w| w.iter().copied().fold(f64::INFINITY, f64::min))
        .collect()
}

/// Rolling maximum over every full window
pub fn rolling_max(values: &[f64], period: usize) -> Vec<f64> {
    values
        .windows(period.max(1))
        .map(|w| w.iter().copied().fold(f64::NEG_INFINITY, f64::max))
        .collect()
}
