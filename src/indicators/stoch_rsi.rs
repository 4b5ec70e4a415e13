use super::moving_average::{rolling_max, rolling_min, sma_series};

/// Stochastic oscillator applied to an RSI series
///
/// `%K = sma(smooth_k, (rsi - min(period)) / (max(period) - min(period))) * 100`
/// and `%D = sma(smooth_d, %K)`. Both returned series end on the last RSI
/// value and have equal length. A window where RSI is flat yields NaN, which
/// never satisfies a crossing comparison.
pub fn stoch_rsi(
    rsi: &[f64],
    smooth_k: usize,
    smooth_d: usize,
    period: usize,
) -> (Vec<f64>, Vec<f64>) {
    let lows = rolling_min(rsi, period);
    let highs = rolling_max(rsi, period);
    let offset = rsi.len().saturating_sub(lows.len());

    let raw: Vec<f64> = lows
        .iter()
        .zip(highs.iter())
        .enumerate()
        .map(|(i, (low, high))| (rsi[i + offset] - low) / (high - low))
        .collect();

    let k: Vec<f64> = sma_series(&raw, smooth_k)
        .into_iter()
        .map(|v| v * 100.0)
        .collect();
    let d = sma_series(&k, smooth_d);

    let k_tail = k[k.len() - d.len()..].to_vec();
    (k_tail, d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stoch_rsi_lengths() {
        let rsi: Vec<f64> = (0..40).map(|i| 50.0 + ((i * 7) % 11) as f64).collect();
        let (k, d) = stoch_rsi(&rsi, 3, 3, 14);
        // 40 - 13 raw, -2 for %K, -2 for %D
        assert_eq!(d.len(), 40 - 13 - 2 - 2);
        assert_eq!(k.len(), d.len());
        assert!(k.iter().all(|v| (0.0..=100.0).contains(v)));
    }

    #[test]
    fn test_stoch_rsi_at_extremes() {
        let rsi: Vec<f64> = (0..30).map(|i| 20.0 + i as f64).collect();
        let (k, d) = stoch_rsi(&rsi, 3, 3, 14);
        // rising RSI sits at the top of its range
        assert!((k.last().unwrap() - 100.0).abs() < 1e-9);
        assert!((d.last().unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_stoch_rsi_short_input() {
        let (k, d) = stoch_rsi(&[50.0, 51.0], 3, 3, 14);
        assert!(k.is_empty());
        assert!(d.is_empty());
    }
}
