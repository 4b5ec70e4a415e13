// Technical indicators module
// Implements RSI, StochRSI, ADX/ADXR and rolling windows for the rating engine

pub mod adx;
pub mod moving_average;
pub mod rsi;
pub mod stoch_rsi;

pub use adx::{adx_adxr_series, adx_series, calculate_adx};
pub use moving_average::{calculate_sma, rolling_max, rolling_min, sma_series};
pub use rsi::{calculate_rsi, rsi_series};
pub use stoch_rsi::stoch_rsi;
