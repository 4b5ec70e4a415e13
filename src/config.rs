use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "spotbot.toml";

/// Runtime settings
///
/// Layered as: built-in defaults, then `spotbot.toml` (optional), then
/// `SPOTBOT__*` environment variables (`SPOTBOT__BINANCE__API_KEY`, ...).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub binance: BinanceSettings,
    /// Directory holding trades.json and profit.txt
    pub data_dir: PathBuf,
    pub quote_asset: String,
    /// Restrict trading to these symbols; empty means every eligible one
    pub symbols: Vec<String>,
    pub entry: EntrySettings,
    pub loops: LoopSettings,
    pub feed: FeedSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BinanceSettings {
    pub rest_url: String,
    pub ws_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub recv_window_ms: u64,
    pub requests_per_second: u32,
}

/// Entry thresholds and sizing for the decision loop
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EntrySettings {
    pub short_notional: f64,
    pub long_notional: f64,
    pub short_min_accuracy: f64,
    pub short_min_investment: f64,
    pub long_min_accuracy: f64,
    pub long_min_investment: f64,
    /// Pairs whose short investment score is below this are skipped
    pub short_gate_investment: f64,
    /// Pairs whose long investment score is below this are skipped
    pub long_gate_investment: f64,
    pub max_attempts: u32,
    pub status_polls: u32,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoopSettings {
    pub ticker_period_ms: u64,
    pub decision_period_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub streams_per_socket: usize,
    pub kline_history: u32,
    pub depth_limit: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            binance: BinanceSettings::default(),
            data_dir: PathBuf::from("Accounts/1"),
            quote_asset: "USDT".to_string(),
            symbols: Vec::new(),
            entry: EntrySettings::default(),
            loops: LoopSettings::default(),
            feed: FeedSettings::default(),
        }
    }
}

impl Default for BinanceSettings {
    fn default() -> Self {
        Self {
            rest_url: "https://api.binance.com".to_string(),
            ws_url: "wss://stream.binance.com:9443".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            recv_window_ms: 5000,
            requests_per_second: 10,
        }
    }
}

impl Default for EntrySettings {
    fn default() -> Self {
        Self {
            short_notional: 25.0,
            long_notional: 20.0,
            short_min_accuracy: 0.7,
            short_min_investment: 0.75,
            long_min_accuracy: 0.8,
            long_min_investment: 0.75,
            short_gate_investment: 0.55,
            long_gate_investment: 0.6,
            max_attempts: 10,
            status_polls: 10,
            poll_interval_ms: 1000,
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            ticker_period_ms: 660,
            decision_period_ms: 5000,
        }
    }
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            streams_per_socket: 32,
            kline_history: 1000,
            depth_limit: 1000,
        }
    }
}

impl Settings {
    /// Load settings from an optional file plus environment overrides
    ///
    /// # Arguments
    /// * `path` - Config file; when `None`, `spotbot.toml` is used if present
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("SPOTBOT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("symbols"),
            )
            .build()
            .context("Failed to build configuration")?;

        settings
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    pub fn has_credentials(&self) -> bool {
        !self.binance.api_key.is_empty() && !self.binance.api_secret.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.quote_asset, "USDT");
        assert_eq!(settings.data_dir, PathBuf::from("Accounts/1"));
        assert_eq!(settings.entry.short_notional, 25.0);
        assert_eq!(settings.entry.max_attempts, 10);
        assert_eq!(settings.loops.ticker_period_ms, 660);
        assert_eq!(settings.feed.streams_per_socket, 32);
        assert!(!settings.has_credentials());
    }

    #[test]
    fn test_file_overrides_keep_other_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
quote_asset = "BTC"
symbols = ["ETHBTC"]

[entry]
short_notional = 50.0

[binance]
api_key = "key"
api_secret = "secret"
"#
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.quote_asset, "BTC");
        assert_eq!(settings.symbols, vec!["ETHBTC"]);
        assert_eq!(settings.entry.short_notional, 50.0);
        assert_eq!(settings.entry.long_notional, 20.0);
        assert_eq!(settings.binance.rest_url, "https://api.binance.com");
        assert!(settings.has_credentials());
    }
}
