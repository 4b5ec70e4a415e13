// Persistence module
// Crash-safe file ledger for open trades and the session profit

use crate::execution::Trade;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};

const TRADES_FILE: &str = "trades.json";
const PROFIT_FILE: &str = "profit.txt";
const DEFAULT_WRITE_WAIT_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed profit value: {0:?}")]
    Profit(String),
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// File-backed trade ledger
///
/// Every write goes to `<file>.tmp`, the committed file is moved to
/// `<file>.bak`, the temp file is renamed into place and the backup removed.
/// A crash at any step leaves a complete old or new file on disk.
pub struct TradeLedger {
    dir: PathBuf,
    write_lock: Mutex<()>,
    write_wait: Duration,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

impl TradeLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_write_wait(dir, Duration::from_secs(DEFAULT_WRITE_WAIT_SECS))
    }

    /// Ledger whose writers give up waiting for each other after `write_wait`
    pub fn with_write_wait(dir: impl Into<PathBuf>, write_wait: Duration) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
            write_wait,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn trades_path(&self) -> PathBuf {
        self.dir.join(TRADES_FILE)
    }

    pub fn profit_path(&self) -> PathBuf {
        self.dir.join(PROFIT_FILE)
    }

    pub async fn save_trades(&self, trades: &[Trade]) -> LedgerResult<()> {
        let json = serde_json::to_vec_pretty(trades)?;
        self.commit(&self.trades_path(), &json).await?;
        tracing::debug!("Saved {} trades to {}", trades.len(), self.trades_path().display());
        Ok(())
    }

    /// Open trades, empty when nothing was ever saved
    pub async fn load_trades(&self) -> LedgerResult<Vec<Trade>> {
        match self.read_committed(&self.trades_path()).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn save_profit(&self, profit: f64) -> LedgerResult<()> {
        self.commit(&self.profit_path(), profit.to_string().as_bytes())
            .await
    }

    /// Session realised profit, zero when nothing was ever saved
    pub async fn load_profit(&self) -> LedgerResult<f64> {
        match self.read_committed(&self.profit_path()).await? {
            Some(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                text.trim()
                    .parse::<f64>()
                    .map_err(|_| LedgerError::Profit(text.into_owned()))
            }
            None => Ok(0.0),
        }
    }

    async fn commit(&self, path: &Path, contents: &[u8]) -> LedgerResult<()> {
        // Bounded wait: a stuck writer must not stall the trade loops
        let _guard = match timeout(self.write_wait, self.write_lock.lock()).await {
            Ok(guard) => Some(guard),
            Err(_) => {
                tracing::warn!(
                    "Ledger writer busy for {:?}, writing {} anyway",
                    self.write_wait,
                    path.display()
                );
                None
            }
        };

        tokio::fs::create_dir_all(&self.dir).await?;

        let tmp = with_suffix(path, ".tmp");
        let bak = with_suffix(path, ".bak");

        tokio::fs::write(&tmp, contents).await?;
        if tokio::fs::try_exists(path).await? {
            tokio::fs::rename(path, &bak).await?;
        }
        tokio::fs::rename(&tmp, path).await?;
        if tokio::fs::try_exists(&bak).await? {
            tokio::fs::remove_file(&bak).await?;
        }

        Ok(())
    }

    /// Committed file, or its backup when a crash interrupted a write
    async fn read_committed(&self, path: &Path) -> LedgerResult<Option<Vec<u8>>> {
        if tokio::fs::try_exists(path).await? {
            return Ok(Some(tokio::fs::read(path).await?));
        }

        let bak = with_suffix(path, ".bak");
        if tokio::fs::try_exists(&bak).await? {
            tracing::warn!("Recovering {} from backup", path.display());
            return Ok(Some(tokio::fs::read(&bak).await?));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{BuyFill, OrderStatus};
    use crate::market::Pair;
    use crate::models::{Horizon, SymbolInfo};
    use chrono::Utc;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_trade(symbol: &str, price: f64, quantity: f64, horizon: Horizon) -> Trade {
        let pair = Pair::new(SymbolInfo {
            symbol: symbol.to_string(),
            base_asset: symbol.trim_end_matches("USDT").to_string(),
            quote_asset: "USDT".to_string(),
            status: "TRADING".to_string(),
            permissions: vec!["SPOT".to_string()],
            price_precision: 4,
            quantity_precision: 2,
        });
        let fill = BuyFill {
            order_id: 1,
            avg_fill_price: price,
            filled_qty: quantity,
            status: OrderStatus::Filled,
        };
        Trade::from_fill(&pair, &fill, horizon, Utc::now())
    }

    #[tokio::test]
    async fn test_missing_files_start_empty() {
        let dir = TempDir::new().unwrap();
        let ledger = TradeLedger::new(dir.path().join("Accounts/1"));

        assert!(ledger.load_trades().await.unwrap().is_empty());
        assert_eq!(ledger.load_profit().await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_trades_round_trip() {
        let dir = TempDir::new().unwrap();
        let ledger = TradeLedger::new(dir.path());
        let trades = vec![
            create_test_trade("ADAUSDT", 0.5021, 49.8, Horizon::ShortTerm),
            create_test_trade("XRPUSDT", 0.6133, 32.6, Horizon::LongTerm),
            create_test_trade("DOTUSDT", 6.41, 3.12, Horizon::LongTerm),
        ];

        ledger.save_trades(&trades).await.unwrap();
        let loaded = ledger.load_trades().await.unwrap();

        assert_eq!(loaded.len(), 3);
        for (saved, restored) in trades.iter().zip(loaded.iter()) {
            assert_eq!(restored.symbol, saved.symbol);
            assert_eq!(restored.price, saved.price);
            assert_eq!(restored.quantity, saved.quantity);
            assert_eq!(restored.horizon, saved.horizon);
            assert_eq!(restored.buy_pair.info, saved.buy_pair.info);
        }
        assert!(!with_suffix(&ledger.trades_path(), ".tmp").exists());
        assert!(!with_suffix(&ledger.trades_path(), ".bak").exists());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_previous_ledger() {
        let dir = TempDir::new().unwrap();
        let ledger = TradeLedger::new(dir.path());

        ledger
            .save_trades(&[create_test_trade("ADAUSDT", 0.5, 50.0, Horizon::ShortTerm)])
            .await
            .unwrap();
        ledger.save_trades(&[]).await.unwrap();

        assert!(ledger.load_trades().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_crash_before_rename_keeps_committed_file() {
        let dir = TempDir::new().unwrap();
        let ledger = TradeLedger::new(dir.path());
        let committed = vec![create_test_trade("ADAUSDT", 0.5, 50.0, Horizon::LongTerm)];
        ledger.save_trades(&committed).await.unwrap();

        // half-written temp file left behind by a crash
        std::fs::write(with_suffix(&ledger.trades_path(), ".tmp"), b"[{\"id\": \"trunc").unwrap();

        let loaded = ledger.load_trades().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].symbol, "ADAUSDT");
        assert_eq!(loaded[0].horizon, Horizon::LongTerm);
    }

    #[tokio::test]
    async fn test_crash_after_backup_rename_recovers_backup() {
        let dir = TempDir::new().unwrap();
        let ledger = TradeLedger::new(dir.path());
        ledger
            .save_trades(&[create_test_trade("ADAUSDT", 0.5, 50.0, Horizon::ShortTerm)])
            .await
            .unwrap();
        ledger.save_profit(3.25).await.unwrap();

        // committed files moved aside, new ones never renamed in
        std::fs::rename(ledger.trades_path(), with_suffix(&ledger.trades_path(), ".bak")).unwrap();
        std::fs::rename(ledger.profit_path(), with_suffix(&ledger.profit_path(), ".bak")).unwrap();

        assert_eq!(ledger.load_trades().await.unwrap().len(), 1);
        assert_eq!(ledger.load_profit().await.unwrap(), 3.25);
    }

    #[tokio::test]
    async fn test_profit_round_trip_and_malformed_value() {
        let dir = TempDir::new().unwrap();
        let ledger = TradeLedger::new(dir.path());

        ledger.save_profit(-1.875).await.unwrap();
        assert_eq!(ledger.load_profit().await.unwrap(), -1.875);

        std::fs::write(ledger.profit_path(), "not a number").unwrap();
        assert!(matches!(
            ledger.load_profit().await,
            Err(LedgerError::Profit(_))
        ));
    }

    #[tokio::test]
    async fn test_contended_writer_proceeds_after_wait() {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(TradeLedger::with_write_wait(
            dir.path(),
            Duration::from_millis(20),
        ));

        // a writer that never releases the lock
        let _stuck = ledger.write_lock.lock().await;

        ledger.save_profit(1.5).await.unwrap();
        assert_eq!(ledger.load_profit().await.unwrap(), 1.5);
    }
}
