// Market state module
// Per-instrument order books, candle series and the symbol registry

pub mod candle_series;
pub mod order_book;
pub mod pair;

pub use candle_series::{CandleSeries, MAX_CANDLES};
pub use order_book::{BookPhase, DepthSnapshot, DepthUpdate, OrderBook, PriceLevel, SyncOutcome};
pub use pair::{Pair, PairSnapshot, PairState};

use crate::models::SymbolInfo;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Instruments tracked for the whole run, keyed by upper-case symbol
///
/// Built once at startup and never mutated afterwards; each `Pair` guards
/// its own state.
#[derive(Debug, Default)]
pub struct Markets {
    pairs: BTreeMap<String, Arc<Pair>>,
}

impl Markets {
    pub fn new(infos: impl IntoIterator<Item = SymbolInfo>) -> Self {
        let pairs = infos
            .into_iter()
            .map(|info| (info.symbol.to_uppercase(), Arc::new(Pair::new(info))))
            .collect();
        Self { pairs }
    }

    pub fn get(&self, symbol: &str) -> Option<&Arc<Pair>> {
        self.pairs.get(&symbol.to_uppercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Pair>> {
        self.pairs.values()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.pairs.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(symbol: &str) -> SymbolInfo {
        SymbolInfo {
            symbol: symbol.to_string(),
            base_asset: symbol.trim_end_matches("USDT").to_string(),
            quote_asset: "USDT".to_string(),
            status: "TRADING".to_string(),
            permissions: vec!["SPOT".to_string()],
            price_precision: 4,
            quantity_precision: 2,
        }
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let markets = Markets::new(vec![info("ADAUSDT"), info("XRPUSDT")]);
        assert_eq!(markets.len(), 2);
        assert!(markets.get("adausdt").is_some());
        assert_eq!(markets.get("XRPUSDT").map(|p| p.base_asset()), Some("XRP"));
        assert!(markets.get("BTCUSDT").is_none());
        assert_eq!(markets.symbols(), vec!["ADAUSDT", "XRPUSDT"]);
    }
}
