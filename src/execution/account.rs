use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use crate::api::{BuyFill, ExchangeClient, ExchangeResult};
use crate::config::EntrySettings;
use crate::execution::trade::{TickContext, TickOutcome, Trade, TradeState};
use crate::market::{Markets, Pair};
use crate::models::{Balance, Horizon};
use crate::persistence::{LedgerResult, TradeLedger};

/// Bounded market-buy confirmation loop
#[derive(Debug, Clone)]
pub struct EntryPolicy {
    pub max_attempts: u32,
    pub status_polls: u32,
    pub poll_interval: Duration,
}

impl Default for EntryPolicy {
    fn default() -> Self {
        Self::from(&EntrySettings::default())
    }
}

impl From<&EntrySettings> for EntryPolicy {
    fn from(settings: &EntrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            status_polls: settings.status_polls,
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
        }
    }
}

impl EntryPolicy {
    /// Market buy `quote_notional` of `symbol` and wait for the fill
    ///
    /// Each attempt places the order, then polls its status up to
    /// `status_polls` times; an unfilled order is cancelled and placed again.
    /// Returns `None` after `max_attempts` failed attempts.
    pub async fn market_buy(
        &self,
        exchange: &dyn ExchangeClient,
        symbol: &str,
        quote_notional: f64,
    ) -> Option<BuyFill> {
        for attempt in 1..=self.max_attempts {
            let fill = match exchange.place_market_buy(symbol, quote_notional).await {
                Ok(fill) => fill,
                Err(e) => {
                    tracing::warn!(
                        "Buy {} attempt {}/{} failed: {}",
                        symbol,
                        attempt,
                        self.max_attempts,
                        e
                    );
                    continue;
                }
            };

            let filled = fill.status.is_filled()
                || self.await_fill(exchange, symbol, fill.order_id).await;

            if filled && fill.filled_qty > 0.0 {
                return Some(fill);
            }

            if !filled {
                if let Err(e) = exchange.cancel_order(symbol, fill.order_id).await {
                    tracing::debug!("Cancel of unfilled order {} failed: {}", fill.order_id, e);
                }
            }
            tracing::warn!(
                "Buy {} attempt {}/{}: order {} not filled",
                symbol,
                attempt,
                self.max_attempts,
                fill.order_id
            );
        }

        None
    }

    async fn await_fill(&self, exchange: &dyn ExchangeClient, symbol: &str, order_id: u64) -> bool {
        for poll in 0..self.status_polls {
            match exchange.order_status(symbol, order_id).await {
                Ok(status) if status.is_filled() => return true,
                Ok(_) => {}
                Err(e) => tracing::debug!("Status poll for order {} failed: {}", order_id, e),
            }
            if poll + 1 < self.status_polls {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
        false
    }
}

/// Totals logged by the decision loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortfolioSummary {
    pub investment_value: f64,
    pub current_value: f64,
    pub unrealised_profit: f64,
    pub session_profit: f64,
    pub open_trades: usize,
}

/// Open trades and session profit, always changed together
#[derive(Debug, Default)]
struct TradeBook {
    trades: Vec<Trade>,
    realised_profit: f64,
}

/// Exchange account: balances, open trades and the session profit
pub struct Account {
    exchange: Arc<dyn ExchangeClient>,
    markets: Arc<Markets>,
    ledger: TradeLedger,
    entry: EntryPolicy,
    quote_asset: String,
    balances: RwLock<HashMap<String, Balance>>,
    book: Mutex<TradeBook>,
    /// Serializes trade passes; the book itself is only locked around reads
    /// and the final merge
    tick_pass: Mutex<()>,
}

impl Account {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        markets: Arc<Markets>,
        ledger: TradeLedger,
        entry: EntryPolicy,
        quote_asset: impl Into<String>,
    ) -> Self {
        Self {
            exchange,
            markets,
            ledger,
            entry,
            quote_asset: quote_asset.into(),
            balances: RwLock::new(HashMap::new()),
            book: Mutex::new(TradeBook::default()),
            tick_pass: Mutex::new(()),
        }
    }

    pub fn quote_asset(&self) -> &str {
        &self.quote_asset
    }

    pub fn markets(&self) -> &Arc<Markets> {
        &self.markets
    }

    /// Restore open trades and session profit from the ledger
    pub async fn load(&self) -> LedgerResult<usize> {
        let trades = self.ledger.load_trades().await?;
        let realised_profit = self.ledger.load_profit().await?;

        for trade in &trades {
            if self.markets.get(&trade.symbol).is_none() {
                tracing::warn!("Restored trade {} has no live market", trade.symbol);
            }
        }

        let count = trades.len();
        let mut book = self.book.lock().await;
        book.trades = trades;
        book.realised_profit = realised_profit;

        tracing::info!(
            "Restored {} open trades (session profit: ${:.3})",
            count,
            realised_profit
        );
        Ok(count)
    }

    // ---- balances ----

    pub async fn refresh_balances(&self) -> ExchangeResult<()> {
        let balances = self.exchange.account_balances().await?;
        *self.balances.write().await = balances;
        Ok(())
    }

    pub async fn free_balance(&self, asset: &str) -> f64 {
        self.balances
            .read()
            .await
            .get(asset)
            .map(|b| b.free)
            .unwrap_or(0.0)
    }

    pub async fn total_balance(&self, asset: &str) -> f64 {
        self.balances
            .read()
            .await
            .get(asset)
            .map(Balance::total)
            .unwrap_or(0.0)
    }

    // ---- trades ----

    pub async fn has_trade(&self, symbol: &str) -> bool {
        self.book
            .lock()
            .await
            .trades
            .iter()
            .any(|t| t.symbol.eq_ignore_ascii_case(symbol))
    }

    pub async fn trades(&self) -> Vec<Trade> {
        self.book.lock().await.trades.clone()
    }

    pub async fn realised_profit(&self) -> f64 {
        self.book.lock().await.realised_profit
    }

    /// Buy `quote_notional` of the pair and arm its entry bracket
    ///
    /// Returns `None` when no attempt filled. The trade is not added to the
    /// account.
    pub async fn buy(&self, pair: &Pair, quote_notional: f64, horizon: Horizon) -> Option<Trade> {
        let fill = self
            .entry
            .market_buy(self.exchange.as_ref(), pair.symbol(), quote_notional)
            .await?;

        let mut trade = Trade::from_fill(pair, &fill, horizon, Utc::now());
        tracing::info!(
            "✅ BUY {}: {} @ ${:.6} ({:?})",
            trade.symbol,
            trade.quantity,
            trade.price,
            horizon
        );

        let bracket = trade.entry_bracket();
        trade.arm_bracket(self.exchange.as_ref(), bracket).await;
        Some(trade)
    }

    /// Buy and record a new trade, persisting the ledger
    pub async fn open_trade(&self, pair: &Pair, quote_notional: f64, horizon: Horizon) -> bool {
        let Some(trade) = self.buy(pair, quote_notional, horizon).await else {
            tracing::info!("({}) order failed", pair.symbol());
            return false;
        };

        let mut book = self.book.lock().await;
        book.trades.push(trade);
        if let Err(e) = self.ledger.save_trades(&book.trades).await {
            tracing::error!("Failed to save trades: {}", e);
        }
        true
    }

    /// One pass of the trade ticker over every open trade
    ///
    /// Balances are refreshed first; the pass is skipped when that fails.
    /// Trades are evaluated on a copy of the book so entries and summaries
    /// are not held up by exchange calls. The results are merged back by
    /// trade id: closed trades are removed and their profit realised, trades
    /// opened meanwhile are kept, then the ledger is saved.
    pub async fn tick_trades(&self) {
        let _pass = self.tick_pass.lock().await;

        if let Err(e) = self.refresh_balances().await {
            tracing::warn!("Balance refresh failed, skipping trade pass: {}", e);
            return;
        }

        let balances = self.balances.read().await.clone();
        let free_quote = balances.get(&self.quote_asset).map(|b| b.free).unwrap_or(0.0);

        let mut ticked = self.book.lock().await.trades.clone();
        let mut closed = 0usize;
        let mut realised = 0.0;

        for trade in ticked.iter_mut() {
            let Some(pair) = self.markets.get(&trade.symbol) else {
                continue;
            };
            let held_base = balances
                .get(&trade.buy_pair.info.base_asset)
                .map(Balance::total)
                .unwrap_or(0.0);

            let ctx = TickContext {
                exchange: self.exchange.as_ref(),
                pair,
                entry: &self.entry,
                held_base,
                free_quote,
                now: Utc::now(),
            };

            if let TickOutcome::Closed { profit } = trade.tick(&ctx).await {
                realised += profit;
                closed += 1;
            }
        }

        let mut book = self.book.lock().await;
        for trade in ticked {
            if let Some(slot) = book.trades.iter_mut().find(|t| t.id == trade.id) {
                *slot = trade;
            }
        }

        if closed > 0 {
            book.trades.retain(|t| t.state != TradeState::Closed);
            book.realised_profit += realised;
            tracing::info!(
                "{} trade(s) closed, session profit: ${:.3}",
                closed,
                book.realised_profit
            );

            if let Err(e) = self.ledger.save_profit(book.realised_profit).await {
                tracing::error!("Failed to save session profit: {}", e);
            }
        }

        if let Err(e) = self.ledger.save_trades(&book.trades).await {
            tracing::error!("Failed to save trades: {}", e);
        }
    }

    pub async fn portfolio_summary(&self) -> PortfolioSummary {
        let book = self.book.lock().await;

        let mut investment_value = 0.0;
        let mut current_value = 0.0;
        for trade in &book.trades {
            let last = self
                .markets
                .get(&trade.symbol)
                .and_then(|p| p.last_price())
                .unwrap_or(trade.price);
            investment_value += trade.investment_value();
            current_value += trade.current_value(last);
        }

        PortfolioSummary {
            investment_value,
            current_value,
            unrealised_profit: current_value - investment_value,
            session_profit: book.realised_profit,
            open_trades: book.trades.len(),
        }
    }
}
