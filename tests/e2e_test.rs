use async_trait::async_trait;
use chrono::{Duration, Utc};
use spotbot::api::{BuyFill, ExchangeClient, ExchangeResult, OrderAck, OrderStatus};
use spotbot::config::EntrySettings;
use spotbot::execution::{Account, EntryPolicy, Executor, Trade, TradeState};
use spotbot::market::{DepthSnapshot, Markets, PriceLevel};
use spotbot::models::{Balance, Candle, Horizon, Interval, SymbolInfo, TickerUpdate};
use spotbot::persistence::TradeLedger;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// In-memory exchange recording every order call
struct MockExchange {
    calls: Mutex<Vec<String>>,
    balances: Mutex<HashMap<String, Balance>>,
    fill: BuyFill,
}

impl MockExchange {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            balances: Mutex::new(HashMap::new()),
            fill: BuyFill {
                order_id: 1,
                avg_fill_price: 2.0,
                filled_qty: 12.5,
                status: OrderStatus::Filled,
            },
        }
    }

    fn set_balance(&self, asset: &str, free: f64, locked: f64) {
        self.balances
            .lock()
            .unwrap()
            .insert(asset.to_string(), Balance { free, locked });
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    async fn place_market_buy(&self, symbol: &str, quote: f64) -> ExchangeResult<BuyFill> {
        self.record(format!("buy {} {}", symbol, quote));
        Ok(self.fill.clone())
    }

    async fn order_status(&self, _symbol: &str, _order_id: u64) -> ExchangeResult<OrderStatus> {
        Ok(OrderStatus::Filled)
    }

    async fn cancel_order(&self, symbol: &str, order_id: u64) -> ExchangeResult<()> {
        self.record(format!("cancel {} {}", symbol, order_id));
        Ok(())
    }

    async fn place_market_sell(&self, symbol: &str, qty: f64) -> ExchangeResult<OrderAck> {
        self.record(format!("sell {} {}", symbol, qty));
        Ok(OrderAck { order_id: 30 })
    }

    async fn place_oco_sell(
        &self,
        symbol: &str,
        qty: f64,
        take_profit: f64,
        stop: f64,
        stop_limit: f64,
    ) -> ExchangeResult<OrderAck> {
        self.record(format!("oco {} {} {} {} {}", symbol, qty, take_profit, stop, stop_limit));
        Ok(OrderAck { order_id: 10 })
    }

    async fn place_stop_limit_sell(
        &self,
        symbol: &str,
        qty: f64,
        stop: f64,
        limit: f64,
    ) -> ExchangeResult<OrderAck> {
        self.record(format!("stop {} {} {} {}", symbol, qty, stop, limit));
        Ok(OrderAck { order_id: 20 })
    }

    async fn account_balances(&self) -> ExchangeResult<HashMap<String, Balance>> {
        Ok(self.balances.lock().unwrap().clone())
    }
}

fn ada_info() -> SymbolInfo {
    SymbolInfo {
        symbol: "ADAUSDT".to_string(),
        base_asset: "ADA".to_string(),
        quote_asset: "USDT".to_string(),
        status: "TRADING".to_string(),
        permissions: vec!["SPOT".to_string()],
        price_precision: 4,
        quantity_precision: 1,
    }
}

struct Harness {
    _dir: TempDir,
    exchange: Arc<MockExchange>,
    markets: Arc<Markets>,
    account: Arc<Account>,
    ledger: TradeLedger,
}

fn setup() -> Harness {
    let dir = TempDir::new().unwrap();
    let exchange = Arc::new(MockExchange::new());
    let markets = Arc::new(Markets::new(vec![ada_info()]));
    let policy = EntryPolicy {
        poll_interval: std::time::Duration::from_millis(1),
        ..EntryPolicy::default()
    };
    let account = Arc::new(Account::new(
        exchange.clone(),
        markets.clone(),
        TradeLedger::new(dir.path()),
        policy,
        "USDT",
    ));
    let ledger = TradeLedger::new(dir.path());

    Harness {
        _dir: dir,
        exchange,
        markets,
        account,
        ledger,
    }
}

fn set_last_price(markets: &Markets, price: f64) {
    markets.get("ADAUSDT").unwrap().apply_ticker(TickerUpdate {
        last_price: price,
        ..TickerUpdate::default()
    });
}

/// Persist a protected trade opened a few seconds ago and load it back
async fn seed_trade(h: &Harness, horizon: Horizon) {
    let pair = h.markets.get("ADAUSDT").unwrap();
    let mut trade = Trade::from_fill(
        pair,
        &BuyFill {
            order_id: 1,
            avg_fill_price: 2.0,
            filled_qty: 12.5,
            status: OrderStatus::Filled,
        },
        horizon,
        Utc::now() - Duration::seconds(5),
    );
    trade.state = TradeState::Protected;
    trade.current_order_id = Some(10);

    h.ledger.save_trades(&[trade]).await.unwrap();
    assert_eq!(h.account.load().await.unwrap(), 1);
}

/// Same close path on every interval: a dip into an inverse head and
/// shoulders with oversold StochRSI crosses turning up. Only asks sit near the
/// price. Both horizons rate as a buy, the short one clearly.
fn seed_buy_setup(markets: &Markets) {
    let pair = markets.get("ADAUSDT").unwrap();
    let closes: Vec<f64> = (0..69).map(|i| 100.0 - 2.0 * (i as f64 / 2.0).sin()).collect();

    for interval in Interval::ALL {
        let step = match interval {
            Interval::OneMinute => 60_000,
            Interval::FifteenMinutes => 900_000,
            Interval::OneHour => 3_600_000,
        };
        let candles = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                open_time: i as i64 * step,
                close_time: (i as i64 + 1) * step - 1,
                open: close - 0.2,
                high: close + 0.5,
                low: close - 0.5,
                close,
                base_volume: 10.0,
                quote_volume: 10.0 * close,
                trade_count: 3,
                taker_buy_base_volume: 5.0,
                taker_buy_quote_volume: 5.0 * close,
                closed: true,
            })
            .collect();
        pair.init_klines(interval, candles);
    }

    let last = closes[closes.len() - 1];
    set_last_price(markets, last);
    pair.install_depth_snapshot(DepthSnapshot {
        last_update_id: 1,
        bids: vec![],
        asks: vec![PriceLevel::new(last + 0.5, 50.0)],
    });
}

#[tokio::test]
async fn test_entry_arms_bracket_and_persists() {
    let h = setup();
    h.exchange.set_balance("USDT", 30.0, 0.0);

    let pair = h.markets.get("ADAUSDT").unwrap();
    assert!(h.account.open_trade(pair, 25.0, Horizon::ShortTerm).await);

    assert_eq!(
        h.exchange.calls(),
        vec!["buy ADAUSDT 25", "oco ADAUSDT 12.5 2.2 1.8 1.7999"]
    );

    let saved = h.ledger.load_trades().await.unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].symbol, "ADAUSDT");
    assert_eq!(saved[0].state, TradeState::Protected);
    assert_eq!(saved[0].current_order_id, Some(10));
    assert_eq!(saved[0].initial_notional, 25.0);
    assert!(h.account.has_trade("adausdt").await);
}

#[tokio::test]
async fn test_external_exit_closes_trade_and_books_profit() {
    let h = setup();
    seed_trade(&h, Horizon::LongTerm).await;
    set_last_price(&h.markets, 2.5);

    // bracket filled on the exchange: no ADA left
    h.exchange.set_balance("USDT", 56.25, 0.0);
    h.account.tick_trades().await;

    assert!(h.account.trades().await.is_empty());
    assert_eq!(h.account.realised_profit().await, 6.25);
    assert!(h.ledger.load_trades().await.unwrap().is_empty());
    assert_eq!(h.ledger.load_profit().await.unwrap(), 6.25);
    assert!(h.exchange.calls().is_empty());
}

#[tokio::test]
async fn test_rising_price_moves_trailing_stop() {
    let h = setup();
    seed_trade(&h, Horizon::ShortTerm).await;
    set_last_price(&h.markets, 2.1);
    h.exchange.set_balance("ADA", 0.0, 12.5);

    h.account.tick_trades().await;

    assert_eq!(
        h.exchange.calls(),
        vec!["cancel ADAUSDT 10", "stop ADAUSDT 12.5 2.0685 2.0684"]
    );
    let trades = h.ledger.load_trades().await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].last_trailing_stop_price, 2.0685);
    assert_eq!(trades[0].current_order_id, Some(20));

    let summary = h.account.portfolio_summary().await;
    assert_eq!(summary.open_trades, 1);
    assert_eq!(summary.investment_value, 25.0);
}

#[tokio::test]
async fn test_long_term_trade_uses_its_own_ratchet() {
    let h = setup();
    seed_trade(&h, Horizon::LongTerm).await;
    h.exchange.set_balance("ADA", 0.0, 12.5);

    // +5% would move a short-term stop, not a long-term one
    set_last_price(&h.markets, 2.1);
    h.account.tick_trades().await;
    assert!(h.exchange.calls().is_empty());

    // past +12%: stop at 97.5% of the price
    tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;
    set_last_price(&h.markets, 2.3);
    h.account.tick_trades().await;

    assert_eq!(
        h.exchange.calls(),
        vec!["cancel ADAUSDT 10", "stop ADAUSDT 12.5 2.2425 2.2424"]
    );
    let trades = h.ledger.load_trades().await.unwrap();
    assert_eq!(trades[0].horizon, Horizon::LongTerm);
    assert_eq!(trades[0].last_trailing_stop_price, 2.2425);
}

#[tokio::test]
async fn test_restart_keeps_open_trades() {
    let h = setup();
    seed_trade(&h, Horizon::ShortTerm).await;
    set_last_price(&h.markets, 2.0);
    h.exchange.set_balance("ADA", 0.0, 12.5);

    h.account.tick_trades().await;

    let restarted = Account::new(
        h.exchange.clone(),
        h.markets.clone(),
        TradeLedger::new(h.ledger.dir()),
        EntryPolicy::default(),
        "USDT",
    );
    assert_eq!(restarted.load().await.unwrap(), 1);
    assert!(restarted.has_trade("ADAUSDT").await);
}

#[tokio::test]
async fn test_decision_pass_skips_pairs_without_history() {
    let h = setup();
    h.exchange.set_balance("USDT", 100.0, 0.0);
    set_last_price(&h.markets, 2.0);

    let executor = Executor::new(h.account.clone(), EntrySettings::default());
    assert_eq!(executor.scan_once().await, 0);
    assert!(h.exchange.calls().is_empty());
}

#[tokio::test]
async fn test_decision_pass_opens_short_term_trade() {
    let h = setup();
    h.exchange.set_balance("USDT", 100.0, 0.0);
    seed_buy_setup(&h.markets);

    let pair = h.markets.get("ADAUSDT").unwrap();
    let short = pair.short_term_rating();
    assert!(short.accuracy > 0.7 && short.investment > 0.75);

    let executor = Executor::new(h.account.clone(), EntrySettings::default());
    assert_eq!(executor.scan_once().await, 1);

    // $25 market buy, then the 1.10 / 0.90 bracket around the 2.0 fill
    assert_eq!(
        h.exchange.calls(),
        vec!["buy ADAUSDT 25", "oco ADAUSDT 12.5 2.2 1.8 1.7999"]
    );
    let trades = h.account.trades().await;
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].horizon, Horizon::ShortTerm);
    assert_eq!(trades[0].state, TradeState::Protected);

    // one trade per instrument
    assert_eq!(executor.scan_once().await, 0);
    assert_eq!(h.exchange.calls().len(), 2);
}
