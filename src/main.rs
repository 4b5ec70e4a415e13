use anyhow::{bail, Context, Result};
use clap::Parser;
use spotbot::api::{BinanceClient, ExchangeClient, MarketDataClient};
use spotbot::config::Settings;
use spotbot::execution::{Account, EntryPolicy, Executor};
use spotbot::feed;
use spotbot::market::Markets;
use spotbot::persistence::TradeLedger;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(name = "spotbot", about = "Spot trading bot")]
struct Cli {
    /// Settings file (defaults to ./spotbot.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the trade ledger
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        settings.data_dir = dir;
    }

    tracing::info!("🚀 SpotBot starting");
    if !settings.has_credentials() {
        bail!("SPOTBOT__BINANCE__API_KEY and SPOTBOT__BINANCE__API_SECRET must be set");
    }

    let client = Arc::new(
        BinanceClient::new(&settings.binance).context("Failed to create Binance client")?,
    );

    // ========================================================================
    // Instruments
    // ========================================================================

    let markets = Arc::new(load_markets(client.as_ref(), &settings).await?);
    if markets.is_empty() {
        bail!("No tradeable {} instruments found", settings.quote_asset);
    }
    tracing::info!("✅ Tracking {} instruments", markets.len());
    tracing::debug!("Instruments: {}", markets.symbols().join(", "));

    // ========================================================================
    // Account and ledger
    // ========================================================================

    let exchange: Arc<dyn ExchangeClient> = client.clone();
    let market_data: Arc<dyn MarketDataClient> = client.clone();

    let account = Arc::new(Account::new(
        exchange,
        markets.clone(),
        TradeLedger::new(&settings.data_dir),
        EntryPolicy::from(&settings.entry),
        settings.quote_asset.clone(),
    ));
    account
        .load()
        .await
        .with_context(|| format!("Failed to load ledger from {}", settings.data_dir.display()))?;

    // ========================================================================
    // Market data
    // ========================================================================

    let feed_tasks = feed::spawn_feed(
        &settings.binance.ws_url,
        &settings.feed,
        market_data.clone(),
        markets.clone(),
    );

    tracing::info!("📈 Loading kline history...");
    let ready = feed::bootstrap_klines(market_data.as_ref(), &markets, settings.feed.kline_history).await;
    tracing::info!("✅ Klines ready for {}/{} instruments", ready, markets.len());

    // ========================================================================
    // Worker loops
    // ========================================================================

    let ticker_task = {
        let account = account.clone();
        let period = Duration::from_millis(settings.loops.ticker_period_ms);
        tokio::spawn(async move {
            trade_ticker_loop(account, period).await;
        })
    };

    let decision_task = {
        let executor = Executor::new(account.clone(), settings.entry.clone());
        let period = Duration::from_millis(settings.loops.decision_period_ms);
        tokio::spawn(async move {
            decision_loop(executor, period).await;
        })
    };

    tracing::info!("✅ All loops spawned successfully");
    tracing::info!("  🛡️ Trade ticker: every {}ms", settings.loops.ticker_period_ms);
    tracing::info!("  🎯 Decisions: every {}ms", settings.loops.decision_period_ms);
    tracing::info!("\nPress Ctrl+C to stop...\n");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
        }
        result = ticker_task => {
            tracing::error!("Trade ticker loop exited: {:?}", result);
        }
        result = decision_task => {
            tracing::error!("Decision loop exited: {:?}", result);
        }
    }

    for task in feed_tasks {
        task.abort();
    }

    let summary = account.portfolio_summary().await;
    tracing::info!(
        "👋 SpotBot stopped ({} open trades, session profit ${:.3})",
        summary.open_trades,
        summary.session_profit
    );
    Ok(())
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("spotbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Eligible spot instruments, narrowed to the configured whitelist if any
async fn load_markets(client: &BinanceClient, settings: &Settings) -> Result<Markets> {
    let infos = client
        .exchange_info()
        .await
        .context("Failed to fetch exchange info")?;

    let whitelist: Vec<String> = settings.symbols.iter().map(|s| s.to_uppercase()).collect();
    let eligible = infos.into_iter().filter(|info| {
        info.is_tradeable(&settings.quote_asset)
            && (whitelist.is_empty() || whitelist.contains(&info.symbol))
    });

    Ok(Markets::new(eligible))
}

// ============================================================================
// Loops
// ============================================================================

async fn trade_ticker_loop(account: Arc<Account>, period: Duration) {
    tracing::info!("🛡️ Trade ticker loop starting...");
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        account.tick_trades().await;
    }
}

async fn decision_loop(executor: Executor, period: Duration) {
    tracing::info!("🎯 Decision loop starting...");
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let opened = executor.scan_once().await;
        if opened > 0 {
            tracing::info!("💰 Opened {} trade(s) this pass", opened);
        }
    }
}
