use anyhow::{Context, Result};
use clap::Parser;
use spotbot::api::{BinanceClient, MarketDataClient};
use spotbot::config::Settings;
use spotbot::indicators::{calculate_adx, calculate_rsi, calculate_sma};
use spotbot::market::Pair;
use spotbot::models::{Interval, TickerUpdate};
use spotbot::strategy::Rating;
use std::path::PathBuf;

/// Print the short- and long-term rating of one symbol
#[derive(Parser, Debug)]
#[command(name = "rate_pair")]
struct Cli {
    /// Symbol to rate, e.g. ADAUSDT
    symbol: String,

    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("spotbot=warn")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let client = BinanceClient::new(&settings.binance).context("Failed to create Binance client")?;
    let symbol = cli.symbol.to_uppercase();

    let info = client
        .exchange_info()
        .await
        .context("Failed to fetch exchange info")?
        .into_iter()
        .find(|i| i.symbol == symbol)
        .with_context(|| format!("Unknown symbol {}", symbol))?;

    let pair = Pair::new(info);
    for interval in Interval::ALL {
        let candles = client
            .klines(&symbol, interval, settings.feed.kline_history)
            .await
            .with_context(|| format!("Failed to fetch {} klines", interval.as_str()))?;
        if let Some(last) = candles.last() {
            pair.apply_ticker(TickerUpdate {
                last_price: last.close,
                ..TickerUpdate::default()
            });
        }
        pair.init_klines(interval, candles);
    }

    let snapshot = client
        .depth_snapshot(&symbol, settings.feed.depth_limit)
        .await
        .context("Failed to fetch depth snapshot")?;
    pair.install_depth_snapshot(snapshot);

    println!("\n╔══════════════════════════════════════════════════════╗");
    println!("║     {:<49}║", format!("{} RATING", symbol));
    println!("╚══════════════════════════════════════════════════════╝\n");
    print_rating("Short term (1m + 15m)", &pair.short_term_rating());
    print_rating("Long term (1h)", &pair.long_term_rating());

    let hourly = pair.snapshot().state.klines_1h;
    let closes = hourly.closes();
    println!("1h indicators");
    println!("  RSI(14):    {}", fmt_opt(calculate_rsi(&closes, 14)));
    println!("  ADX(14):    {}", fmt_opt(calculate_adx(&hourly.candles(), 14)));
    println!("  SMA(20):    {}\n", fmt_opt(calculate_sma(&closes, 20)));

    Ok(())
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.4}", v))
}

fn print_rating(title: &str, rating: &Rating) {
    println!("{}", title);
    println!("  Accuracy:   {:.2}", rating.accuracy);
    println!("  Investment: {:.2}", rating.investment);
    println!("  Pattern:    {:?} ({} bars ago)", rating.pattern, rating.distance);
    println!("  Book ratio: {:.2}\n", rating.order_book_ratio);
}
