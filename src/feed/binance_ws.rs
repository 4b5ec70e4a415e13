use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::api::MarketDataClient;
use crate::config::FeedSettings;
use crate::feed::{apply_event, parse_message, sync_books};
use crate::market::{Markets, Pair};
use crate::models::Interval;

/// Per-symbol streams: ticker, aggregated trades, depth diffs and one kline
/// stream per interval.
pub fn stream_names(symbol: &str) -> Vec<String> {
    let sym = symbol.to_lowercase();
    let mut streams = vec![
        format!("{}@ticker", sym),
        format!("{}@aggTrade", sym),
        format!("{}@depth", sym),
    ];
    streams.extend(
        Interval::ALL
            .iter()
            .map(|i| format!("{}@kline_{}", sym, i.as_str())),
    );
    streams
}

/// Split instruments over sockets so each carries at most
/// `streams_per_socket` streams. An instrument never spans two sockets.
fn socket_groups(pairs: Vec<Arc<Pair>>, streams_per_socket: usize) -> Vec<Vec<Arc<Pair>>> {
    let per_pair = 3 + Interval::ALL.len();
    let pairs_per_socket = (streams_per_socket / per_pair).max(1);
    pairs
        .chunks(pairs_per_socket)
        .map(|chunk| chunk.to_vec())
        .collect()
}

fn combined_url(ws_url: &str, pairs: &[Arc<Pair>]) -> String {
    let streams: Vec<String> = pairs
        .iter()
        .flat_map(|p| stream_names(p.symbol()))
        .collect();
    format!(
        "{}/stream?streams={}",
        ws_url.trim_end_matches('/'),
        streams.join("/")
    )
}

/// Exponential backoff with jitter: 0.5s doubling up to 32s, plus 0-250ms
fn backoff_delay(attempt: u32) -> Duration {
    let shift = attempt.min(6);
    let base_ms = 500u64.saturating_mul(1u64 << shift);
    let jitter = rand::thread_rng().gen_range(0..=250);
    Duration::from_millis(base_ms + jitter)
}

/// Spawn one socket task per group of instruments
pub fn spawn_feed(
    ws_url: &str,
    settings: &FeedSettings,
    client: Arc<dyn MarketDataClient>,
    markets: Arc<Markets>,
) -> Vec<JoinHandle<()>> {
    let pairs: Vec<Arc<Pair>> = markets.iter().cloned().collect();
    let groups = socket_groups(pairs, settings.streams_per_socket);
    tracing::info!(
        "📡 Starting market feed: {} instruments over {} sockets",
        markets.len(),
        groups.len()
    );

    groups
        .into_iter()
        .enumerate()
        .map(|(id, pairs)| {
            let url = combined_url(ws_url, &pairs);
            let client = client.clone();
            let markets = markets.clone();
            let depth_limit = settings.depth_limit;
            tokio::spawn(async move {
                run_socket(id, url, client, markets, pairs, depth_limit).await;
            })
        })
        .collect()
}

/// Keep one combined stream connected forever
///
/// Every (re)connect resets the group's books to buffering, then installs
/// fresh snapshots while the stream keeps feeding diffs into the buffers.
/// A book that needs a resync, a malformed frame or an exchange error
/// message drops the connection and starts over.
async fn run_socket(
    id: usize,
    ws_url: String,
    client: Arc<dyn MarketDataClient>,
    markets: Arc<Markets>,
    pairs: Vec<Arc<Pair>>,
    depth_limit: u32,
) {
    let mut attempt: u32 = 0;
    loop {
        let url = match Url::parse(&ws_url) {
            Ok(u) => u,
            Err(e) => {
                tracing::error!(?e, socket = id, "bad ws url");
                return;
            }
        };

        for pair in &pairs {
            pair.reset_order_book();
        }

        tracing::info!(socket = id, "connecting market stream");
        match connect_async(url).await {
            Ok((mut ws, _resp)) => {
                tracing::info!(socket = id, "✅ market stream connected");

                let sync_client = client.clone();
                let sync_pairs = pairs.clone();
                let mut snapshots = tokio::spawn(async move {
                    sync_books(sync_client.as_ref(), &sync_pairs, depth_limit).await
                });
                let mut synced = false;

                loop {
                    tokio::select! {
                        result = &mut snapshots, if !synced => {
                            synced = true;
                            match result {
                                Ok(true) => {
                                    attempt = 0;
                                    tracing::info!(socket = id, "order books live");
                                }
                                Ok(false) => {
                                    tracing::warn!(socket = id, "snapshot sync failed, reconnecting");
                                    break;
                                }
                                Err(e) => {
                                    tracing::error!(?e, socket = id, "snapshot task failed");
                                    break;
                                }
                            }
                        }
                        frame = ws.next() => {
                            let text = match frame {
                                Some(Ok(Message::Text(text))) => text,
                                Some(Ok(Message::Close(_))) | None => {
                                    tracing::info!(socket = id, "market stream closed");
                                    break;
                                }
                                Some(Ok(_)) => continue,
                                Some(Err(e)) => {
                                    tracing::error!(?e, socket = id, "ws read error");
                                    break;
                                }
                            };

                            match parse_message(&text) {
                                Ok(Some(event)) => {
                                    if apply_event(&markets, event) {
                                        break;
                                    }
                                }
                                Ok(None) => {}
                                Err(e) => {
                                    tracing::warn!(socket = id, "{}, reconnecting", e);
                                    break;
                                }
                            }
                        }
                    }
                }

                if !synced {
                    snapshots.abort();
                }
            }
            Err(e) => {
                tracing::error!(?e, socket = id, "connect failed");
            }
        }

        let delay = backoff_delay(attempt);
        attempt = attempt.saturating_add(1);
        tracing::info!(socket = id, "reconnecting in {:?}", delay);
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SymbolInfo;

    fn pair(symbol: &str) -> Arc<Pair> {
        Arc::new(Pair::new(SymbolInfo {
            symbol: symbol.to_string(),
            base_asset: symbol.trim_end_matches("USDT").to_string(),
            quote_asset: "USDT".to_string(),
            status: "TRADING".to_string(),
            permissions: vec!["SPOT".to_string()],
            price_precision: 4,
            quantity_precision: 1,
        }))
    }

    #[test]
    fn test_stream_names() {
        assert_eq!(
            stream_names("ADAUSDT"),
            vec![
                "adausdt@ticker",
                "adausdt@aggTrade",
                "adausdt@depth",
                "adausdt@kline_1m",
                "adausdt@kline_15m",
                "adausdt@kline_1h",
            ]
        );
    }

    #[test]
    fn test_socket_groups_respect_stream_limit() {
        let pairs: Vec<_> = (0..12).map(|i| pair(&format!("T{}USDT", i))).collect();

        let groups = socket_groups(pairs, 32);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].len(), 5);
        assert_eq!(groups[2].len(), 2);

        let tiny = socket_groups(vec![pair("ADAUSDT"), pair("XRPUSDT")], 4);
        assert_eq!(tiny.len(), 2);
    }

    #[test]
    fn test_combined_url() {
        let url = combined_url("wss://stream.binance.com:9443/", &[pair("ADAUSDT")]);
        assert!(url.starts_with("wss://stream.binance.com:9443/stream?streams=adausdt@ticker/"));
        assert!(url.ends_with("adausdt@kline_1h"));
        assert!(Url::parse(&url).is_ok());
    }

    #[test]
    fn test_backoff_is_capped() {
        let first = backoff_delay(0);
        assert!(first >= Duration::from_millis(500) && first <= Duration::from_millis(750));

        let capped = backoff_delay(40);
        assert!(capped >= Duration::from_millis(32_000) && capped <= Duration::from_millis(32_250));
    }
}
