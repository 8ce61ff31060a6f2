//! SnapshotWS adapter (venue B perp): full top-N snapshots, applied by
//! diffing against the previous state. Honors venue B's ping/pong quirk and
//! falls back to the closest supported depth if the requested one is
//! rejected.

use crate::book::adapter::{BookAdapter, BookHandle, BookKey};
use crate::symbol::{Market, Side, Symbol, Venue};
use futures_util::{SinkExt, StreamExt};
use once_cell_like::OnceBool;
use serde_json::Value;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const SUPPORTED_DEPTHS: [usize; 3] = [5, 10, 20];

/// Tiny stand-in for a "log once" latch without pulling in `once_cell`.
mod once_cell_like {
    use std::sync::atomic::{AtomicBool, Ordering};

    pub struct OnceBool(AtomicBool);

    impl OnceBool {
        pub const fn new() -> Self {
            Self(AtomicBool::new(false))
        }

        /// Returns `true` the first time it's called, `false` afterwards.
        pub fn fire(&self) -> bool {
            self.0
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        }
    }
}

fn closest_supported_depth(requested: usize) -> usize {
    *SUPPORTED_DEPTHS
        .iter()
        .min_by_key(|&&d| (d as i64 - requested as i64).abs())
        .unwrap()
}

pub struct SnapshotWsAdapter {
    pub symbol: Symbol,
    pub depth: usize,
    pub ws_url: String,
    pub handle: BookHandle,
    depth_fallback_logged: OnceBool,
}

impl BookAdapter for SnapshotWsAdapter {
    fn key(&self) -> BookKey {
        BookKey {
            venue: Venue::B,
            market: Market::Perp,
            symbol: self.symbol.clone(),
        }
    }
}

impl SnapshotWsAdapter {
    pub fn new(symbol: Symbol, depth: usize, ws_url: String, handle: BookHandle) -> Self {
        Self {
            symbol,
            depth,
            ws_url,
            handle,
            depth_fallback_logged: OnceBool::new(),
        }
    }

    pub async fn run(self) {
        let effective_depth = if SUPPORTED_DEPTHS.contains(&self.depth) {
            self.depth
        } else {
            let fallback = closest_supported_depth(self.depth);
            if self.depth_fallback_logged.fire() {
                warn!(symbol = %self.symbol, requested = self.depth, fallback, "venue rejects requested depth, falling back");
            }
            fallback
        };

        loop {
            if let Err(e) = self.run_once(effective_depth).await {
                warn!(symbol = %self.symbol, error = %e, "snapshot feed disconnected, reconnecting");
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn run_once(&self, depth: usize) -> anyhow::Result<()> {
        let (ws_stream, _) = connect_async(&self.ws_url).await?;
        let (mut write, mut read) = ws_stream.split();

        let sub = serde_json::json!({
            "method": "sub.depth.full",
            "param": { "symbol": self.symbol.to_venue_b_perp(), "limit": depth },
        });
        write.send(Message::Text(sub.to_string())).await?;
        info!(symbol = %self.symbol, depth, "subscribed to venue B perp full-depth feed");

        while let Some(msg) = read.next().await {
            let msg = msg?;
            match msg {
                Message::Text(text) => {
                    if let Some(pong) = pong_for(&text) {
                        write.send(Message::Text(pong)).await?;
                        continue;
                    }
                    if let Err(e) = self.handle_message(&text) {
                        warn!(symbol = %self.symbol, error = %e, "failed to parse snapshot message, dropping");
                    }
                }
                Message::Ping(payload) => write.send(Message::Pong(payload)).await?,
                Message::Close(_) => break,
                _ => {}
            }
        }

        Ok(())
    }

    fn handle_message(&self, text: &str) -> anyhow::Result<()> {
        let v: Value = serde_json::from_str(text)?;

        let bids = parse_levels(v.get("bids"));
        let asks = parse_levels(v.get("asks"));
        if bids.is_empty() && asks.is_empty() {
            return Ok(());
        }

        let mut book = self.handle.write();
        book.apply_snapshot(Side::Bid, &bids);
        book.apply_snapshot(Side::Ask, &asks);
        Ok(())
    }
}

/// Venue B responds to pings either as `{"method":"ping",...}` or
/// `{"ping":...}`; the symmetric reply echoes the same shape back.
fn pong_for(text: &str) -> Option<String> {
    let v: Value = serde_json::from_str(text).ok()?;
    if v.get("method").and_then(Value::as_str) == Some("ping") {
        let pong = serde_json::json!({ "method": "pong" });
        return Some(pong.to_string());
    }
    if let Some(ping_val) = v.get("ping") {
        let pong = serde_json::json!({ "pong": ping_val });
        return Some(pong.to_string());
    }
    None
}

fn parse_levels(levels: Option<&Value>) -> Vec<(f64, f64)> {
    let Some(arr) = levels.and_then(Value::as_array) else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|entry| {
            let pair = entry.as_array()?;
            let price = parse_f64(pair.first()?)?;
            let size = parse_f64(pair.get(1)?)?;
            Some((price, size))
        })
        .collect()
}

fn parse_f64(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Extract a symbol from a channel name of the form `...@SYMBOL@...` when no
/// explicit `symbol`/`s` field is present in the payload.
pub fn extract_symbol_from_channel(channel: &str, known_tokens: &[&str]) -> Option<String> {
    channel
        .split('@')
        .find(|token| !known_tokens.contains(token) && !token.is_empty())
        .map(|s| s.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closest_depth_rounds_to_nearest_supported() {
        assert_eq!(closest_supported_depth(7), 5);
        assert_eq!(closest_supported_depth(8), 10);
        assert_eq!(closest_supported_depth(50), 20);
    }

    #[test]
    fn extracts_symbol_from_channel_name() {
        let sym = extract_symbol_from_channel("depth@AAABUSDT@full", &["depth", "full"]);
        assert_eq!(sym.as_deref(), Some("AAABUSDT"));
    }

    #[test]
    fn pong_for_method_ping() {
        let pong = pong_for(r#"{"method":"ping"}"#).unwrap();
        assert!(pong.contains("pong"));
    }

    #[test]
    fn pong_for_bare_ping_field() {
        let pong = pong_for(r#"{"ping":12345}"#).unwrap();
        assert!(pong.contains("12345"));
    }
}
