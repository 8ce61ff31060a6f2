//! LiquidationFeed: stateless normalizer for forced-liquidation prints.
//! Primary transport is websocket; if the venue rejects the subscription
//! the feed falls back to REST polling.

use crate::broadcast::Broadcaster;
use crate::feed::types::{parse_price_qty, Liquidation, LiquidationSide};
use crate::store::liquidation_store::LiquidationStore;
use crate::symbol::{Market, Symbol, Venue};
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const REST_FALLBACK_POLL_MS: u64 = 5_000;

pub struct LiquidationFeed {
    pub venue: Venue,
    pub market: Market,
    pub symbol: Symbol,
    pub ws_url: String,
    /// REST endpoint used only when the venue rejects the websocket
    /// subscription. `None` means this venue has no documented REST
    /// fallback and the feed simply stays dormant on rejection.
    pub rest_fallback_url: Option<String>,
    pub store: LiquidationStore,
    pub broadcaster: Broadcaster,
}

impl LiquidationFeed {
    pub async fn run(self) {
        loop {
            match self.run_once().await {
                Ok(()) => {}
                Err(FeedFailure::Rejected) => {
                    if let Some(url) = self.rest_fallback_url.clone() {
                        warn!(symbol = %self.symbol, venue = %self.venue, "liquidation subscription rejected, falling back to REST polling");
                        self.poll_rest(&url).await;
                        continue;
                    }
                    warn!(symbol = %self.symbol, venue = %self.venue, "liquidation subscription rejected, no REST fallback, feed dormant");
                    return;
                }
                Err(FeedFailure::Transient(e)) => {
                    warn!(symbol = %self.symbol, venue = %self.venue, error = %e, "liquidation feed disconnected, reconnecting");
                }
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    fn venue_symbol(&self) -> String {
        match (self.venue, self.market) {
            (Venue::A, _) => self.symbol.to_venue_a(),
            (Venue::B, Market::Perp) => self.symbol.to_venue_b_perp(),
            (Venue::B, Market::Spot) => self.symbol.to_venue_b_spot(),
        }
    }

    async fn run_once(&self) -> Result<(), FeedFailure> {
        let (ws_stream, _) = connect_async(&self.ws_url)
            .await
            .map_err(|e| FeedFailure::Transient(e.into()))?;
        let (mut write, mut read) = ws_stream.split();

        let topic = format!("liquidation.{}", self.venue_symbol());
        let sub = serde_json::json!({ "op": "subscribe", "args": [topic] });
        write
            .send(Message::Text(sub.to_string()))
            .await
            .map_err(|e| FeedFailure::Transient(e.into()))?;
        info!(symbol = %self.symbol, venue = %self.venue, topic, "subscribed to liquidation feed");

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| FeedFailure::Transient(e.into()))?;
            match msg {
                Message::Text(text) => {
                    if is_rejection(&text) {
                        return Err(FeedFailure::Rejected);
                    }
                    self.handle_message(&text);
                }
                Message::Ping(payload) => write
                    .send(Message::Pong(payload))
                    .await
                    .map_err(|e| FeedFailure::Transient(e.into()))?,
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok(())
    }

    fn handle_message(&self, text: &str) {
        let Ok(v) = serde_json::from_str::<Value>(text) else {
            warn!(symbol = %self.symbol, "failed to parse liquidation message, dropping");
            return;
        };
        let entries: Vec<&Value> = match v.get("data") {
            Some(Value::Array(arr)) => arr.iter().collect(),
            Some(single) => vec![single],
            None => return,
        };
        for entry in entries {
            self.emit_from_payload(entry);
        }
    }

    fn emit_from_payload(&self, entry: &Value) {
        let Some((price, qty)) = parse_price_qty(entry) else {
            return;
        };
        let side = match entry
            .get("side")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_ascii_lowercase()
            .as_str()
        {
            "sell" => LiquidationSide::Sell,
            _ => LiquidationSide::Buy,
        };
        let ts = entry
            .get("ts")
            .or_else(|| entry.get("time"))
            .and_then(crate::feed::types::as_f64)
            .map(|v| v as i64)
            .unwrap_or_else(now_ms);

        let liq = Liquidation {
            ts,
            symbol: self.symbol.clone(),
            market: self.market,
            exchange: self.venue,
            side,
            price,
            qty,
        };
        self.store.append(liq.clone());
        self.broadcaster.broadcast("liquidation", &liq);
    }

    async fn poll_rest(&self, base_url: &str) {
        let client = match Client::builder().timeout(Duration::from_secs(10)).build() {
            Ok(c) => c,
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "failed to build REST client for liquidation fallback");
                return;
            }
        };
        let mut ticker = tokio::time::interval(Duration::from_millis(REST_FALLBACK_POLL_MS));
        loop {
            ticker.tick().await;
            let url = format!("{base_url}?symbol={}", self.venue_symbol());
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
                    Ok(body) => {
                        let entries: Vec<&Value> = match body.get("data") {
                            Some(Value::Array(arr)) => arr.iter().collect(),
                            Some(single) => vec![single],
                            None => continue,
                        };
                        for entry in entries {
                            self.emit_from_payload(entry);
                        }
                    }
                    Err(_) => continue,
                },
                _ => continue,
            }
        }
    }
}

enum FeedFailure {
    Transient(anyhow::Error),
    Rejected,
}

fn is_rejection(text: &str) -> bool {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| v.get("success").and_then(Value::as_bool))
        .map(|ok| !ok)
        .unwrap_or(false)
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{support, RowFilter};
    use serde_json::json;

    #[test]
    fn is_rejection_detects_explicit_false_success() {
        assert!(is_rejection(r#"{"success": false, "ret_msg": "topic not supported"}"#));
        assert!(!is_rejection(r#"{"success": true}"#));
        assert!(!is_rejection(r#"{"topic": "liquidation.AAABUSDT"}"#));
    }

    #[test]
    fn emit_from_payload_parses_side_and_stores() {
        let dir = tempfile::tempdir().unwrap();
        let conn = support::open_shared(&dir.path().join("monitor.db")).unwrap();
        let store = LiquidationStore::open(conn).unwrap();
        let feed = LiquidationFeed {
            venue: Venue::A,
            market: Market::Perp,
            symbol: Symbol::new("AAABUSDT"),
            ws_url: "wss://example.invalid".to_string(),
            rest_fallback_url: None,
            store: store.clone(),
            broadcaster: Broadcaster::new(),
        };
        feed.emit_from_payload(&json!({"side": "Sell", "p": "100.0", "q": "5.0", "ts": 1}));
        let history = store.get_history(10, &RowFilter::default());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].side, LiquidationSide::Sell);
    }
}
