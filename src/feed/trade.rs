//! TradeFeed: stateless normalizer that pushes trade prints to the trade
//! store, the outlier span tracker (for flow enrichment), and the
//! broadcaster. One instance per venue x market x symbol, mirroring the
//! book adapters' connection lifecycle.

use crate::broadcast::Broadcaster;
use crate::feed::types::{parse_price_qty, Trade};
use crate::outlier::span::{OutlierSpanTracker, TradeSide};
use crate::store::trade_store::TradeStore;
use crate::symbol::{Market, Symbol, Venue};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

pub struct TradeFeed {
    pub venue: Venue,
    pub market: Market,
    pub symbol: Symbol,
    pub ws_url: String,
    pub store: TradeStore,
    pub span_tracker: Arc<OutlierSpanTracker>,
    pub broadcaster: Broadcaster,
}

impl TradeFeed {
    pub async fn run(self) {
        let topic = self.topic();
        loop {
            if let Err(e) = self.run_once(&topic).await {
                warn!(symbol = %self.symbol, venue = %self.venue, error = %e, "trade feed disconnected, reconnecting");
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

    fn topic(&self) -> String {
        match self.venue {
            Venue::A => format!("publicTrade.{}", self.venue_symbol()),
            Venue::B => format!("trade.{}", self.venue_symbol()),
        }
    }

    async fn run_once(&self, topic: &str) -> anyhow::Result<()> {
        let (ws_stream, _) = connect_async(&self.ws_url).await?;
        let (mut write, mut read) = ws_stream.split();

        let sub = match self.venue {
            Venue::A => serde_json::json!({ "op": "subscribe", "args": [topic] }),
            Venue::B => serde_json::json!({
                "method": "sub.trade",
                "param": { "symbol": self.venue_symbol() },
            }),
        };
        write.send(Message::Text(sub.to_string())).await?;
        info!(symbol = %self.symbol, venue = %self.venue, topic, "subscribed to trade feed");

        while let Some(msg) = read.next().await {
            let msg = msg?;
            match msg {
                Message::Text(text) => {
                    if self.venue == Venue::B {
                        if let Some(pong) = pong_for(&text) {
                            write.send(Message::Text(pong)).await?;
                            continue;
                        }
                    }
                    if let Err(e) = self.handle_message(&text).await {
                        warn!(symbol = %self.symbol, error = %e, "failed to parse trade message, dropping");
                    }
                }
                Message::Ping(payload) => write.send(Message::Pong(payload)).await?,
                Message::Close(_) => break,
                _ => {}
            }
        }

        Ok(())
    }

    async fn handle_message(&self, text: &str) -> anyhow::Result<()> {
        let v: Value = serde_json::from_str(text)?;
        let entries: Vec<&Value> = match v.get("data") {
            Some(Value::Array(arr)) => arr.iter().collect(),
            Some(single) => vec![single],
            None => return Ok(()),
        };

        for entry in entries {
            let Some((price, qty)) = parse_price_qty(entry) else {
                continue;
            };
            let side = parse_side(entry);
            let ts = entry
                .get("T")
                .or_else(|| entry.get("ts"))
                .or_else(|| entry.get("timestamp"))
                .and_then(crate::feed::types::as_f64)
                .map(|v| v as i64)
                .unwrap_or_else(now_ms);

            let trade = Trade {
                ts,
                symbol: self.symbol.clone(),
                market: self.market,
                exchange: self.venue,
                price,
                qty,
                side,
            };

            self.store.append(trade.clone());
            self.span_tracker.enrich_with_trade(
                &trade.symbol,
                trade.market,
                trade.exchange,
                trade.price,
                trade.qty,
                trade.side,
            );
            self.broadcaster.broadcast("trade", &trade);
        }
        Ok(())
    }
}

fn parse_side(entry: &Value) -> TradeSide {
    let raw = entry
        .get("S")
        .or_else(|| entry.get("side"))
        .and_then(Value::as_str)
        .unwrap_or("");
    match raw.to_ascii_lowercase().as_str() {
        "sell" | "s" => TradeSide::Sell,
        _ => TradeSide::Buy,
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Venue B ping/pong echo, identical quirk to the book feeds.
fn pong_for(text: &str) -> Option<String> {
    let v: Value = serde_json::from_str(text).ok()?;
    if v.get("method").and_then(Value::as_str) == Some("ping") {
        return Some(serde_json::json!({ "method": "pong" }).to_string());
    }
    if let Some(ping_val) = v.get("ping") {
        return Some(serde_json::json!({ "pong": ping_val }).to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_side_defaults_to_buy() {
        assert_eq!(parse_side(&json!({"side": "Sell"})), TradeSide::Sell);
        assert_eq!(parse_side(&json!({"S": "B"})), TradeSide::Buy);
        assert_eq!(parse_side(&json!({})), TradeSide::Buy);
    }
}
