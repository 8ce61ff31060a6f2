//! IncrementalWS adapter (venue A spot/perp): sparse `{price,size}` diffs,
//! `size == 0` means deletion. Reconnects with a fixed ~2s backoff.

use crate::book::adapter::{BookAdapter, BookHandle, BookKey};
use crate::symbol::{Market, Side, Symbol, Venue};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

pub struct IncrementalWsAdapter {
    pub venue: Venue,
    pub market: Market,
    pub symbol: Symbol,
    pub depth: usize,
    pub ws_url: String,
    pub handle: BookHandle,
}

impl BookAdapter for IncrementalWsAdapter {
    fn key(&self) -> BookKey {
        BookKey {
            venue: self.venue,
            market: self.market,
            symbol: self.symbol.clone(),
        }
    }
}

impl IncrementalWsAdapter {
    /// Runs until the process shuts down; never returns `Err` — every
    /// failure is logged and followed by a reconnect attempt.
    pub async fn run(self) {
        let topic = format!("orderbook.{}.{}", self.depth, self.venue_symbol());

        loop {
            if let Err(e) = self.run_once(&topic).await {
                warn!(symbol = %self.symbol, venue = %self.venue, error = %e, "incremental feed disconnected, reconnecting");
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    fn venue_symbol(&self) -> String {
        match self.venue {
            Venue::A => self.symbol.to_venue_a(),
            Venue::B => match self.market {
                Market::Perp => self.symbol.to_venue_b_perp(),
                Market::Spot => self.symbol.to_venue_b_spot(),
            },
        }
    }

    async fn run_once(&self, topic: &str) -> anyhow::Result<()> {
        let (ws_stream, _) = connect_async(&self.ws_url).await?;
        let (mut write, mut read) = ws_stream.split();

        let sub = serde_json::json!({ "op": "subscribe", "args": [topic] });
        write.send(Message::Text(sub.to_string())).await?;
        info!(symbol = %self.symbol, venue = %self.venue, topic, "subscribed to incremental depth feed");

        while let Some(msg) = read.next().await {
            let msg = msg?;
            match msg {
                Message::Text(text) => {
                    if let Err(e) = self.handle_message(&text) {
                        warn!(symbol = %self.symbol, error = %e, "failed to parse depth message, dropping");
                    }
                }
                Message::Ping(payload) => {
                    write.send(Message::Pong(payload)).await?;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }

        Ok(())
    }

    fn handle_message(&self, text: &str) -> anyhow::Result<()> {
        let v: Value = serde_json::from_str(text)?;
        let Some(data) = v.get("data") else {
            return Ok(());
        };

        let mut book = self.handle.write();

        if let Some(bids) = data.get("b").and_then(Value::as_array) {
            apply_side(&mut book, Side::Bid, bids)?;
        }
        if let Some(asks) = data.get("a").and_then(Value::as_array) {
            apply_side(&mut book, Side::Ask, asks)?;
        }
        drop(book);

        debug!(symbol = %self.symbol, "applied incremental depth update");
        Ok(())
    }
}

fn apply_side(
    book: &mut crate::book::state::BookState,
    side: Side,
    updates: &[Value],
) -> anyhow::Result<()> {
    for entry in updates {
        let Some(pair) = entry.as_array() else {
            continue;
        };
        if pair.len() < 2 {
            continue;
        }
        let (Some(price), Some(size)) = (parse_f64(&pair[0]), parse_f64(&pair[1])) else {
            continue;
        };
        book.apply_update(side, price, size);
    }
    Ok(())
}

fn parse_f64(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
