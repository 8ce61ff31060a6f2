//! SnapshotPoll adapter (venue B spot): fetches depth over HTTP on a
//! configurable poll interval, same diff semantics as SnapshotWS. Transient
//! HTTP failures just drop the tick.

use crate::book::adapter::{BookAdapter, BookHandle, BookKey};
use crate::symbol::{Market, Side, Symbol, Venue};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const MIN_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

pub struct SnapshotPollAdapter {
    pub symbol: Symbol,
    pub depth: usize,
    pub rest_base_url: String,
    pub poll_interval_ms: u64,
    pub handle: BookHandle,
    client: Client,
}

impl BookAdapter for SnapshotPollAdapter {
    fn key(&self) -> BookKey {
        BookKey {
            venue: Venue::B,
            market: Market::Spot,
            symbol: self.symbol.clone(),
        }
    }
}

impl SnapshotPollAdapter {
    pub fn new(
        symbol: Symbol,
        depth: usize,
        rest_base_url: String,
        poll_interval_ms: u64,
        handle: BookHandle,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            symbol,
            depth,
            rest_base_url,
            poll_interval_ms: poll_interval_ms.max(MIN_POLL_INTERVAL_MS),
            handle,
            client,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.poll_interval());
        loop {
            ticker.tick().await;
            if let Err(e) = self.poll_once().await {
                warn!(symbol = %self.symbol, error = %e, "spot depth poll failed, dropping tick");
            }
        }
    }

    async fn poll_once(&self) -> anyhow::Result<()> {
        let url = format!(
            "{}/depth?symbol={}&limit={}",
            self.rest_base_url,
            self.symbol.to_venue_b_spot(),
            self.depth
        );
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("depth poll returned status {}", resp.status());
        }
        let body: Value = resp.json().await?;

        let bids = parse_levels(body.get("bids"));
        let asks = parse_levels(body.get("asks"));

        let mut book = self.handle.write();
        book.apply_snapshot(Side::Bid, &bids);
        book.apply_snapshot(Side::Ask, &asks);
        drop(book);

        debug!(symbol = %self.symbol, bid_levels = bids.len(), ask_levels = asks.len(), "polled spot depth snapshot");
        Ok(())
    }
}

pub fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_interval_clamped_to_minimum() {
        let handle = std::sync::Arc::new(parking_lot::RwLock::new(
            crate::book::state::BookState::new(),
        ));
        let adapter = SnapshotPollAdapter::new(
            Symbol::new("AAABUSDT"),
            50,
            "http://example.invalid".to_string(),
            200,
            handle,
        )
        .unwrap();
        assert_eq!(adapter.poll_interval_ms, MIN_POLL_INTERVAL_MS);
    }
}
