//! OiFundingFeed: stateless normalizer for open-interest/funding ticks.
//! Perp-only; polls the venue's REST ticker endpoint, with the same
//! transient-failure handling as the spot depth poller.

use crate::broadcast::Broadcaster;
use crate::feed::types::{as_f64, OiFundingTick};
use crate::store::oi_funding_store::OiFundingStore;
use crate::symbol::{Market, Symbol, Venue};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

pub struct OiFundingFeed {
    pub venue: Venue,
    pub symbol: Symbol,
    pub rest_base_url: String,
    pub poll_interval_ms: u64,
    pub store: OiFundingStore,
    pub broadcaster: Broadcaster,
    client: Client,
}

impl OiFundingFeed {
    pub fn new(
        venue: Venue,
        symbol: Symbol,
        rest_base_url: String,
        poll_interval_ms: u64,
        store: OiFundingStore,
        broadcaster: Broadcaster,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            venue,
            symbol,
            rest_base_url,
            poll_interval_ms: poll_interval_ms.max(1_000),
            store,
            broadcaster,
            client,
        })
    }

    fn venue_symbol(&self) -> String {
        match self.venue {
            Venue::A => self.symbol.to_venue_a(),
            Venue::B => self.symbol.to_venue_b_perp(),
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.poll_interval_ms));
        loop {
            ticker.tick().await;
            if let Err(e) = self.poll_once().await {
                warn!(symbol = %self.symbol, venue = %self.venue, error = %e, "oi/funding poll failed, dropping tick");
            }
        }
    }

    async fn poll_once(&self) -> anyhow::Result<()> {
        let url = format!(
            "{}/ticker?symbol={}",
            self.rest_base_url,
            self.venue_symbol()
        );
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("ticker poll returned status {}", resp.status());
        }
        let body: Value = resp.json().await?;

        let open_interest = as_f64_field(&body, &["openInterest", "open_interest", "oi"]);
        let funding_rate = as_f64_field(&body, &["fundingRate", "funding_rate"]);
        if open_interest.is_none() && funding_rate.is_none() {
            return Ok(());
        }

        let tick = OiFundingTick {
            ts: now_ms(),
            symbol: self.symbol.clone(),
            market: Market::Perp,
            exchange: self.venue,
            open_interest,
            funding_rate,
        };

        self.store.append(tick.clone());
        self.broadcaster.broadcast("oiFunding", &tick);
        debug!(symbol = %self.symbol, venue = %self.venue, "polled oi/funding tick");
        Ok(())
    }
}

fn as_f64_field(v: &Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        if let Some(field) = v.get(*key) {
            if let Some(n) = as_f64(field) {
                return Some(n);
            }
        }
    }
    None
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
