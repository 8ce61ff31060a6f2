//! Shared application state handed to every HTTP/WebSocket handler, and the
//! startup wiring that builds the book registry, stores, and feed tasks for
//! each configured symbol.

use crate::book::adapter::{BookHandle, BookKey, BookRegistry};
use crate::book::incremental_ws::IncrementalWsAdapter;
use crate::book::snapshot_poll::SnapshotPollAdapter;
use crate::book::snapshot_ws::SnapshotWsAdapter;
use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::engine::MetricsEngine;
use crate::feed::{LiquidationFeed, OiFundingFeed, TradeFeed};
use crate::outlier::detector::MidHistoryStore;
use crate::outlier::span::OutlierSpanTracker;
use crate::store::{
    support, LargeMoveStore, LiquidationStore, MetricsStore, OiFundingStore, OutlierStore,
    SpanStore, TradeStore,
};
use crate::symbol::{Market, Venue};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: BookRegistry,
    pub metrics_store: MetricsStore,
    pub trade_store: TradeStore,
    pub liquidation_store: LiquidationStore,
    pub oi_funding_store: OiFundingStore,
    pub outlier_store: OutlierStore,
    pub span_store: SpanStore,
    pub large_move_store: LargeMoveStore,
    pub span_tracker: Arc<OutlierSpanTracker>,
    pub broadcaster: Broadcaster,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let data_dir = Path::new(&config.data_dir);
        std::fs::create_dir_all(data_dir)
            .map_err(|e| anyhow::anyhow!("failed to create data dir {data_dir:?}: {e}"))?;

        // All seven stores share one connection onto one file; each store's
        // `open` only adds its own table.
        let conn = support::open_shared(&data_dir.join("monitor.db"))?;

        Ok(Self {
            config: Arc::new(config),
            registry: BookRegistry::new(),
            metrics_store: MetricsStore::open(conn.clone())?,
            trade_store: TradeStore::open(conn.clone())?,
            liquidation_store: LiquidationStore::open(conn.clone())?,
            oi_funding_store: OiFundingStore::open(conn.clone())?,
            outlier_store: OutlierStore::open(conn.clone())?,
            span_store: SpanStore::open(conn.clone())?,
            large_move_store: LargeMoveStore::open(conn)?,
            span_tracker: Arc::new(OutlierSpanTracker::new()),
            broadcaster: Broadcaster::new(),
        })
    }

    fn book_handle(&self, venue: Venue, market: Market, symbol: &crate::symbol::Symbol) -> BookHandle {
        self.registry.handle(BookKey {
            venue,
            market,
            symbol: symbol.clone(),
        })
    }

    /// Spawn one task per (venue, market, symbol) book feed, trade feed,
    /// liquidation feed and oi/funding poller, plus the metrics tick loop —
    /// skipped entirely when `LIVE_MONITORING=false`.
    pub fn spawn_feeds(&self) {
        if !self.config.live_monitoring {
            info!("live monitoring disabled, skipping all feed connections");
            return;
        }

        for symbol in &self.config.symbols {
            self.spawn_book_feeds(symbol);
            self.spawn_trade_feeds(symbol);
            self.spawn_liquidation_feed(symbol);
            self.spawn_oi_funding_feed(symbol);
        }

        let engine = MetricsEngine::new(
            (*self.config).clone(),
            self.registry.clone(),
            MidHistoryStore::new(),
            self.span_tracker.clone(),
            self.metrics_store.clone(),
            self.outlier_store.clone(),
            self.span_store.clone(),
            self.large_move_store.clone(),
            self.broadcaster.clone(),
        );
        tokio::spawn(engine.run());
    }

    fn spawn_book_feeds(&self, symbol: &crate::symbol::Symbol) {
        let cfg = &self.config;

        let a_spot = IncrementalWsAdapter {
            venue: Venue::A,
            market: Market::Spot,
            symbol: symbol.clone(),
            depth: cfg.depth,
            ws_url: cfg.venue_a_ws_url.clone(),
            handle: self.book_handle(Venue::A, Market::Spot, symbol),
        };
        tokio::spawn(a_spot.run());

        let a_perp = IncrementalWsAdapter {
            venue: Venue::A,
            market: Market::Perp,
            symbol: symbol.clone(),
            depth: cfg.depth,
            ws_url: cfg.venue_a_ws_url.clone(),
            handle: self.book_handle(Venue::A, Market::Perp, symbol),
        };
        tokio::spawn(a_perp.run());

        let b_perp = SnapshotWsAdapter::new(
            symbol.clone(),
            cfg.depth,
            cfg.venue_b_ws_url.clone(),
            self.book_handle(Venue::B, Market::Perp, symbol),
        );
        tokio::spawn(b_perp.run());

        match SnapshotPollAdapter::new(
            symbol.clone(),
            cfg.depth,
            cfg.venue_b_rest_url.clone(),
            crate::book::snapshot_poll::default_poll_interval_ms(),
            self.book_handle(Venue::B, Market::Spot, symbol),
        ) {
            Ok(b_spot) => {
                tokio::spawn(b_spot.run());
            }
            Err(e) => tracing::warn!(%symbol, error = %e, "failed to build venue B spot poller"),
        }
    }

    fn spawn_trade_feeds(&self, symbol: &crate::symbol::Symbol) {
        for (venue, market, ws_url) in [
            (Venue::A, Market::Spot, self.config.venue_a_ws_url.clone()),
            (Venue::A, Market::Perp, self.config.venue_a_ws_url.clone()),
            (Venue::B, Market::Perp, self.config.venue_b_ws_url.clone()),
        ] {
            let feed = TradeFeed {
                venue,
                market,
                symbol: symbol.clone(),
                ws_url,
                store: self.trade_store.clone(),
                span_tracker: self.span_tracker.clone(),
                broadcaster: self.broadcaster.clone(),
            };
            tokio::spawn(feed.run());
        }
    }

    fn spawn_liquidation_feed(&self, symbol: &crate::symbol::Symbol) {
        let feed = LiquidationFeed {
            venue: Venue::A,
            market: Market::Perp,
            symbol: symbol.clone(),
            ws_url: self.config.venue_a_ws_url.clone(),
            rest_fallback_url: Some(format!("{}/liquidations", self.config.venue_a_rest_url)),
            store: self.liquidation_store.clone(),
            broadcaster: self.broadcaster.clone(),
        };
        tokio::spawn(feed.run());
    }

    fn spawn_oi_funding_feed(&self, symbol: &crate::symbol::Symbol) {
        match OiFundingFeed::new(
            Venue::A,
            symbol.clone(),
            self.config.venue_a_rest_url.clone(),
            crate::feed::oi_funding::default_poll_interval_ms(),
            self.oi_funding_store.clone(),
            self.broadcaster.clone(),
        ) {
            Ok(feed) => {
                tokio::spawn(feed.run());
            }
            Err(e) => tracing::warn!(%symbol, error = %e, "failed to build oi/funding poller"),
        }
    }
}
