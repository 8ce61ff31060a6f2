//! `MetricsEngine`: the fixed-cadence tick loop that pulls per-venue book
//! snapshots, merges them, computes metrics, runs outlier detection and
//! large-move detection, and fans everything out to stores and the
//! broadcaster. This is the one place that touches every other subsystem,
//! mirroring the tick-timer composition of a typical long-running service
//! main loop.

use crate::book::adapter::{BookHandle, BookKey, BookRegistry};
use crate::book::state::MoveStats;
use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::metrics::compute::{detect_large_moves, merge_levels, side_metrics, top_by_notional};
use crate::metrics::types::{AggregatedMoveStats, ExchangeMetrics, MetricsPoint, MoveStatsDto};
use crate::outlier::detector::{detect_outliers, MidHistoryStore, VenueBookSnapshot};
use crate::outlier::span::OutlierSpanTracker;
use crate::outlier::types::OutlierRecord;
use crate::store::{LargeMoveStore, MetricsStore, OutlierStore, SpanStore};
use crate::symbol::{Market, Side, Symbol, Venue};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// One venue's book read as a consistent snapshot for this tick.
struct VenueSnapshot {
    bids: Vec<(f64, f64)>,
    asks: Vec<(f64, f64)>,
    best_bid: f64,
    best_ask: f64,
    mid: f64,
}

/// Read a spot book: top-N levels plus best bid/ask. Returns `None` if the
/// book isn't registered yet or has no two-sided market.
fn read_spot_snapshot(handle: &BookHandle, depth: usize) -> Option<VenueSnapshot> {
    let book = handle.read();
    let bids = book.bids.top_n(depth, true);
    let asks = book.asks.top_n(depth, false);
    let (best_bid, best_ask) = (book.best_bid()?, book.best_ask()?);
    drop(book);
    if bids.is_empty() || asks.is_empty() {
        return None;
    }
    Some(VenueSnapshot {
        bids,
        asks,
        best_bid,
        best_ask,
        mid: (best_bid + best_ask) / 2.0,
    })
}

/// Read a perp book and additionally drain its move tracker, since the perp
/// path needs `MoveStats` for `ExchangeMetrics`/`AggregatedMoveStats`.
fn read_perp_snapshot(handle: &BookHandle, depth: usize) -> Option<(VenueSnapshot, MoveStats, MoveStats)> {
    let mut book = handle.write();
    let bids = book.bids.top_n(depth, true);
    let asks = book.asks.top_n(depth, false);
    let (best_bid, best_ask) = (book.best_bid(), book.best_ask());
    let tracker = book.tracker.snapshot_and_reset();
    drop(book);

    let (best_bid, best_ask) = (best_bid?, best_ask?);
    if bids.is_empty() || asks.is_empty() {
        return None;
    }
    Some((
        VenueSnapshot {
            bids,
            asks,
            best_bid,
            best_ask,
            mid: (best_bid + best_ask) / 2.0,
        },
        tracker.bid,
        tracker.ask,
    ))
}

fn book_snapshot_json(bids: &[(f64, f64)], asks: &[(f64, f64)]) -> String {
    serde_json::json!({ "bids": bids, "asks": asks }).to_string()
}

fn detect_venue_outliers(
    venue: Venue,
    market: Market,
    symbol: &Symbol,
    ts: i64,
    snap: &VenueSnapshot,
    mid_history: &MidHistoryStore,
) -> Vec<OutlierRecord> {
    let top20_bids = &snap.bids[..snap.bids.len().min(20)];
    let top20_asks = &snap.asks[..snap.asks.len().min(20)];
    mid_history.record_tick(venue, symbol, ts, snap.mid);
    let snapshot = VenueBookSnapshot {
        venue,
        symbol,
        market,
        ts,
        mid: snap.mid,
        best_bid: snap.best_bid,
        best_ask: snap.best_ask,
        top20_bids,
        top20_asks,
        book_snapshot_json: book_snapshot_json(top20_bids, top20_asks),
    };
    detect_outliers(&snapshot, mid_history)
}

#[derive(Default, Clone)]
struct PrevPerpBook {
    bids: Vec<(f64, f64)>,
    asks: Vec<(f64, f64)>,
}

pub struct MetricsEngine {
    config: Config,
    registry: BookRegistry,
    mid_history: MidHistoryStore,
    span_tracker: Arc<OutlierSpanTracker>,
    metrics_store: MetricsStore,
    outlier_store: OutlierStore,
    span_store: SpanStore,
    large_move_store: LargeMoveStore,
    broadcaster: Broadcaster,
    prev_perp_book: Mutex<HashMap<Symbol, PrevPerpBook>>,
}

impl MetricsEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        registry: BookRegistry,
        mid_history: MidHistoryStore,
        span_tracker: Arc<OutlierSpanTracker>,
        metrics_store: MetricsStore,
        outlier_store: OutlierStore,
        span_store: SpanStore,
        large_move_store: LargeMoveStore,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            config,
            registry,
            mid_history,
            span_tracker,
            metrics_store,
            outlier_store,
            span_store,
            large_move_store,
            broadcaster,
            prev_perp_book: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.metrics_interval_ms));
        loop {
            ticker.tick().await;
            let ts = now_ms();
            for symbol in self.config.symbols.clone() {
                // Each symbol's tick is independent: a stalled or missing
                // feed for one symbol must never block the others.
                self.tick_spot(&symbol, ts);
                self.tick_perp(&symbol, ts);
            }
        }
    }

    fn book(&self, venue: Venue, market: Market, symbol: &Symbol) -> Option<BookHandle> {
        self.registry.get(&BookKey {
            venue,
            market,
            symbol: symbol.clone(),
        })
    }

    /// Run outlier detection for whichever venues are present and persist
    /// the candidates before feeding the span tracker, so raw sightings land
    /// even if a span never opens for them.
    fn detect_and_record_outliers(&self, candidates: Vec<OutlierRecord>) {
        if candidates.is_empty() {
            return;
        }
        self.outlier_store.append_all(&candidates);
        for span in self.span_tracker.update(&candidates) {
            self.span_store.append(span);
        }
    }

    fn tick_spot(&self, symbol: &Symbol, ts: i64) {
        let depth = self.config.depth;
        let a = self
            .book(Venue::A, Market::Spot, symbol)
            .and_then(|h| read_spot_snapshot(&h, depth));
        let b = self
            .book(Venue::B, Market::Spot, symbol)
            .and_then(|h| read_spot_snapshot(&h, depth));

        if a.is_none() && b.is_none() {
            return;
        }

        let mut candidates = Vec::new();
        if let Some(snap) = &a {
            candidates.extend(detect_venue_outliers(Venue::A, Market::Spot, symbol, ts, snap, &self.mid_history));
        }
        if let Some(snap) = &b {
            candidates.extend(detect_venue_outliers(Venue::B, Market::Spot, symbol, ts, snap, &self.mid_history));
        }
        self.detect_and_record_outliers(candidates);

        let merged_bids = merge_levels(
            a.as_ref().map(|s| s.bids.as_slice()).unwrap_or(&[]),
            b.as_ref().map(|s| s.bids.as_slice()).unwrap_or(&[]),
            depth,
            true,
        );
        let merged_asks = merge_levels(
            a.as_ref().map(|s| s.asks.as_slice()).unwrap_or(&[]),
            b.as_ref().map(|s| s.asks.as_slice()).unwrap_or(&[]),
            depth,
            false,
        );
        let (Some(&(best_bid, _)), Some(&(best_ask, _))) = (merged_bids.first(), merged_asks.first()) else {
            return;
        };
        let mid = (best_bid + best_ask) / 2.0;

        self.broadcaster.broadcast(
            "book",
            &serde_json::json!({
                "symbol": symbol.as_str(),
                "mid": mid,
                "bids": merged_bids,
                "asks": merged_asks,
                "depth": depth,
                "sources": { "A": a.is_some(), "B": b.is_some() },
            }),
        );
    }

    fn tick_perp(&self, symbol: &Symbol, ts: i64) {
        let depth = self.config.depth;
        let a = self
            .book(Venue::A, Market::Perp, symbol)
            .and_then(|h| read_perp_snapshot(&h, depth));
        let b = self
            .book(Venue::B, Market::Perp, symbol)
            .and_then(|h| read_perp_snapshot(&h, depth));

        if a.is_none() && b.is_none() {
            return;
        }

        let mut candidates = Vec::new();
        let mut exchanges: HashMap<String, ExchangeMetrics> = HashMap::new();
        let mut bid_move = MoveStatsDto::default();
        let mut ask_move = MoveStatsDto::default();

        if let Some((snap, bm, am)) = &a {
            candidates.extend(detect_venue_outliers(Venue::A, Market::Perp, symbol, ts, snap, &self.mid_history));
            exchanges.insert("A".to_string(), exchange_metrics(snap, &self.config));
            bid_move = bid_move + MoveStatsDto::from(*bm);
            ask_move = ask_move + MoveStatsDto::from(*am);
        }
        if let Some((snap, bm, am)) = &b {
            candidates.extend(detect_venue_outliers(Venue::B, Market::Perp, symbol, ts, snap, &self.mid_history));
            exchanges.insert("B".to_string(), exchange_metrics(snap, &self.config));
            bid_move = bid_move + MoveStatsDto::from(*bm);
            ask_move = ask_move + MoveStatsDto::from(*am);
        }
        self.detect_and_record_outliers(candidates);

        let a_snap = a.as_ref().map(|(s, _, _)| s);
        let b_snap = b.as_ref().map(|(s, _, _)| s);

        let merged_bids = merge_levels(
            a_snap.map(|s| s.bids.as_slice()).unwrap_or(&[]),
            b_snap.map(|s| s.bids.as_slice()).unwrap_or(&[]),
            depth,
            true,
        );
        let merged_asks = merge_levels(
            a_snap.map(|s| s.asks.as_slice()).unwrap_or(&[]),
            b_snap.map(|s| s.asks.as_slice()).unwrap_or(&[]),
            depth,
            false,
        );
        let (Some(&(best_bid, _)), Some(&(best_ask, _))) = (merged_bids.first(), merged_asks.first()) else {
            return;
        };
        let mid = (best_bid + best_ask) / 2.0;

        // Large-move detection against the previous tick's merged perp book.
        // The merged spot book is not symmetrically diffed.
        let prev = {
            let mut guard = self.prev_perp_book.lock();
            let prev = guard.get(symbol).cloned().unwrap_or_default();
            guard.insert(
                symbol.clone(),
                PrevPerpBook {
                    bids: merged_bids.clone(),
                    asks: merged_asks.clone(),
                },
            );
            prev
        };

        let mut moves = detect_large_moves(
            symbol,
            Side::Bid,
            ts,
            &prev.bids,
            &merged_bids,
            mid,
            self.config.base_mm_notional,
            self.config.large_move_window_bps,
            self.config.large_move_notional_floor,
        );
        moves.extend(detect_large_moves(
            symbol,
            Side::Ask,
            ts,
            &prev.asks,
            &merged_asks,
            mid,
            self.config.base_mm_notional,
            self.config.large_move_window_bps,
            self.config.large_move_notional_floor,
        ));

        if !moves.is_empty() {
            self.large_move_store.append_all(&moves);
            let top_bid = top_by_notional(moves.iter().filter(|m| m.side == Side::Bid).cloned().collect(), 8);
            let top_ask = top_by_notional(moves.iter().filter(|m| m.side == Side::Ask).cloned().collect(), 8);
            self.broadcaster.broadcast(
                "largeMoves",
                &serde_json::json!({ "symbol": symbol.as_str(), "bid": top_bid, "ask": top_ask }),
            );
        }

        let bins = &self.config.distance_bins_bps;
        let point = MetricsPoint {
            ts,
            symbol: symbol.clone(),
            best_bid,
            best_ask,
            mid,
            depth,
            base_notional: self.config.base_mm_notional,
            bid: side_metrics(&merged_bids, mid, bins, self.config.base_mm_notional),
            ask: side_metrics(&merged_asks, mid, bins, self.config.base_mm_notional),
            distance_bins_bps: bins.clone(),
            move_stats: AggregatedMoveStats { bid: bid_move, ask: ask_move },
            exchanges,
        };

        self.metrics_store.append(point.clone());
        self.broadcaster.broadcast("metrics", &point);
        self.broadcaster.broadcast(
            "perpBook",
            &serde_json::json!({
                "symbol": symbol.as_str(),
                "mid": mid,
                "bids": merged_bids,
                "asks": merged_asks,
                "depth": depth,
                "sources": { "A": a_snap.is_some(), "B": b_snap.is_some() },
            }),
        );
    }
}

fn exchange_metrics(snap: &VenueSnapshot, config: &Config) -> ExchangeMetrics {
    let bins = &config.distance_bins_bps;
    let mut bid = side_metrics(&snap.bids, snap.mid, bins, config.base_mm_notional);
    let mut ask = side_metrics(&snap.asks, snap.mid, bins, config.base_mm_notional);
    // Per-venue blocks omit largeLevels; only the aggregated MetricsPoint carries it.
    bid.large_levels = None;
    ask.large_levels = None;
    ExchangeMetrics {
        best_bid: snap.best_bid,
        best_ask: snap.best_ask,
        mid: snap.mid,
        bid,
        ask,
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
