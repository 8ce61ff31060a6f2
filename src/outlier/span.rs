//! OutlierSpanTracker: opens a span on first sighting of an outlying level,
//! extends it while the level keeps qualifying, and closes it (emitting a
//! durable `OutlierSpan` row) the first tick it no longer does.

use crate::outlier::types::{BookSnapshot, OutlierRecord};
use crate::symbol::{Market, Side, Symbol, Venue};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SpanKey {
    symbol: Symbol,
    market: Market,
    exchange: Venue,
    side: Side,
    price_bits: u64,
}

impl SpanKey {
    fn new(symbol: &Symbol, market: Market, exchange: Venue, side: Side, price: f64) -> Self {
        Self {
            symbol: symbol.clone(),
            market,
            exchange,
            side,
            price_bits: price.to_bits(),
        }
    }

    fn price(&self) -> f64 {
        f64::from_bits(self.price_bits)
    }
}

#[derive(Debug, Clone)]
struct ActiveSpan {
    start_ts: i64,
    last_ts: i64,
    sum_z: f64,
    max_z: f64,
    count: u64,

    start_size: f64,
    last_size: f64,
    start_bps: f64,
    last_bps: f64,
    start_book: BookSnapshot,
    last_book: BookSnapshot,
    start_best_bid: f64,
    start_best_ask: f64,
    last_best_bid: f64,
    last_best_ask: f64,
    start_spread_bps: f64,
    last_spread_bps: f64,
    start_imbalance: f64,
    last_imbalance: f64,
    start_bid_depth: f64,
    last_bid_depth: f64,
    start_ask_depth: f64,
    last_ask_depth: f64,
    start_microprice: f64,
    last_microprice: f64,
    start_level_rank: usize,
    last_level_rank: usize,
    start_vol_1m: f64,
    last_vol_1m: f64,
    start_vol_5m: f64,
    last_vol_5m: f64,

    trade_buy_qty: f64,
    trade_sell_qty: f64,
    trade_count: u64,
}

impl ActiveSpan {
    fn open(r: &OutlierRecord) -> Self {
        Self {
            start_ts: r.ts,
            last_ts: r.ts,
            sum_z: r.z_score,
            max_z: r.z_score,
            count: 1,
            start_size: r.size,
            last_size: r.size,
            start_bps: r.bps_from_mid,
            last_bps: r.bps_from_mid,
            start_book: r.book_snapshot.clone(),
            last_book: r.book_snapshot.clone(),
            start_best_bid: r.best_bid,
            start_best_ask: r.best_ask,
            last_best_bid: r.best_bid,
            last_best_ask: r.best_ask,
            start_spread_bps: r.spread_bps,
            last_spread_bps: r.spread_bps,
            start_imbalance: r.imbalance,
            last_imbalance: r.imbalance,
            start_bid_depth: r.bid_depth,
            last_bid_depth: r.bid_depth,
            start_ask_depth: r.ask_depth,
            last_ask_depth: r.ask_depth,
            start_microprice: r.microprice,
            last_microprice: r.microprice,
            start_level_rank: r.level_rank,
            last_level_rank: r.level_rank,
            start_vol_1m: r.vol_1m,
            last_vol_1m: r.vol_1m,
            start_vol_5m: r.vol_5m,
            last_vol_5m: r.vol_5m,
            trade_buy_qty: 0.0,
            trade_sell_qty: 0.0,
            trade_count: 0,
        }
    }

    fn extend(&mut self, r: &OutlierRecord) {
        self.last_ts = r.ts;
        self.sum_z += r.z_score;
        self.count += 1;
        self.max_z = self.max_z.max(r.z_score);
        self.last_size = r.size;
        self.last_bps = r.bps_from_mid;
        self.last_book = r.book_snapshot.clone();
        self.last_best_bid = r.best_bid;
        self.last_best_ask = r.best_ask;
        self.last_spread_bps = r.spread_bps;
        self.last_imbalance = r.imbalance;
        self.last_bid_depth = r.bid_depth;
        self.last_ask_depth = r.ask_depth;
        self.last_microprice = r.microprice;
        self.last_level_rank = r.level_rank;
        self.last_vol_1m = r.vol_1m;
        self.last_vol_5m = r.vol_5m;
    }

    fn derived(&self, key: &SpanKey, end_ts: i64) -> OutlierSpan {
        let duration_ms = (end_ts - self.start_ts).max(0);
        let filled_pct = if self.start_size > 0.0 {
            ((self.start_size - self.last_size) / self.start_size).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let size_delta = self.last_size - self.start_size;
        let size_delta_pct = if self.start_size > 0.0 {
            size_delta / self.start_size
        } else {
            0.0
        };
        let avg_z = self.sum_z / (self.count.max(1) as f64);

        OutlierSpan {
            symbol: key.symbol.clone(),
            market: key.market,
            exchange: key.exchange,
            side: key.side,
            price: key.price(),
            start_ts: self.start_ts,
            end_ts,
            duration_ms,
            max_z: self.max_z,
            avg_z,
            count: self.count,
            start_size: self.start_size,
            end_size: self.last_size,
            filled_pct,
            start_bps: self.start_bps,
            end_bps: self.last_bps,
            start_book: self.start_book.clone(),
            end_book: self.last_book.clone(),
            start_best_bid: self.start_best_bid,
            start_best_ask: self.start_best_ask,
            end_best_bid: self.last_best_bid,
            end_best_ask: self.last_best_ask,
            start_spread_bps: self.start_spread_bps,
            end_spread_bps: self.last_spread_bps,
            start_imbalance: self.start_imbalance,
            end_imbalance: self.last_imbalance,
            start_bid_depth: self.start_bid_depth,
            end_bid_depth: self.last_bid_depth,
            start_ask_depth: self.start_ask_depth,
            end_ask_depth: self.last_ask_depth,
            start_microprice: self.start_microprice,
            end_microprice: self.last_microprice,
            start_level_rank: self.start_level_rank,
            end_level_rank: self.last_level_rank,
            start_vol_1m: self.start_vol_1m,
            end_vol_1m: self.last_vol_1m,
            start_vol_5m: self.start_vol_5m,
            end_vol_5m: self.last_vol_5m,
            size_delta,
            size_delta_pct,
            trade_buy_qty: self.trade_buy_qty,
            trade_sell_qty: self.trade_sell_qty,
            trade_count: self.trade_count,
        }
    }
}

/// A closed span row, persisted to the outlier-span store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlierSpan {
    pub symbol: Symbol,
    pub market: Market,
    pub exchange: Venue,
    pub side: Side,
    pub price: f64,
    pub start_ts: i64,
    pub end_ts: i64,
    pub duration_ms: i64,
    pub max_z: f64,
    pub avg_z: f64,
    pub count: u64,
    pub start_size: f64,
    pub end_size: f64,
    pub filled_pct: f64,
    pub start_bps: f64,
    pub end_bps: f64,
    pub start_book: BookSnapshot,
    pub end_book: BookSnapshot,
    pub start_best_bid: f64,
    pub start_best_ask: f64,
    pub end_best_bid: f64,
    pub end_best_ask: f64,
    pub start_spread_bps: f64,
    pub end_spread_bps: f64,
    pub start_imbalance: f64,
    pub end_imbalance: f64,
    pub start_bid_depth: f64,
    pub end_bid_depth: f64,
    pub start_ask_depth: f64,
    pub end_ask_depth: f64,
    pub start_microprice: f64,
    pub end_microprice: f64,
    pub start_level_rank: usize,
    pub end_level_rank: usize,
    pub start_vol_1m: f64,
    pub end_vol_1m: f64,
    pub start_vol_5m: f64,
    pub end_vol_5m: f64,
    pub size_delta: f64,
    pub size_delta_pct: f64,
    pub trade_buy_qty: f64,
    pub trade_sell_qty: f64,
    pub trade_count: u64,
}

/// Trade side as seen by the span tracker's enrichment path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

const TRADE_ENRICHMENT_BPS: f64 = 5.0;

struct Inner {
    active: HashMap<SpanKey, ActiveSpan>,
}

/// Tracks the lifetime of each outlying (symbol, market, exchange, side,
/// price) key across ticks. Touched by both the tick path and the
/// trade-feed path; a single lock serializes the two writers, which is fine
/// since contention between a 1 Hz tick and trade prints is negligible.
pub struct OutlierSpanTracker {
    inner: Mutex<Inner>,
}

impl Default for OutlierSpanTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl OutlierSpanTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                active: HashMap::new(),
            }),
        }
    }

    /// Update with this tick's candidate outlier set. Returns the spans that
    /// closed this tick (and should be appended to the outlier-span store).
    pub fn update(&self, candidates: &[OutlierRecord]) -> Vec<OutlierSpan> {
        let mut inner = self.inner.lock();
        let mut seen = std::collections::HashSet::with_capacity(candidates.len());

        for r in candidates {
            let key = SpanKey::new(&r.symbol, r.market, r.exchange, r.side, r.price);
            seen.insert(key.clone());
            match inner.active.get_mut(&key) {
                Some(active) => active.extend(r),
                None => {
                    inner.active.insert(key, ActiveSpan::open(r));
                }
            }
        }

        let stale_keys: Vec<SpanKey> = inner
            .active
            .keys()
            .filter(|k| !seen.contains(*k))
            .cloned()
            .collect();

        let mut closed = Vec::with_capacity(stale_keys.len());
        for key in stale_keys {
            if let Some(active) = inner.active.remove(&key) {
                let end_ts = active.last_ts;
                closed.push(active.derived(&key, end_ts));
            }
        }
        closed
    }

    /// Snapshot of currently-active spans, projected as if closed "now",
    /// without mutating any state.
    pub fn active_snapshot(&self, now: i64) -> Vec<OutlierSpan> {
        let inner = self.inner.lock();
        inner
            .active
            .iter()
            .map(|(key, active)| active.derived(key, now))
            .collect()
    }

    /// Credit a trade print to every active span it's within 5 bps of, on
    /// matching (symbol, market, exchange) — case-insensitive on exchange,
    /// which here means simply comparing the `Venue` enum (already
    /// normalized; no raw-string exchange names reach this layer).
    pub fn enrich_with_trade(
        &self,
        symbol: &Symbol,
        market: Market,
        exchange: Venue,
        price: f64,
        qty: f64,
        side: TradeSide,
    ) {
        let mut inner = self.inner.lock();
        for (key, active) in inner.active.iter_mut() {
            if &key.symbol != symbol || key.market != market || key.exchange != exchange {
                continue;
            }
            let span_price = key.price();
            let mid = (span_price + price) / 2.0;
            if mid <= 0.0 {
                continue;
            }
            let bps = (price - span_price).abs() / mid * 10_000.0;
            if bps > TRADE_ENRICHMENT_BPS {
                continue;
            }
            match side {
                TradeSide::Buy => active.trade_buy_qty += qty,
                TradeSide::Sell => active.trade_sell_qty += qty,
            }
            active.trade_count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ts: i64, z: f64, size: f64) -> OutlierRecord {
        OutlierRecord {
            ts,
            symbol: Symbol::new("AAABUSDT"),
            market: Market::Spot,
            exchange: Venue::A,
            side: Side::Bid,
            price: 100.0,
            size,
            z_score: z,
            bps_from_mid: 1.0,
            mid: 99.9,
            book_snapshot: "{}".to_string(),
            best_bid: 99.9,
            best_ask: 100.1,
            spread_bps: 20.0,
            imbalance: 0.1,
            bid_depth: 1000.0,
            ask_depth: 900.0,
            microprice: 100.0,
            level_rank: 1,
            vol_1m: 0.001,
            vol_5m: 0.002,
        }
    }

    #[test]
    fn open_extend_close_matches_worked_example() {
        let tracker = OutlierSpanTracker::new();

        let t0 = 1_000_000_i64;
        let opened = tracker.update(&[record(t0, 6.0, 500.0)]);
        assert!(opened.is_empty());

        let t1 = t0 + 5_000;
        let extended = tracker.update(&[record(t1, 7.0, 450.0)]);
        assert!(extended.is_empty());

        tracker.enrich_with_trade(
            &Symbol::new("AAABUSDT"),
            Market::Spot,
            Venue::A,
            100.02,
            25.0,
            TradeSide::Buy,
        );

        let closed = tracker.update(&[]);
        assert_eq!(closed.len(), 1);
        let span = &closed[0];
        assert_eq!(span.duration_ms, t1 - t0);
        assert_eq!(span.start_size, 500.0);
        assert_eq!(span.end_size, 450.0);
        assert!((span.filled_pct - 0.1).abs() < 1e-9);
        assert_eq!(span.max_z, 7.0);
        assert!((span.avg_z - 6.5).abs() < 1e-9);
        assert_eq!(span.count, 2);
        assert_eq!(span.trade_buy_qty, 25.0);
        assert_eq!(span.trade_sell_qty, 0.0);
        assert_eq!(span.trade_count, 1);
    }

    #[test]
    fn trade_beyond_five_bps_does_not_enrich() {
        let tracker = OutlierSpanTracker::new();
        tracker.update(&[record(0, 6.0, 500.0)]);

        // 100.0 -> 101.0 is ~100 bps away, well outside the 5 bps window.
        tracker.enrich_with_trade(
            &Symbol::new("AAABUSDT"),
            Market::Spot,
            Venue::A,
            101.0,
            10.0,
            TradeSide::Sell,
        );

        let closed = tracker.update(&[]);
        assert_eq!(closed[0].trade_count, 0);
        assert_eq!(closed[0].trade_sell_qty, 0.0);
    }

    #[test]
    fn active_snapshot_does_not_mutate_state() {
        let tracker = OutlierSpanTracker::new();
        tracker.update(&[record(0, 6.0, 500.0)]);

        let snap = tracker.active_snapshot(1_000);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].duration_ms, 1_000);

        // still active, not closed, after the snapshot.
        let closed = tracker.update(&[record(2_000, 6.5, 500.0)]);
        assert!(closed.is_empty());
    }
}
