//! Per-book mutable state: `{price -> size}` for each side, plus the
//! adds/changes/removals counters a tick needs to compute `MoveStats`.

use std::cmp::Ordering;
use std::collections::BTreeMap;

/// `f64` price wrapper with a total order, so it can key a `BTreeMap`.
/// Prices arriving from venue feeds are always finite; `total_cmp` gives us
/// a well-defined order even if that assumption is ever violated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Price(pub f64);

impl Eq for Price {}

impl PartialOrd for Price {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Price {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Per-side adds/changes/removals/size-delta counters, reset on snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct MoveStats {
    pub adds: u64,
    pub changes: u64,
    pub removals: u64,
    pub size_delta: f64,
}

impl MoveStats {
    fn record_add(&mut self, new_size: f64) {
        self.adds += 1;
        self.size_delta += new_size;
    }

    fn record_change(&mut self, prev_size: f64, new_size: f64) {
        self.changes += 1;
        self.size_delta += (new_size - prev_size).abs();
    }

    fn record_removal(&mut self, prev_size: f64) {
        self.removals += 1;
        self.size_delta += prev_size;
    }
}

/// Combined bid/ask move counters for one tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct LevelTracker {
    pub bid: MoveStats,
    pub ask: MoveStats,
}

impl LevelTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn stats_mut(&mut self, side: Side) -> &mut MoveStats {
        match side {
            Side::Bid => &mut self.bid,
            Side::Ask => &mut self.ask,
        }
    }

    /// Record a level transition. `prev_size` is `None` when the price was
    /// not previously present (or its previous size is unknown to the
    /// caller); `new_size` of `0.0` means deletion.
    pub fn record(&mut self, side: Side, prev_size: Option<f64>, new_size: f64) {
        let stats = self.stats_mut(side);
        match (prev_size, new_size) {
            (None, 0.0) => {
                // deleting a price that wasn't present: no-op, no event.
            }
            (None, new) => stats.record_add(new),
            (Some(prev), 0.0) => stats.record_removal(prev),
            (Some(prev), new) if prev == new => {
                // replacing with the same size: no event.
                let _ = prev;
            }
            (Some(prev), new) => stats.record_change(prev, new),
        }
    }

    /// Snapshot the counters and reset them to zero for the next tick.
    pub fn snapshot_and_reset(&mut self) -> LevelTracker {
        std::mem::take(self)
    }
}

use crate::symbol::Side;

/// Mutable `{price -> size}` book for one side. Invariant: every entry has
/// `size > 0`; a `size <= 0` update removes the entry.
#[derive(Debug, Clone, Default)]
pub struct BookSide {
    levels: BTreeMap<Price, f64>,
}

impl BookSide {
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn get(&self, price: f64) -> Option<f64> {
        self.levels.get(&Price(price)).copied()
    }

    /// Apply `size` at `price`; `size <= 0.0` deletes the level. Returns the
    /// previous size, if any, so the caller can feed the `LevelTracker`.
    pub fn apply(&mut self, price: f64, size: f64) -> Option<f64> {
        if size <= 0.0 {
            self.levels.remove(&Price(price))
        } else {
            self.levels.insert(Price(price), size)
        }
    }

    /// Bids sorted descending by price; asks sorted ascending, truncated to
    /// `depth`.
    pub fn top_n(&self, depth: usize, descending: bool) -> Vec<(f64, f64)> {
        let mut levels: Vec<(f64, f64)> = self.levels.iter().map(|(p, s)| (p.0, *s)).collect();
        if descending {
            levels.sort_by(|a, b| b.0.total_cmp(&a.0));
        } else {
            levels.sort_by(|a, b| a.0.total_cmp(&b.0));
        }
        levels.truncate(depth);
        levels
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.levels.iter().map(|(p, s)| (p.0, *s))
    }
}

/// Full per-venue-per-market book state, owned exclusively by its feed loop.
#[derive(Debug, Clone, Default)]
pub struct BookState {
    pub bids: BookSide,
    pub asks: BookSide,
    pub tracker: LevelTracker,
    pub last_update_id: u64,
    pub last_update_ts: i64,
}

impl BookState {
    pub fn new() -> Self {
        Self::default()
    }

    fn side_mut(&mut self, side: Side) -> &mut BookSide {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    /// Apply a single `(price, size)` update from an incremental feed
    /// (`size == 0.0` deletes), recording the transition in the tracker.
    pub fn apply_update(&mut self, side: Side, price: f64, size: f64) {
        let prev = self.side_mut(side).apply(price, size);
        self.tracker.record(side, prev, size);
    }

    /// Replace a side wholesale with a full snapshot, diffing against the
    /// previous state: set new/changed levels, and emit a removal to the
    /// tracker for every previously-known price absent from the snapshot.
    pub fn apply_snapshot(&mut self, side: Side, levels: &[(f64, f64)]) {
        let incoming: std::collections::HashSet<u64> =
            levels.iter().map(|(p, _)| p.to_bits()).collect();

        let removed_prices: Vec<f64> = self
            .side_mut(side)
            .iter()
            .map(|(p, _)| p)
            .filter(|p| !incoming.contains(&p.to_bits()))
            .collect();

        for price in removed_prices {
            self.apply_update(side, price, 0.0);
        }

        for &(price, size) in levels {
            self.apply_update(side, price, size);
        }
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.top_n(1, true).first().map(|(p, _)| *p)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.top_n(1, false).first().map(|(p, _)| *p)
    }

    pub fn mid(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bb), Some(ba)) => Some((bb + ba) / 2.0),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_then_delete() {
        let mut book = BookState::new();
        book.apply_update(Side::Bid, 100.0, 2.0);
        book.apply_update(Side::Bid, 101.0, 1.0);

        assert_eq!(book.bids.top_n(10, true), vec![(101.0, 1.0), (100.0, 2.0)]);
        assert_eq!(book.tracker.bid.adds, 2);
        assert_eq!(book.tracker.bid.size_delta, 3.0);

        book.apply_update(Side::Bid, 100.0, 0.0);
        assert_eq!(book.bids.top_n(10, true), vec![(101.0, 1.0)]);
        assert_eq!(book.tracker.bid.removals, 1);
        assert_eq!(book.tracker.bid.size_delta, 5.0);
    }

    #[test]
    fn delete_of_absent_price_is_noop() {
        let mut book = BookState::new();
        book.apply_update(Side::Bid, 100.0, 0.0);
        assert_eq!(book.tracker.bid.adds, 0);
        assert_eq!(book.tracker.bid.removals, 0);
        assert_eq!(book.tracker.bid.changes, 0);
    }

    #[test]
    fn replacing_with_same_size_is_noop() {
        let mut book = BookState::new();
        book.apply_update(Side::Bid, 100.0, 2.0);
        book.apply_update(Side::Bid, 100.0, 2.0);
        assert_eq!(book.tracker.bid.adds, 1);
        assert_eq!(book.tracker.bid.changes, 0);
    }

    #[test]
    fn snapshot_diff_adds_changes_removes() {
        let mut book = BookState::new();
        book.apply_update(Side::Bid, 100.0, 1.0);
        book.apply_update(Side::Bid, 99.0, 2.0);
        book.tracker.snapshot_and_reset();

        book.apply_snapshot(Side::Bid, &[(100.0, 3.0), (98.0, 1.0)]);

        let levels = book.bids.top_n(10, true);
        assert_eq!(levels, vec![(100.0, 3.0), (98.0, 1.0)]);
        assert_eq!(book.tracker.bid.changes, 1);
        assert_eq!(book.tracker.bid.adds, 1);
        assert_eq!(book.tracker.bid.removals, 1);
    }

    #[test]
    fn level_tracker_snapshot_resets() {
        let mut tracker = LevelTracker::new();
        tracker.record(Side::Bid, None, 5.0);
        let snap = tracker.snapshot_and_reset();
        assert_eq!(snap.bid.adds, 1);
        assert_eq!(tracker.bid.adds, 0);
    }
}
