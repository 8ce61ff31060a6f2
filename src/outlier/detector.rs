//! z-score outlier detection over resting depth, plus the mid-history /
//! realized-vol helper the enrichment fields need.

use crate::outlier::types::OutlierRecord;
use crate::symbol::{Market, Side, Symbol, Venue};
use statrs::statistics::Statistics;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

pub const Z_OUTLIER: f64 = 5.0;
pub const Z_METRICS: f64 = 4.0;

const MID_HISTORY_RETENTION_MS: i64 = 5 * 60 * 1000;
const VOL_1M_WINDOW_MS: i64 = 60 * 1000;
const VOL_5M_WINDOW_MS: i64 = 5 * 60 * 1000;

/// Per-(venue, symbol) rolling mid-price history, retained for 5 minutes.
#[derive(Debug, Default)]
pub struct MidHistory {
    points: VecDeque<(i64, f64)>,
}

impl MidHistory {
    pub fn push(&mut self, ts: i64, mid: f64) {
        self.points.push_back((ts, mid));
        let cutoff = ts - MID_HISTORY_RETENTION_MS;
        while matches!(self.points.front(), Some((t, _)) if *t < cutoff) {
            self.points.pop_front();
        }
    }

    /// `sqrt(sum(ln(mid_i/mid_{i-1})^2) / (n-1))` over points within the
    /// window ending at `now`.
    pub fn realized_vol(&self, now: i64, window_ms: i64) -> f64 {
        let cutoff = now - window_ms;
        let windowed: Vec<f64> = self
            .points
            .iter()
            .filter(|(t, _)| *t >= cutoff)
            .map(|(_, m)| *m)
            .collect();

        if windowed.len() < 2 {
            return 0.0;
        }

        let sum_sq: f64 = windowed
            .windows(2)
            .map(|w| (w[1] / w[0]).ln().powi(2))
            .sum();

        (sum_sq / (windowed.len() as f64 - 1.0)).sqrt()
    }
}

/// Thread-shared registry of mid histories keyed by (venue, symbol).
#[derive(Clone, Default)]
pub struct MidHistoryStore {
    histories: Arc<dashmap::DashMap<(Venue, Symbol), Mutex<MidHistory>>>,
}

impl MidHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tick(&self, venue: Venue, symbol: &Symbol, ts: i64, mid: f64) {
        self.histories
            .entry((venue, symbol.clone()))
            .or_default()
            .lock()
            .push(ts, mid);
    }

    pub fn vols(&self, venue: Venue, symbol: &Symbol, now: i64) -> (f64, f64) {
        let Some(entry) = self.histories.get(&(venue, symbol.clone())) else {
            return (0.0, 0.0);
        };
        let hist = entry.lock();
        (
            hist.realized_vol(now, VOL_1M_WINDOW_MS),
            hist.realized_vol(now, VOL_5M_WINDOW_MS),
        )
    }
}

/// Population mean/stddev z-scores for a slice of sizes. Returns `None` when
/// `sigma == 0` (no variance, e.g. a single level or all-equal sizes).
pub fn zscores(sizes: &[f64]) -> Option<Vec<f64>> {
    if sizes.is_empty() {
        return None;
    }
    let mu = sizes.mean();
    let sigma = sizes.population_std_dev();
    if sigma == 0.0 {
        return None;
    }
    Some(sizes.iter().map(|s| (s - mu) / sigma).collect())
}

/// Count of levels with `z >= threshold`, or 0 if `sigma == 0`/side empty.
/// Used for both `Z_OUTLIER` (full enrichment) and `Z_METRICS` (the
/// `outlierCount{Bid,Ask}` summary field on `MetricsPoint`).
pub fn count_outliers(sizes: &[f64], threshold: f64) -> u64 {
    match zscores(sizes) {
        Some(zs) => zs.iter().filter(|&&z| z >= threshold).count() as u64,
        None => 0,
    }
}

/// Inputs needed to detect and enrich outliers for one venue's book on one
/// tick.
pub struct VenueBookSnapshot<'a> {
    pub venue: Venue,
    pub symbol: &'a Symbol,
    pub market: Market,
    pub ts: i64,
    pub mid: f64,
    pub best_bid: f64,
    pub best_ask: f64,
    /// Top-20 levels of this venue's book, already sorted (desc for bids,
    /// asc for asks).
    pub top20_bids: &'a [(f64, f64)],
    pub top20_asks: &'a [(f64, f64)],
    pub book_snapshot_json: String,
}

/// Run z-score detection on one side of a venue's book, using enrichment
/// computed over the venue's top-20.
pub fn detect_side(
    snapshot: &VenueBookSnapshot<'_>,
    side: Side,
    mid_history: &MidHistoryStore,
) -> Vec<OutlierRecord> {
    if snapshot.mid <= 0.0 {
        return Vec::new();
    }

    let levels: &[(f64, f64)] = match side {
        Side::Bid => snapshot.top20_bids,
        Side::Ask => snapshot.top20_asks,
    };
    if levels.is_empty() {
        return Vec::new();
    }

    let sizes: Vec<f64> = levels.iter().map(|(_, s)| *s).collect();
    let Some(zs) = zscores(&sizes) else {
        return Vec::new();
    };

    let bid_depth: f64 = snapshot.top20_bids.iter().map(|(_, s)| s).sum();
    let ask_depth: f64 = snapshot.top20_asks.iter().map(|(_, s)| s).sum();
    let imbalance = if bid_depth + ask_depth > 0.0 {
        (bid_depth - ask_depth) / (bid_depth + ask_depth)
    } else {
        0.0
    };
    let spread_bps = (snapshot.best_ask - snapshot.best_bid) / snapshot.mid * 10_000.0;

    let best_bid_size = snapshot.top20_bids.first().map(|(_, s)| *s).unwrap_or(0.0);
    let best_ask_size = snapshot.top20_asks.first().map(|(_, s)| *s).unwrap_or(0.0);
    let microprice = if best_bid_size + best_ask_size > 0.0 {
        (snapshot.best_ask * best_bid_size + snapshot.best_bid * best_ask_size)
            / (best_bid_size + best_ask_size)
    } else {
        snapshot.mid
    };

    let (vol_1m, vol_5m) = mid_history.vols(snapshot.venue, snapshot.symbol, snapshot.ts);

    levels
        .iter()
        .zip(zs.iter())
        .enumerate()
        .filter(|(_, ((_, _), z))| **z >= Z_OUTLIER)
        .map(|(idx, (&(price, size), &z))| OutlierRecord {
            ts: snapshot.ts,
            symbol: snapshot.symbol.clone(),
            market: snapshot.market,
            exchange: snapshot.venue,
            side,
            price,
            size,
            z_score: z,
            bps_from_mid: (price - snapshot.mid).abs() / snapshot.mid * 10_000.0,
            mid: snapshot.mid,
            book_snapshot: snapshot.book_snapshot_json.clone(),
            best_bid: snapshot.best_bid,
            best_ask: snapshot.best_ask,
            spread_bps,
            imbalance,
            bid_depth,
            ask_depth,
            microprice,
            level_rank: idx + 1,
            vol_1m,
            vol_5m,
        })
        .collect()
}

pub fn detect_outliers(
    snapshot: &VenueBookSnapshot<'_>,
    mid_history: &MidHistoryStore,
) -> Vec<OutlierRecord> {
    let mut out = detect_side(snapshot, Side::Bid, mid_history);
    out.extend(detect_side(snapshot, Side::Ask, mid_history));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zscore_example_scenario_three_finds_no_outliers() {
        let sizes = vec![10.0, 10.0, 10.0, 10.0, 1000.0];
        let zs = zscores(&sizes).unwrap();
        let max_z = zs.iter().cloned().fold(f64::MIN, f64::max);
        assert!((max_z - 2.0).abs() < 0.1, "max_z was {max_z}");
        assert_eq!(count_outliers(&sizes, Z_OUTLIER), 0);

        let sizes2 = vec![1.0, 1.0, 1.0, 1.0, 100.0];
        assert_eq!(count_outliers(&sizes2, Z_OUTLIER), 0);

        let sizes3 = vec![1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1000.0];
        assert_eq!(count_outliers(&sizes3, Z_OUTLIER), 0);
    }

    #[test]
    fn single_level_side_has_zero_sigma_and_no_outliers() {
        let sizes = vec![42.0];
        assert!(zscores(&sizes).is_none());
        assert_eq!(count_outliers(&sizes, Z_OUTLIER), 0);
    }

    #[test]
    fn mid_history_realized_vol_needs_two_points() {
        let mut hist = MidHistory::default();
        hist.push(0, 100.0);
        assert_eq!(hist.realized_vol(0, VOL_1M_WINDOW_MS), 0.0);
        hist.push(1000, 101.0);
        assert!(hist.realized_vol(1000, VOL_1M_WINDOW_MS) > 0.0);
    }

    #[test]
    fn mid_history_prunes_beyond_retention() {
        let mut hist = MidHistory::default();
        hist.push(0, 100.0);
        hist.push(MID_HISTORY_RETENTION_MS + 1, 100.0);
        assert_eq!(hist.points.len(), 1);
    }
}
