//! `MetricsPoint` and friends.

use crate::book::state::MoveStats;
use crate::symbol::Symbol;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single large resting level (notional >= baseMmNotional), sorted desc by
/// notional, capped at 5 per side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LargeLevel {
    pub price: f64,
    pub size: f64,
    pub notional: f64,
}

/// Per-side aggregates within one `MetricsPoint` (or one venue's `ExchangeMetrics`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideMetrics {
    pub total_notional: f64,
    pub distance_bin_counts: Vec<u64>,
    pub max_distance_bps: f64,
    pub avg_distance_bps: f64,
    pub outlier_count: u64,
    /// Present on the aggregated `MetricsPoint` only, absent on per-venue
    /// `ExchangeMetrics` blocks.
    pub large_levels: Option<Vec<LargeLevel>>,
}

impl SideMetrics {
    pub fn empty(n_bins: usize) -> Self {
        Self {
            total_notional: 0.0,
            distance_bin_counts: vec![0; n_bins + 1],
            max_distance_bps: 0.0,
            avg_distance_bps: 0.0,
            outlier_count: 0,
            large_levels: None,
        }
    }
}

/// Per-venue metrics block embedded in `exchanges` (no `largeLevels`, no
/// `moveStats`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeMetrics {
    pub best_bid: f64,
    pub best_ask: f64,
    pub mid: f64,
    pub bid: SideMetrics,
    pub ask: SideMetrics,
}

/// Bid+ask move counters aggregated over a tick, derived from two
/// `LevelTracker::snapshot_and_reset()` calls merged together.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct AggregatedMoveStats {
    pub bid: MoveStatsDto,
    pub ask: MoveStatsDto,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct MoveStatsDto {
    pub adds: u64,
    pub changes: u64,
    pub removals: u64,
    pub size_delta: f64,
}

impl From<MoveStats> for MoveStatsDto {
    fn from(m: MoveStats) -> Self {
        Self {
            adds: m.adds,
            changes: m.changes,
            removals: m.removals,
            size_delta: m.size_delta,
        }
    }
}

impl std::ops::Add for MoveStatsDto {
    type Output = MoveStatsDto;

    fn add(self, rhs: MoveStatsDto) -> MoveStatsDto {
        MoveStatsDto {
            adds: self.adds + rhs.adds,
            changes: self.changes + rhs.changes,
            removals: self.removals + rhs.removals,
            size_delta: self.size_delta + rhs.size_delta,
        }
    }
}

/// One `MetricsPoint` per symbol per tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsPoint {
    pub ts: i64,
    pub symbol: Symbol,
    pub best_bid: f64,
    pub best_ask: f64,
    pub mid: f64,
    pub depth: usize,
    pub base_notional: f64,
    pub bid: SideMetrics,
    pub ask: SideMetrics,
    pub distance_bins_bps: Vec<f64>,
    pub move_stats: AggregatedMoveStats,
    pub exchanges: HashMap<String, ExchangeMetrics>,
}

/// `LevelMove` — a qualifying large move between two consecutive merged
/// books.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelMove {
    pub ts: i64,
    pub symbol: Symbol,
    pub side: crate::symbol::Side,
    pub price: f64,
    pub prev_size: f64,
    pub next_size: f64,
    pub delta_size: f64,
    pub notional_delta: f64,
    pub bps_from_mid: f64,
}
