//! Pure book → metrics computations: venue merging, per-side aggregates,
//! and large-move qualification.

use crate::metrics::types::{LargeLevel, LevelMove, SideMetrics};
use crate::outlier::detector::{count_outliers, Z_METRICS};
use crate::symbol::{Side, Symbol};

/// Combine two venues' top-N levels for one side by summing size at equal
/// price, then re-sort and truncate to `depth`.
pub fn merge_levels(a: &[(f64, f64)], b: &[(f64, f64)], depth: usize, descending: bool) -> Vec<(f64, f64)> {
    let mut merged: std::collections::BTreeMap<u64, (f64, f64)> = std::collections::BTreeMap::new();
    for &(price, size) in a.iter().chain(b.iter()) {
        let entry = merged.entry(price.to_bits()).or_insert((price, 0.0));
        entry.1 += size;
    }
    let mut levels: Vec<(f64, f64)> = merged.into_values().collect();
    if descending {
        levels.sort_by(|x, y| y.0.total_cmp(&x.0));
    } else {
        levels.sort_by(|x, y| x.0.total_cmp(&y.0));
    }
    levels.truncate(depth);
    levels
}

/// Per-side aggregate (`SideMetrics`) over already-sorted top-N `levels`.
/// `bins` are ascending distance-bps thresholds; `distanceBinCounts` has
/// `bins.len() + 1` buckets, the last catching everything past the final
/// threshold.
pub fn side_metrics(levels: &[(f64, f64)], mid: f64, bins: &[f64], base_notional: f64) -> SideMetrics {
    let mut m = SideMetrics::empty(bins.len());
    if levels.is_empty() || mid <= 0.0 {
        return m;
    }

    let mut max_bps = 0.0_f64;
    let mut sum_bps = 0.0_f64;

    for &(price, size) in levels {
        let notional = price * size;
        m.total_notional += notional;

        let bps = (price - mid).abs() / mid * 10_000.0;
        max_bps = max_bps.max(bps);
        sum_bps += bps;

        let bucket = bins.iter().position(|&b| bps <= b).unwrap_or(bins.len());
        m.distance_bin_counts[bucket] += 1;
    }

    m.max_distance_bps = max_bps;
    m.avg_distance_bps = sum_bps / levels.len() as f64;

    let sizes: Vec<f64> = levels.iter().map(|(_, s)| *s).collect();
    m.outlier_count = count_outliers(&sizes, Z_METRICS);

    let mut large: Vec<LargeLevel> = levels
        .iter()
        .map(|&(price, size)| (price, size, price * size))
        .filter(|(_, _, notional)| *notional >= base_notional)
        .map(|(price, size, notional)| LargeLevel { price, size, notional })
        .collect();
    large.sort_by(|a, b| b.notional.total_cmp(&a.notional));
    large.truncate(5);
    m.large_levels = Some(large);

    m
}

/// Large-move detection between two consecutive merged books for one side.
pub fn detect_large_moves(
    symbol: &Symbol,
    side: Side,
    ts: i64,
    prev: &[(f64, f64)],
    next: &[(f64, f64)],
    mid: f64,
    base_mm_notional: f64,
    large_move_window_bps: f64,
    large_move_notional_floor: f64,
) -> Vec<LevelMove> {
    if mid <= 0.0 {
        return Vec::new();
    }

    let prev_by_price: std::collections::HashMap<u64, f64> =
        prev.iter().map(|&(p, s)| (p.to_bits(), s)).collect();

    let window_levels = next
        .iter()
        .filter(|&&(price, _)| (price - mid).abs() / mid * 10_000.0 <= large_move_window_bps)
        .count()
        .max(1);
    let scaled_notional = base_mm_notional / window_levels as f64;
    let min_notional = scaled_notional.max(large_move_notional_floor);

    next.iter()
        .filter_map(|&(price, next_size)| {
            let prev_size = prev_by_price.get(&price.to_bits()).copied().unwrap_or(0.0);
            let delta_size = next_size - prev_size;
            if delta_size == 0.0 {
                return None;
            }
            let notional_delta = delta_size.abs() * price;
            if notional_delta < min_notional {
                return None;
            }
            Some(LevelMove {
                ts,
                symbol: symbol.clone(),
                side,
                price,
                prev_size,
                next_size,
                delta_size,
                notional_delta,
                bps_from_mid: (price - mid).abs() / mid * 10_000.0,
            })
        })
        .collect()
}

/// Keep the top `n` by `|notionalDelta|` for broadcast; callers persist the
/// full qualifying set separately.
pub fn top_by_notional(mut moves: Vec<LevelMove>, n: usize) -> Vec<LevelMove> {
    moves.sort_by(|a, b| b.notional_delta.total_cmp(&a.notional_delta));
    moves.truncate(n);
    moves
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_sums_equal_price_levels() {
        let a = vec![(100.0, 1.0), (99.0, 2.0)];
        let b = vec![(100.0, 3.0), (98.0, 1.0)];
        let merged = merge_levels(&a, &b, 10, true);
        assert_eq!(merged, vec![(100.0, 4.0), (99.0, 2.0), (98.0, 1.0)]);
    }

    #[test]
    fn large_move_worked_example() {
        let symbol = Symbol::new("AAABUSDT");
        let prev = vec![(101.0, 50.0)];

        let next_below = vec![(101.0, 200.0)];
        let below = detect_large_moves(
            &symbol, Side::Ask, 0, &prev, &next_below, 100.0, 30_000.0, 200.0, 2_000.0,
        );
        assert!(below.is_empty(), "15150 notional should not qualify");

        let next_above = vec![(101.0, 500.0)];
        let above = detect_large_moves(
            &symbol, Side::Ask, 0, &prev, &next_above, 100.0, 30_000.0, 200.0, 2_000.0,
        );
        assert_eq!(above.len(), 1);
        assert_eq!(above[0].delta_size, 450.0);
        assert!((above[0].notional_delta - 45_450.0).abs() < 1e-6);
        assert!((above[0].bps_from_mid - 100.0).abs() < 1e-6);
    }

    #[test]
    fn single_level_side_has_one_bin_increment() {
        let levels = vec![(101.0, 10.0)];
        let metrics = side_metrics(&levels, 100.0, &[50.0, 100.0], 1_000_000.0);
        let total: u64 = metrics.distance_bin_counts.iter().sum();
        assert_eq!(total, 1);
    }
}
