//! Durable store for `MetricsPoint` rows. Retention 24h.

use crate::error::StoreError;
use crate::metrics::types::MetricsPoint;
use crate::store::{support, RETENTION_24H_MS};
use parking_lot::RwLock;
use rusqlite::params;
use std::collections::VecDeque;
use std::sync::Arc;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS metrics (
    ts INTEGER NOT NULL,
    symbol TEXT NOT NULL,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_metrics_ts ON metrics(ts);
CREATE INDEX IF NOT EXISTS idx_metrics_symbol_ts ON metrics(symbol, ts);
";

#[derive(Clone)]
pub struct MetricsStore {
    conn: support::SharedConn,
    cache: Arc<RwLock<VecDeque<MetricsPoint>>>,
    retention_ms: i64,
}

impl MetricsStore {
    /// `conn` is the connection shared by every store (spec §6: one
    /// database file for the whole process); this only adds its own table.
    pub fn open(conn: support::SharedConn) -> Result<Self, StoreError> {
        support::init_schema(&conn.lock(), SCHEMA)?;
        let store = Self {
            conn,
            cache: Arc::new(RwLock::new(VecDeque::new())),
            retention_ms: RETENTION_24H_MS,
        };
        store.load_existing()?;
        Ok(store)
    }

    fn load_existing(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let cutoff = now_ms() - self.retention_ms;
        let mut stmt =
            conn.prepare("SELECT data FROM metrics WHERE ts >= ?1 ORDER BY ts ASC")?;
        let rows = stmt.query_map(params![cutoff], |row| row.get::<_, String>(0))?;
        let mut cache = self.cache.write();
        for row in rows {
            let Ok(json) = row else { continue };
            match serde_json::from_str::<MetricsPoint>(&json) {
                Ok(point) => cache.push_back(point),
                Err(_) => continue, // invalid row in persisted cache: skip, never crash
            }
        }
        Ok(())
    }

    pub fn append(&self, point: MetricsPoint) {
        let ts = point.ts;
        let symbol = point.symbol.as_str().to_string();
        let json = match serde_json::to_string(&point) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize MetricsPoint, dropping write");
                return;
            }
        };

        {
            let conn = self.conn.lock();
            if let Err(e) = conn.execute(
                "INSERT INTO metrics (ts, symbol, data) VALUES (?1, ?2, ?3)",
                params![ts, symbol, json],
            ) {
                // Store write failure is fatal: data loss here is not
                // recoverable within the process.
                panic!("metrics store write failed: {e}");
            }
        }

        self.cache.write().push_back(point);
        self.prune(ts);
    }

    pub fn prune(&self, now: i64) {
        support::prune_cache(&mut self.cache.write(), now, self.retention_ms, |p| p.ts);
        let conn = self.conn.lock();
        if let Err(e) = support::prune_db(&conn, "metrics", "ts", now, self.retention_ms) {
            tracing::warn!(error = %e, "metrics store prune failed");
        }
    }

    pub fn get_history(&self, limit: usize, symbol: Option<&str>) -> Vec<MetricsPoint> {
        let cache = self.cache.read();
        let filtered: VecDeque<MetricsPoint> = match symbol {
            Some(sym) => cache
                .iter()
                .filter(|p| p.symbol.as_str() == sym)
                .cloned()
                .collect(),
            None => cache.clone(),
        };
        support::tail(&filtered, limit)
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::types::{AggregatedMoveStats, SideMetrics};
    use crate::symbol::Symbol;
    use std::collections::HashMap;

    fn point(ts: i64, symbol: &str) -> MetricsPoint {
        MetricsPoint {
            ts,
            symbol: Symbol::new(symbol),
            best_bid: 99.0,
            best_ask: 101.0,
            mid: 100.0,
            depth: 50,
            base_notional: 30_000.0,
            bid: SideMetrics::empty(6),
            ask: SideMetrics::empty(6),
            distance_bins_bps: vec![5.0, 10.0, 25.0, 50.0, 100.0, 200.0],
            move_stats: AggregatedMoveStats::default(),
            exchanges: HashMap::new(),
        }
    }

    #[test]
    fn retention_prune_drops_stale_rows_from_cache_and_db() {
        let dir = tempfile::tempdir().unwrap();
        let conn = support::open_shared(&dir.path().join("monitor.db")).unwrap();
        let store = MetricsStore::open(conn).unwrap();

        let now = 100_000_000_i64;
        store.append(point(now - 25 * 60 * 60 * 1000, "AAABUSDT"));
        store.append(point(now - 23 * 60 * 60 * 1000, "AAABUSDT"));
        store.append(point(now, "AAABUSDT"));

        let history = store.get_history(10, None);
        assert_eq!(history.len(), 2);

        let conn = store.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM metrics", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn get_history_respects_limit_and_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let conn = support::open_shared(&dir.path().join("monitor.db")).unwrap();
        let store = MetricsStore::open(conn).unwrap();

        for i in 0..5 {
            store.append(point(1_000_000_000_000 + i, "AAABUSDT"));
        }
        let history = store.get_history(3, None);
        assert_eq!(history.len(), 3);
        assert!(history[0].ts < history[1].ts);
        assert!(history[1].ts < history[2].ts);
    }
}
