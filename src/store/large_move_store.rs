//! Durable store for qualifying `LevelMove` rows. `append_all` batches the
//! full qualifying set from one tick; the broadcast only carries the top 8
//! per side. Retention 24h.

use crate::error::StoreError;
use crate::metrics::types::LevelMove;
use crate::store::{support, RowFilter, RETENTION_24H_MS};
use parking_lot::RwLock;
use rusqlite::params;
use std::collections::VecDeque;
use std::sync::Arc;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS large_moves (
    ts INTEGER NOT NULL,
    symbol TEXT NOT NULL,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_large_moves_ts ON large_moves(ts);
CREATE INDEX IF NOT EXISTS idx_large_moves_symbol_ts ON large_moves(symbol, ts);
";

#[derive(Clone)]
pub struct LargeMoveStore {
    conn: support::SharedConn,
    cache: Arc<RwLock<VecDeque<LevelMove>>>,
    retention_ms: i64,
}

impl LargeMoveStore {
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
            conn.prepare("SELECT data FROM large_moves WHERE ts >= ?1 ORDER BY ts ASC")?;
        let rows = stmt.query_map(params![cutoff], |row| row.get::<_, String>(0))?;
        let mut cache = self.cache.write();
        for row in rows {
            let Ok(json) = row else { continue };
            if let Ok(mv) = serde_json::from_str::<LevelMove>(&json) {
                cache.push_back(mv);
            }
        }
        Ok(())
    }

    pub fn append_all(&self, moves: &[LevelMove]) {
        if moves.is_empty() {
            return;
        }
        {
            let mut conn = self.conn.lock();
            let tx = match conn.transaction() {
                Ok(tx) => tx,
                Err(e) => panic!("large-move store transaction failed: {e}"),
            };
            for mv in moves {
                let json = serde_json::to_string(mv).expect("LevelMove always serializes");
                if let Err(e) = tx.execute(
                    "INSERT INTO large_moves (ts, symbol, data) VALUES (?1, ?2, ?3)",
                    params![mv.ts, mv.symbol.as_str(), json],
                ) {
                    panic!("large-move store write failed: {e}");
                }
            }
            if let Err(e) = tx.commit() {
                panic!("large-move store commit failed: {e}");
            }
        }

        let mut cache = self.cache.write();
        let max_ts = moves.iter().map(|m| m.ts).max().unwrap_or(0);
        cache.extend(moves.iter().cloned());
        drop(cache);
        self.prune(max_ts);
    }

    pub fn prune(&self, now: i64) {
        support::prune_cache(&mut self.cache.write(), now, self.retention_ms, |m| m.ts);
        let conn = self.conn.lock();
        if let Err(e) = support::prune_db(&conn, "large_moves", "ts", now, self.retention_ms) {
            tracing::warn!(error = %e, "large-move store prune failed");
        }
    }

    pub fn get_history(&self, limit: usize, filter: &RowFilter) -> Vec<LevelMove> {
        let cache = self.cache.read();
        let filtered: VecDeque<LevelMove> = cache
            .iter()
            .filter(|m| filter.matches(m.symbol.as_str(), None, None))
            .cloned()
            .collect();
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
    use crate::symbol::{Side, Symbol};

    fn mv(ts: i64) -> LevelMove {
        LevelMove {
            ts,
            symbol: Symbol::new("AAABUSDT"),
            side: Side::Ask,
            price: 101.0,
            prev_size: 50.0,
            next_size: 500.0,
            delta_size: 450.0,
            notional_delta: 45_450.0,
            bps_from_mid: 100.0,
        }
    }

    #[test]
    fn append_all_persists_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let conn = support::open_shared(&dir.path().join("monitor.db")).unwrap();
        let store = LargeMoveStore::open(conn).unwrap();
        store.append_all(&[mv(1), mv(2)]);
        let history = store.get_history(10, &RowFilter::default());
        assert_eq!(history.len(), 2);
    }
}
