//! Durable store for open-interest/funding ticks. Retention 24h.

use crate::error::StoreError;
use crate::feed::types::OiFundingTick;
use crate::store::{support, RowFilter, RETENTION_24H_MS};
use parking_lot::RwLock;
use rusqlite::params;
use std::collections::VecDeque;
use std::sync::Arc;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS oi_funding (
    ts INTEGER NOT NULL,
    symbol TEXT NOT NULL,
    market TEXT NOT NULL,
    exchange TEXT NOT NULL,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_oi_funding_ts ON oi_funding(ts);
CREATE INDEX IF NOT EXISTS idx_oi_funding_symbol_ts ON oi_funding(symbol, ts);
";

#[derive(Clone)]
pub struct OiFundingStore {
    conn: support::SharedConn,
    cache: Arc<RwLock<VecDeque<OiFundingTick>>>,
    retention_ms: i64,
}

impl OiFundingStore {
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
            conn.prepare("SELECT data FROM oi_funding WHERE ts >= ?1 ORDER BY ts ASC")?;
        let rows = stmt.query_map(params![cutoff], |row| row.get::<_, String>(0))?;
        let mut cache = self.cache.write();
        for row in rows {
            let Ok(json) = row else { continue };
            if let Ok(tick) = serde_json::from_str::<OiFundingTick>(&json) {
                cache.push_back(tick);
            }
        }
        Ok(())
    }

    pub fn append(&self, tick: OiFundingTick) {
        let json = match serde_json::to_string(&tick) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize oi/funding tick, dropping write");
                return;
            }
        };
        {
            let conn = self.conn.lock();
            if let Err(e) = conn.execute(
                "INSERT INTO oi_funding (ts, symbol, market, exchange, data) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    tick.ts,
                    tick.symbol.as_str(),
                    tick.market.as_str(),
                    tick.exchange.as_str(),
                    json
                ],
            ) {
                panic!("oi/funding store write failed: {e}");
            }
        }
        let ts = tick.ts;
        self.cache.write().push_back(tick);
        self.prune(ts);
    }

    pub fn prune(&self, now: i64) {
        support::prune_cache(&mut self.cache.write(), now, self.retention_ms, |t| t.ts);
        let conn = self.conn.lock();
        if let Err(e) = support::prune_db(&conn, "oi_funding", "ts", now, self.retention_ms) {
            tracing::warn!(error = %e, "oi/funding store prune failed");
        }
    }

    pub fn get_history(&self, limit: usize, filter: &RowFilter) -> Vec<OiFundingTick> {
        let cache = self.cache.read();
        let filtered: VecDeque<OiFundingTick> = cache
            .iter()
            .filter(|t| {
                filter.matches(
                    t.symbol.as_str(),
                    Some(t.market.as_str()),
                    Some(t.exchange.as_str()),
                )
            })
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
    use crate::symbol::{Market, Symbol, Venue};

    #[test]
    fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let conn = support::open_shared(&dir.path().join("monitor.db")).unwrap();
        let store = OiFundingStore::open(conn).unwrap();
        store.append(OiFundingTick {
            ts: 1,
            symbol: Symbol::new("AAABUSDT"),
            market: Market::Perp,
            exchange: Venue::A,
            open_interest: Some(1_000_000.0),
            funding_rate: Some(0.0001),
        });
        let history = store.get_history(10, &RowFilter::default());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].funding_rate, Some(0.0001));
    }
}
