//! Durable store for `OutlierRecord` rows. Outliers are persisted *without*
//! the transient enrichment fields used only to seed/extend spans;
//! `append_all` batches a tick's candidates in one transaction. Retention 90d.

use crate::error::StoreError;
use crate::outlier::types::OutlierRecord;
use crate::store::{support, RowFilter, RETENTION_90D_MS};
use crate::symbol::{Market, Side, Symbol, Venue};
use parking_lot::RwLock;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Durable shape of an outlier sighting — drops the enrichment fields that
/// only exist to seed the span tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedOutlier {
    pub ts: i64,
    pub symbol: Symbol,
    pub market: Market,
    pub exchange: Venue,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub z_score: f64,
    pub bps_from_mid: f64,
}

impl From<&OutlierRecord> for PersistedOutlier {
    fn from(r: &OutlierRecord) -> Self {
        Self {
            ts: r.ts,
            symbol: r.symbol.clone(),
            market: r.market,
            exchange: r.exchange,
            side: r.side,
            price: r.price,
            size: r.size,
            z_score: r.z_score,
            bps_from_mid: r.bps_from_mid,
        }
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS outliers (
    ts INTEGER NOT NULL,
    symbol TEXT NOT NULL,
    market TEXT NOT NULL,
    exchange TEXT NOT NULL,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_outliers_ts ON outliers(ts);
CREATE INDEX IF NOT EXISTS idx_outliers_symbol_ts ON outliers(symbol, ts);
CREATE INDEX IF NOT EXISTS idx_outliers_filters_ts ON outliers(symbol, market, exchange, ts);
";

#[derive(Clone)]
pub struct OutlierStore {
    conn: support::SharedConn,
    cache: Arc<RwLock<VecDeque<PersistedOutlier>>>,
    retention_ms: i64,
}

impl OutlierStore {
    /// `conn` is the connection shared by every store (spec §6: one
    /// database file for the whole process); this only adds its own table.
    pub fn open(conn: support::SharedConn) -> Result<Self, StoreError> {
        support::init_schema(&conn.lock(), SCHEMA)?;
        let store = Self {
            conn,
            cache: Arc::new(RwLock::new(VecDeque::new())),
            retention_ms: RETENTION_90D_MS,
        };
        store.load_existing()?;
        Ok(store)
    }

    fn load_existing(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let cutoff = now_ms() - self.retention_ms;
        let mut stmt = conn.prepare("SELECT data FROM outliers WHERE ts >= ?1 ORDER BY ts ASC")?;
        let rows = stmt.query_map(params![cutoff], |row| row.get::<_, String>(0))?;
        let mut cache = self.cache.write();
        for row in rows {
            let Ok(json) = row else { continue };
            if let Ok(rec) = serde_json::from_str::<PersistedOutlier>(&json) {
                cache.push_back(rec);
            }
        }
        Ok(())
    }

    pub fn append(&self, record: &OutlierRecord) {
        self.append_all(std::slice::from_ref(record));
    }

    /// Batched append in one transaction.
    pub fn append_all(&self, records: &[OutlierRecord]) {
        if records.is_empty() {
            return;
        }
        let persisted: Vec<PersistedOutlier> = records.iter().map(PersistedOutlier::from).collect();

        {
            let mut conn = self.conn.lock();
            let tx = match conn.transaction() {
                Ok(tx) => tx,
                Err(e) => panic!("outlier store transaction failed: {e}"),
            };
            for rec in &persisted {
                let json = serde_json::to_string(rec).expect("PersistedOutlier always serializes");
                if let Err(e) = tx.execute(
                    "INSERT INTO outliers (ts, symbol, market, exchange, data) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![rec.ts, rec.symbol.as_str(), rec.market.as_str(), rec.exchange.as_str(), json],
                ) {
                    panic!("outlier store write failed: {e}");
                }
            }
            if let Err(e) = tx.commit() {
                panic!("outlier store commit failed: {e}");
            }
        }

        let mut cache = self.cache.write();
        let max_ts = persisted.iter().map(|r| r.ts).max().unwrap_or(0);
        cache.extend(persisted);
        drop(cache);
        self.prune(max_ts);
    }

    pub fn prune(&self, now: i64) {
        support::prune_cache(&mut self.cache.write(), now, self.retention_ms, |r| r.ts);
        let conn = self.conn.lock();
        if let Err(e) = support::prune_db(&conn, "outliers", "ts", now, self.retention_ms) {
            tracing::warn!(error = %e, "outlier store prune failed");
        }
    }

    pub fn get_history(&self, limit: usize, filter: &RowFilter) -> Vec<PersistedOutlier> {
        let cache = self.cache.read();
        let filtered: VecDeque<PersistedOutlier> = cache
            .iter()
            .filter(|r| {
                filter.matches(
                    r.symbol.as_str(),
                    Some(r.market.as_str()),
                    Some(r.exchange.as_str()),
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

    fn record(ts: i64) -> OutlierRecord {
        OutlierRecord {
            ts,
            symbol: Symbol::new("AAABUSDT"),
            market: Market::Spot,
            exchange: Venue::A,
            side: Side::Bid,
            price: 100.0,
            size: 500.0,
            z_score: 6.0,
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
            vol_1m: 0.0,
            vol_5m: 0.0,
        }
    }

    #[test]
    fn append_all_batches_and_drops_enrichment_fields() {
        let dir = tempfile::tempdir().unwrap();
        let conn = support::open_shared(&dir.path().join("monitor.db")).unwrap();
        let store = OutlierStore::open(conn).unwrap();
        store.append_all(&[record(1), record(2)]);

        let history = store.get_history(10, &RowFilter::default());
        assert_eq!(history.len(), 2);
        // PersistedOutlier has no `mid`/`book_snapshot` fields at all, so the
        // round trip through JSON already enforces "without enrichment".
        assert_eq!(history[0].z_score, 6.0);
    }
}
