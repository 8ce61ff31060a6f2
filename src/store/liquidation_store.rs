//! Durable store for liquidation prints. Retention 24h.

use crate::error::StoreError;
use crate::feed::types::Liquidation;
use crate::store::{support, RowFilter, RETENTION_24H_MS};
use parking_lot::RwLock;
use rusqlite::params;
use std::collections::VecDeque;
use std::sync::Arc;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS liquidations (
    ts INTEGER NOT NULL,
    symbol TEXT NOT NULL,
    market TEXT NOT NULL,
    exchange TEXT NOT NULL,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_liquidations_ts ON liquidations(ts);
CREATE INDEX IF NOT EXISTS idx_liquidations_symbol_ts ON liquidations(symbol, ts);
";

#[derive(Clone)]
pub struct LiquidationStore {
    conn: support::SharedConn,
    cache: Arc<RwLock<VecDeque<Liquidation>>>,
    retention_ms: i64,
}

impl LiquidationStore {
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
            conn.prepare("SELECT data FROM liquidations WHERE ts >= ?1 ORDER BY ts ASC")?;
        let rows = stmt.query_map(params![cutoff], |row| row.get::<_, String>(0))?;
        let mut cache = self.cache.write();
        for row in rows {
            let Ok(json) = row else { continue };
            if let Ok(liq) = serde_json::from_str::<Liquidation>(&json) {
                cache.push_back(liq);
            }
        }
        Ok(())
    }

    pub fn append(&self, liq: Liquidation) {
        let json = match serde_json::to_string(&liq) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize liquidation, dropping write");
                return;
            }
        };
        {
            let conn = self.conn.lock();
            if let Err(e) = conn.execute(
                "INSERT INTO liquidations (ts, symbol, market, exchange, data) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    liq.ts,
                    liq.symbol.as_str(),
                    liq.market.as_str(),
                    liq.exchange.as_str(),
                    json
                ],
            ) {
                panic!("liquidation store write failed: {e}");
            }
        }
        let ts = liq.ts;
        self.cache.write().push_back(liq);
        self.prune(ts);
    }

    pub fn prune(&self, now: i64) {
        support::prune_cache(&mut self.cache.write(), now, self.retention_ms, |l| l.ts);
        let conn = self.conn.lock();
        if let Err(e) = support::prune_db(&conn, "liquidations", "ts", now, self.retention_ms) {
            tracing::warn!(error = %e, "liquidation store prune failed");
        }
    }

    pub fn get_history(&self, limit: usize, filter: &RowFilter) -> Vec<Liquidation> {
        let cache = self.cache.read();
        let filtered: VecDeque<Liquidation> = cache
            .iter()
            .filter(|l| {
                filter.matches(
                    l.symbol.as_str(),
                    Some(l.market.as_str()),
                    Some(l.exchange.as_str()),
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
    use crate::feed::types::LiquidationSide;
    use crate::symbol::{Market, Symbol, Venue};

    #[test]
    fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let conn = support::open_shared(&dir.path().join("monitor.db")).unwrap();
        let store = LiquidationStore::open(conn).unwrap();
        store.append(Liquidation {
            ts: 1,
            symbol: Symbol::new("AAABUSDT"),
            market: Market::Perp,
            exchange: Venue::B,
            side: LiquidationSide::Sell,
            price: 100.0,
            qty: 5.0,
        });
        let history = store.get_history(10, &RowFilter::default());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].qty, 5.0);
    }
}
