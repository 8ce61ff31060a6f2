//! Durable store for trade prints. Retention 90d.

use crate::error::StoreError;
use crate::feed::types::Trade;
use crate::store::{support, RowFilter, RETENTION_90D_MS};
use parking_lot::RwLock;
use rusqlite::params;
use std::collections::VecDeque;
use std::sync::Arc;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS trades (
    ts INTEGER NOT NULL,
    symbol TEXT NOT NULL,
    market TEXT NOT NULL,
    exchange TEXT NOT NULL,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_trades_ts ON trades(ts);
CREATE INDEX IF NOT EXISTS idx_trades_symbol_ts ON trades(symbol, ts);
CREATE INDEX IF NOT EXISTS idx_trades_filters_ts ON trades(symbol, market, exchange, ts);
";

#[derive(Clone)]
pub struct TradeStore {
    conn: support::SharedConn,
    cache: Arc<RwLock<VecDeque<Trade>>>,
    retention_ms: i64,
}

impl TradeStore {
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
        let mut stmt = conn.prepare("SELECT data FROM trades WHERE ts >= ?1 ORDER BY ts ASC")?;
        let rows = stmt.query_map(params![cutoff], |row| row.get::<_, String>(0))?;
        let mut cache = self.cache.write();
        for row in rows {
            let Ok(json) = row else { continue };
            if let Ok(trade) = serde_json::from_str::<Trade>(&json) {
                cache.push_back(trade);
            }
        }
        Ok(())
    }

    pub fn append(&self, trade: Trade) {
        let json = match serde_json::to_string(&trade) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize trade, dropping write");
                return;
            }
        };
        {
            let conn = self.conn.lock();
            if let Err(e) = conn.execute(
                "INSERT INTO trades (ts, symbol, market, exchange, data) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    trade.ts,
                    trade.symbol.as_str(),
                    trade.market.as_str(),
                    trade.exchange.as_str(),
                    json
                ],
            ) {
                panic!("trade store write failed: {e}");
            }
        }
        let ts = trade.ts;
        self.cache.write().push_back(trade);
        self.prune(ts);
    }

    pub fn prune(&self, now: i64) {
        support::prune_cache(&mut self.cache.write(), now, self.retention_ms, |t| t.ts);
        let conn = self.conn.lock();
        if let Err(e) = support::prune_db(&conn, "trades", "ts", now, self.retention_ms) {
            tracing::warn!(error = %e, "trade store prune failed");
        }
    }

    pub fn get_history(&self, limit: usize, filter: &RowFilter) -> Vec<Trade> {
        let cache = self.cache.read();
        let filtered: VecDeque<Trade> = cache
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
    use crate::outlier::span::TradeSide;
    use crate::symbol::{Market, Symbol, Venue};

    fn trade(ts: i64, symbol: &str) -> Trade {
        Trade {
            ts,
            symbol: Symbol::new(symbol),
            market: Market::Spot,
            exchange: Venue::A,
            price: 100.0,
            qty: 1.0,
            side: TradeSide::Buy,
        }
    }

    #[test]
    fn filters_by_symbol() {
        let dir = tempfile::tempdir().unwrap();
        let conn = support::open_shared(&dir.path().join("monitor.db")).unwrap();
        let store = TradeStore::open(conn).unwrap();
        store.append(trade(1, "AAABUSDT"));
        store.append(trade(2, "BBBBUSDT"));

        let filter = RowFilter {
            symbol: Some("AAABUSDT".to_string()),
            ..Default::default()
        };
        let history = store.get_history(10, &filter);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].symbol.as_str(), "AAABUSDT");
    }
}
