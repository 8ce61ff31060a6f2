//! Durable store for closed `OutlierSpan` rows. Retention 90d. The
//! trade-flow columns (`trade_buy_qty`/`trade_sell_qty`/`trade_count`) were
//! added after the table's initial shape, so `open` runs an additive schema
//! migration adding any of them that a pre-existing DB file is missing.

use crate::error::StoreError;
use crate::outlier::span::OutlierSpan;
use crate::store::{support, RowFilter, RETENTION_90D_MS};
use parking_lot::RwLock;
use rusqlite::params;
use std::collections::VecDeque;
use std::sync::Arc;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS outlier_spans (
    end_ts INTEGER NOT NULL,
    start_ts INTEGER NOT NULL,
    symbol TEXT NOT NULL,
    market TEXT NOT NULL,
    exchange TEXT NOT NULL,
    side TEXT NOT NULL,
    price REAL NOT NULL,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_spans_end_ts ON outlier_spans(end_ts);
CREATE INDEX IF NOT EXISTS idx_spans_symbol_end_ts ON outlier_spans(symbol, end_ts);
CREATE INDEX IF NOT EXISTS idx_spans_filters_end_ts ON outlier_spans(symbol, market, exchange, end_ts);
";

/// Columns added after the table's original shape; additive migration adds
/// them to any pre-existing database that predates them.
const ADDITIVE_COLUMNS: &[(&str, &str)] = &[
    ("trade_buy_qty", "REAL NOT NULL DEFAULT 0"),
    ("trade_sell_qty", "REAL NOT NULL DEFAULT 0"),
    ("trade_count", "INTEGER NOT NULL DEFAULT 0"),
];

#[derive(Clone)]
pub struct SpanStore {
    conn: support::SharedConn,
    cache: Arc<RwLock<VecDeque<OutlierSpan>>>,
    retention_ms: i64,
}

impl SpanStore {
    /// `conn` is the connection shared by every store (spec §6: one
    /// database file for the whole process); this only adds its own table
    /// and runs its additive migration against it.
    pub fn open(conn: support::SharedConn) -> Result<Self, StoreError> {
        {
            let guard = conn.lock();
            support::init_schema(&guard, SCHEMA)?;
            support::migrate_columns(&guard, "outlier_spans", ADDITIVE_COLUMNS)?;
        }
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
        let mut stmt =
            conn.prepare("SELECT data FROM outlier_spans WHERE end_ts >= ?1 ORDER BY end_ts ASC")?;
        let rows = stmt.query_map(params![cutoff], |row| row.get::<_, String>(0))?;
        let mut cache = self.cache.write();
        for row in rows {
            let Ok(json) = row else { continue };
            if let Ok(span) = serde_json::from_str::<OutlierSpan>(&json) {
                cache.push_back(span);
            }
        }
        Ok(())
    }

    pub fn append(&self, span: OutlierSpan) {
        let json = match serde_json::to_string(&span) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize outlier span, dropping write");
                return;
            }
        };
        {
            let conn = self.conn.lock();
            if let Err(e) = conn.execute(
                "INSERT INTO outlier_spans \
                 (end_ts, start_ts, symbol, market, exchange, side, price, data, \
                  trade_buy_qty, trade_sell_qty, trade_count) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    span.end_ts,
                    span.start_ts,
                    span.symbol.as_str(),
                    span.market.as_str(),
                    span.exchange.as_str(),
                    span.side.as_str(),
                    span.price,
                    json,
                    span.trade_buy_qty,
                    span.trade_sell_qty,
                    span.trade_count,
                ],
            ) {
                panic!("span store write failed: {e}");
            }
        }
        let end_ts = span.end_ts;
        self.cache.write().push_back(span);
        self.prune(end_ts);
    }

    pub fn prune(&self, now: i64) {
        support::prune_cache(&mut self.cache.write(), now, self.retention_ms, |s| s.end_ts);
        let conn = self.conn.lock();
        if let Err(e) = support::prune_db(&conn, "outlier_spans", "end_ts", now, self.retention_ms) {
            tracing::warn!(error = %e, "span store prune failed");
        }
    }

    pub fn get_history(&self, limit: usize, filter: &RowFilter) -> Vec<OutlierSpan> {
        let cache = self.cache.read();
        let filtered: VecDeque<OutlierSpan> = cache
            .iter()
            .filter(|s| {
                filter.matches(
                    s.symbol.as_str(),
                    Some(s.market.as_str()),
                    Some(s.exchange.as_str()),
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
    use crate::symbol::{Market, Side, Symbol, Venue};

    fn span(end_ts: i64) -> OutlierSpan {
        OutlierSpan {
            symbol: Symbol::new("AAABUSDT"),
            market: Market::Spot,
            exchange: Venue::A,
            side: Side::Bid,
            price: 100.0,
            start_ts: end_ts - 5_000,
            end_ts,
            duration_ms: 5_000,
            max_z: 7.0,
            avg_z: 6.5,
            count: 2,
            start_size: 500.0,
            end_size: 450.0,
            filled_pct: 0.1,
            start_bps: 1.0,
            end_bps: 1.0,
            start_book: "{}".to_string(),
            end_book: "{}".to_string(),
            start_best_bid: 99.9,
            start_best_ask: 100.1,
            end_best_bid: 99.9,
            end_best_ask: 100.1,
            start_spread_bps: 20.0,
            end_spread_bps: 20.0,
            start_imbalance: 0.1,
            end_imbalance: 0.1,
            start_bid_depth: 1000.0,
            end_bid_depth: 950.0,
            start_ask_depth: 900.0,
            end_ask_depth: 900.0,
            start_microprice: 100.0,
            end_microprice: 100.0,
            start_level_rank: 1,
            end_level_rank: 1,
            start_vol_1m: 0.0,
            end_vol_1m: 0.0,
            start_vol_5m: 0.0,
            end_vol_5m: 0.0,
            size_delta: -50.0,
            size_delta_pct: -0.1,
            trade_buy_qty: 25.0,
            trade_sell_qty: 0.0,
            trade_count: 1,
        }
    }

    #[test]
    fn append_and_reopen_runs_migration_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("monitor.db");

        {
            let conn = support::open_shared(&db_path).unwrap();
            let store = SpanStore::open(conn).unwrap();
            store.append(span(10_000));
        }

        // Reopening an existing DB re-runs the additive migration, which
        // must be a no-op on columns that already exist.
        let conn = support::open_shared(&db_path).unwrap();
        let store = SpanStore::open(conn).unwrap();
        let history = store.get_history(10, &RowFilter::default());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].trade_buy_qty, 25.0);
    }
}
