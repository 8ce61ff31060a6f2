//! Shared plumbing for the seven append-with-retention stores, all of which
//! share one WAL-mode connection onto a single database file (spec §6: "all
//! stores share a single database file under `DATA_DIR`"): opening that
//! connection once, running each store's own schema against it, pruning the
//! in-memory cache and the DB by a retention cutoff, and serving
//! `get_history` off the cache rather than a DB query. Each concrete store
//! in this module owns its own schema, row type, and (de)serialization;
//! only the mechanics identical across all seven are factored out here.

use crate::error::StoreError;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

/// A connection shared by every store so they all write into the same
/// database file; the mutex is the single-writer serialization point §5
/// requires for stores.
pub type SharedConn = Arc<Mutex<Connection>>;

/// Open (or create) the single sqlite file at `path` in WAL mode, shared by
/// every store. Called once at startup; each store then runs its own schema
/// against the returned connection via `init_schema`.
pub fn open_shared(path: &Path) -> Result<SharedConn, StoreError> {
    let conn = Connection::open(path).map_err(|source| StoreError::Open {
        path: path.display().to_string(),
        source,
    })?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;\n\
         PRAGMA synchronous = NORMAL;\n\
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Run a store's own `schema_sql` (expected to be idempotent
/// `CREATE TABLE IF NOT EXISTS` / index statements) against the shared
/// connection.
pub fn init_schema(conn: &Connection, schema_sql: &str) -> Result<(), StoreError> {
    conn.execute_batch(schema_sql)?;
    Ok(())
}

/// Add any column from `wanted` missing from `table`'s current column list,
/// each with the given `DEFAULT` clause.
pub fn migrate_columns(
    conn: &Connection,
    table: &str,
    wanted: &[(&str, &str)],
) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let existing: std::collections::HashSet<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(Result::ok)
        .collect();
    drop(stmt);

    for (column, default_clause) in wanted {
        if existing.contains(*column) {
            continue;
        }
        conn.execute_batch(&format!(
            "ALTER TABLE {table} ADD COLUMN {column} {default_clause};"
        ))?;
        tracing::info!(table, column, "added missing column via schema migration");
    }
    Ok(())
}

/// Drop cache entries and DB rows with `ts < now - retention_ms`. Called
/// opportunistically on writes and reads.
pub fn prune_cache<T>(cache: &mut VecDeque<T>, now: i64, retention_ms: i64, ts_of: impl Fn(&T) -> i64) {
    let cutoff = now - retention_ms;
    while matches!(cache.front(), Some(row) if ts_of(row) < cutoff) {
        cache.pop_front();
    }
}

pub fn prune_db(
    conn: &Connection,
    table: &str,
    ts_column: &str,
    now: i64,
    retention_ms: i64,
) -> Result<usize, StoreError> {
    let cutoff = now - retention_ms;
    let deleted = conn.execute(
        &format!("DELETE FROM {table} WHERE {ts_column} < ?1"),
        [cutoff],
    )?;
    Ok(deleted)
}

/// Tail of the cache, at most `limit` entries, in insertion order. Never
/// touches the DB.
pub fn tail<T: Clone>(cache: &VecDeque<T>, limit: usize) -> Vec<T> {
    let start = cache.len().saturating_sub(limit);
    cache.iter().skip(start).cloned().collect()
}
