//! Per-subsystem error types.
//!
//! Transient feed/store errors are logged and swallowed at the task boundary;
//! these types exist so each subsystem can describe its own failure modes
//! precisely instead of everything collapsing to `anyhow::Error`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to open store at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
}
