//! Durable append-with-retention stores. All seven share a single WAL-mode
//! SQLite connection onto one database file in `DATA_DIR` (see
//! `support::open_shared`), each owning its own table; every store caches
//! rows in memory for hot-path `getHistory` and prunes both the cache and
//! the DB opportunistically.

pub mod large_move_store;
pub mod liquidation_store;
pub mod metrics_store;
pub mod oi_funding_store;
pub mod outlier_store;
pub mod span_store;
pub mod support;
pub mod trade_store;

pub use large_move_store::LargeMoveStore;
pub use liquidation_store::LiquidationStore;
pub use metrics_store::MetricsStore;
pub use oi_funding_store::OiFundingStore;
pub use outlier_store::OutlierStore;
pub use span_store::SpanStore;
pub use trade_store::TradeStore;

/// Retention horizon for metrics/liquidations/oi-funding/large-moves.
pub const RETENTION_24H_MS: i64 = 24 * 60 * 60 * 1000;
/// Retention horizon for trades/outliers/outlier-spans.
pub const RETENTION_90D_MS: i64 = 90 * 24 * 60 * 60 * 1000;

/// A filter on `(symbol, market, exchange)` as accepted by the history
/// endpoints — each field optional, `None` matches anything.
#[derive(Debug, Clone, Default)]
pub struct RowFilter {
    pub symbol: Option<String>,
    pub market: Option<String>,
    pub exchange: Option<String>,
}

impl RowFilter {
    pub fn matches(&self, symbol: &str, market: Option<&str>, exchange: Option<&str>) -> bool {
        if let Some(want) = &self.symbol {
            if want != symbol {
                return false;
            }
        }
        if let Some(want) = &self.market {
            if market != Some(want.as_str()) {
                return false;
            }
        }
        if let Some(want) = &self.exchange {
            if exchange != Some(want.as_str()) {
                return false;
            }
        }
        true
    }
}
