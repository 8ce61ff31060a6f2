//! `OutlierRecord` and the transient enrichment fields used to seed/extend
//! span tracking.

use crate::symbol::{Market, Side, Symbol, Venue};
use serde::{Deserialize, Serialize};

/// A single book snapshot captured at span start/end, serialized as an
/// opaque JSON string for storage rather than a structured type.
pub type BookSnapshot = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlierRecord {
    pub ts: i64,
    pub symbol: Symbol,
    pub market: Market,
    pub exchange: Venue,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub z_score: f64,
    pub bps_from_mid: f64,

    // Transient enrichment, used only to seed/extend spans; not persisted
    // to the outlier store.
    pub mid: f64,
    pub book_snapshot: BookSnapshot,
    pub best_bid: f64,
    pub best_ask: f64,
    pub spread_bps: f64,
    pub imbalance: f64,
    pub bid_depth: f64,
    pub ask_depth: f64,
    pub microprice: f64,
    pub level_rank: usize,
    pub vol_1m: f64,
    pub vol_5m: f64,
}
