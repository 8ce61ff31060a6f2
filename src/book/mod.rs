//! Per-venue order book state and the three feed adapter variants that keep
//! it current.

pub mod adapter;
pub mod incremental_ws;
pub mod snapshot_poll;
pub mod snapshot_ws;
pub mod state;

pub use adapter::{BookAdapter, BookHandle, BookKey, BookRegistry};
pub use state::BookState;
