//! Stateless normalizers: trades, liquidations, and open-interest/funding
//! ticks. Unlike `BookAdapter`, these don't own mutable state — each
//! message is parsed and pushed straight to a store (and, for trades, the
//! outlier span tracker) without needing to be read back.

pub mod liquidation;
pub mod oi_funding;
pub mod trade;
pub mod types;

pub use liquidation::LiquidationFeed;
pub use oi_funding::OiFundingFeed;
pub use trade::TradeFeed;
