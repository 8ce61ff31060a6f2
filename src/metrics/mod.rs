//! Per-side and per-venue depth metrics, and large-level-move detection.

pub mod compute;
pub mod types;
