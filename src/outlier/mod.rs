//! z-score outlier detection over resting depth, and the span tracker that
//! turns repeated sightings into enriched lifecycle records.

pub mod detector;
pub mod span;
pub mod types;

pub use detector::{count_outliers, detect_outliers, MidHistoryStore, VenueBookSnapshot, Z_METRICS, Z_OUTLIER};
pub use span::{OutlierSpan, OutlierSpanTracker, TradeSide};
pub use types::OutlierRecord;
