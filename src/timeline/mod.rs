//! Chronological views over a booklet: per-day grouping, default selection,
//! and the derived summary counts list screens show.

pub mod aggregates;
pub mod types;

pub use aggregates::*;
pub use types::*;
