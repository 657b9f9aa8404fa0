//! Run statistics for the controller.

pub mod stats;

pub use stats::{create_shared_stats, SessionStats, SharedStats, StatsSnapshot};
