//! Session counters.
//!
//! Counts what the controller did during a run: link traffic, windows,
//! predictions and session boundaries. Nothing is persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters shared between the link reader and the session thread.
#[derive(Debug)]
pub struct SessionStats {
    lines_parsed: AtomicU64,
    lines_dropped: AtomicU64,
    windows_collected: AtomicU64,
    windows_interrupted: AtomicU64,
    predictions: AtomicU64,
    classifier_fallbacks: AtomicU64,
    reevaluations: AtomicU64,
    sessions_started: AtomicU64,
    sessions_stopped: AtomicU64,
    started_at: DateTime<Utc>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            lines_parsed: AtomicU64::new(0),
            lines_dropped: AtomicU64::new(0),
            windows_collected: AtomicU64::new(0),
            windows_interrupted: AtomicU64::new(0),
            predictions: AtomicU64::new(0),
            classifier_fallbacks: AtomicU64::new(0),
            reevaluations: AtomicU64::new(0),
            sessions_started: AtomicU64::new(0),
            sessions_stopped: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_line_parsed(&self) {
        self.lines_parsed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_line_dropped(&self) {
        self.lines_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window_collected(&self) {
        self.windows_collected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window_interrupted(&self) {
        self.windows_interrupted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a prediction; `fallback` marks the NO_STRESS default after a
    /// classifier failure.
    pub fn record_prediction(&self, fallback: bool) {
        self.predictions.fetch_add(1, Ordering::Relaxed);
        if fallback {
            self.classifier_fallbacks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_reevaluation(&self) {
        self.reevaluations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_stopped(&self) {
        self.sessions_stopped.fetch_add(1, Ordering::Relaxed);
    }

    /// Current values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lines_parsed: self.lines_parsed.load(Ordering::Relaxed),
            lines_dropped: self.lines_dropped.load(Ordering::Relaxed),
            windows_collected: self.windows_collected.load(Ordering::Relaxed),
            windows_interrupted: self.windows_interrupted.load(Ordering::Relaxed),
            predictions: self.predictions.load(Ordering::Relaxed),
            classifier_fallbacks: self.classifier_fallbacks.load(Ordering::Relaxed),
            reevaluations: self.reevaluations.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_stopped: self.sessions_stopped.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Human-readable summary printed at shutdown.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Run Statistics:\n\
             - Device lines parsed: {}\n\
             - Device lines dropped: {}\n\
             - Sessions started / stopped: {} / {}\n\
             - Windows collected: {} ({} interrupted)\n\
             - Predictions: {} ({} classifier fallbacks)\n\
             - Re-evaluations: {}\n\
             - Uptime: {} seconds",
            stats.lines_parsed,
            stats.lines_dropped,
            stats.sessions_started,
            stats.sessions_stopped,
            stats.windows_collected,
            stats.windows_interrupted,
            stats.predictions,
            stats.classifier_fallbacks,
            stats.reevaluations,
            stats.uptime_secs
        )
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub lines_parsed: u64,
    pub lines_dropped: u64,
    pub windows_collected: u64,
    pub windows_interrupted: u64,
    pub predictions: u64,
    pub classifier_fallbacks: u64,
    pub reevaluations: u64,
    pub sessions_started: u64,
    pub sessions_stopped: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Thread-safe shared counters.
pub type SharedStats = Arc<SessionStats>;

/// Create a new set of shared counters.
pub fn create_shared_stats() -> SharedStats {
    Arc::new(SessionStats::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_fallbacks_counted_separately() {
        let stats = SessionStats::new();

        stats.record_prediction(false);
        stats.record_prediction(true);
        stats.record_prediction(false);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.predictions, 3);
        assert_eq!(snapshot.classifier_fallbacks, 1);
    }

    #[test]
    fn test_summary_format() {
        let stats = SessionStats::new();
        stats.record_line_dropped();
        let summary = stats.summary();

        assert!(summary.contains("Device lines dropped: 1"));
        assert!(summary.contains("Re-evaluations"));
    }
}
