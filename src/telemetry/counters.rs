//! Atomic session counters with optional JSON persistence.

use crate::core::estimator::EstimateFailure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters updated by the session worker and read from anywhere.
#[derive(Debug)]
pub struct SessionCounters {
    /// Windows run through the estimator
    windows_processed: AtomicU64,
    /// Valid estimates fed into the smoother
    estimates_accepted: AtomicU64,
    noisy: AtomicU64,
    errors: AtomicU64,
    out_of_range: AtomicU64,
    /// Driver reinitializations after hardware faults
    hardware_resets: AtomicU64,
    /// Per-window processing failures
    unexpected_faults: AtomicU64,
    /// Live lines delivered to the channel
    messages_sent: AtomicU64,
    /// Live lines dropped because the channel was full
    messages_dropped: AtomicU64,
    sessions_completed: AtomicU64,
    /// Creation time of this counter set
    started: DateTime<Utc>,
    /// Path for persisting totals
    persist_path: Option<PathBuf>,
}

impl SessionCounters {
    pub fn new() -> Self {
        Self {
            windows_processed: AtomicU64::new(0),
            estimates_accepted: AtomicU64::new(0),
            noisy: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            out_of_range: AtomicU64::new(0),
            hardware_resets: AtomicU64::new(0),
            unexpected_faults: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            sessions_completed: AtomicU64::new(0),
            started: Utc::now(),
            persist_path: None,
        }
    }

    /// Create counters that continue from totals saved at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut counters = Self::new();
        counters.persist_path = Some(path);

        if let Err(e) = counters.load() {
            tracing::warn!("Could not load previous session statistics: {}", e);
        }

        counters
    }

    pub fn record_window(&self) {
        self.windows_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accepted(&self) {
        self.estimates_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a window that produced no usable heart rate.
    pub fn record_rejected(&self, reason: EstimateFailure) {
        let counter = match reason {
            EstimateFailure::Noisy => &self.noisy,
            EstimateFailure::OutOfRange => &self.out_of_range,
            EstimateFailure::Error | EstimateFailure::Unclassified => &self.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reset(&self) {
        self.hardware_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unexpected(&self) {
        self.unexpected_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_completed(&self) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current counter values.
    pub fn stats(&self) -> CounterSnapshot {
        CounterSnapshot {
            windows_processed: self.windows_processed.load(Ordering::Relaxed),
            estimates_accepted: self.estimates_accepted.load(Ordering::Relaxed),
            noisy: self.noisy.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            out_of_range: self.out_of_range.load(Ordering::Relaxed),
            hardware_resets: self.hardware_resets.load(Ordering::Relaxed),
            unexpected_faults: self.unexpected_faults.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            started: self.started,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics:\n\
             - Sessions completed: {}\n\
             - Windows analysed: {}\n\
             - Estimates accepted: {}\n\
             - Rejected (noisy / error / out of range): {} / {} / {}\n\
             - Sensor resets: {}\n\
             - Unexpected faults: {}\n\
             - Live lines sent / dropped: {} / {}",
            stats.sessions_completed,
            stats.windows_processed,
            stats.estimates_accepted,
            stats.noisy,
            stats.errors,
            stats.out_of_range,
            stats.hardware_resets,
            stats.unexpected_faults,
            stats.messages_sent,
            stats.messages_dropped
        )
    }

    /// Save totals to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let persisted = PersistedCounters {
                totals: self.stats(),
                last_updated: Utc::now(),
            };
            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    /// Load totals from disk.
    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedCounters =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;
                let totals = persisted.totals;

                self.windows_processed
                    .store(totals.windows_processed, Ordering::Relaxed);
                self.estimates_accepted
                    .store(totals.estimates_accepted, Ordering::Relaxed);
                self.noisy.store(totals.noisy, Ordering::Relaxed);
                self.errors.store(totals.errors, Ordering::Relaxed);
                self.out_of_range.store(totals.out_of_range, Ordering::Relaxed);
                self.hardware_resets
                    .store(totals.hardware_resets, Ordering::Relaxed);
                self.unexpected_faults
                    .store(totals.unexpected_faults, Ordering::Relaxed);
                self.messages_sent.store(totals.messages_sent, Ordering::Relaxed);
                self.messages_dropped
                    .store(totals.messages_dropped, Ordering::Relaxed);
                self.sessions_completed
                    .store(totals.sessions_completed, Ordering::Relaxed);
                self.started = totals.started;
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        for counter in [
            &self.windows_processed,
            &self.estimates_accepted,
            &self.noisy,
            &self.errors,
            &self.out_of_range,
            &self.hardware_resets,
            &self.unexpected_faults,
            &self.messages_sent,
            &self.messages_dropped,
            &self.sessions_completed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for SessionCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub windows_processed: u64,
    pub estimates_accepted: u64,
    pub noisy: u64,
    pub errors: u64,
    pub out_of_range: u64,
    pub hardware_resets: u64,
    pub unexpected_faults: u64,
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub sessions_completed: u64,
    pub started: DateTime<Utc>,
}

/// Format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedCounters {
    totals: CounterSnapshot,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared counters.
pub type SharedCounters = Arc<SessionCounters>;

/// Create new shared counters.
pub fn create_shared_counters() -> SharedCounters {
    Arc::new(SessionCounters::new())
}

/// Create new shared counters with persistence.
pub fn create_shared_counters_with_persistence(path: PathBuf) -> SharedCounters {
    Arc::new(SessionCounters::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_counting() {
        let counters = SessionCounters::new();

        counters.record_window();
        counters.record_window();
        counters.record_accepted();
        counters.record_rejected(EstimateFailure::Noisy);
        counters.record_rejected(EstimateFailure::Unclassified);
        counters.record_dropped();

        let stats = counters.stats();
        assert_eq!(stats.windows_processed, 2);
        assert_eq!(stats.estimates_accepted, 1);
        assert_eq!(stats.noisy, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.messages_dropped, 1);
    }

    #[test]
    fn test_reset() {
        let counters = SessionCounters::new();
        counters.record_reset();
        counters.record_sent();
        counters.reset();

        let stats = counters.stats();
        assert_eq!(stats.hardware_resets, 0);
        assert_eq!(stats.messages_sent, 0);
    }

    #[test]
    fn test_summary_format() {
        let summary = SessionCounters::new().summary();
        assert!(summary.contains("Windows analysed"));
        assert!(summary.contains("Sensor resets"));
        assert!(summary.contains("dropped"));
    }

    #[test]
    fn test_persistence_accumulates_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.json");

        let first = SessionCounters::with_persistence(path.clone());
        first.record_session_completed();
        first.record_window();
        first.save().unwrap();

        let second = SessionCounters::with_persistence(path);
        second.record_session_completed();
        let stats = second.stats();
        assert_eq!(stats.sessions_completed, 2);
        assert_eq!(stats.windows_processed, 1);
    }
}
