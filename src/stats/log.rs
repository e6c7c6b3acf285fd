//! Runtime statistics for the monitoring agent.
//!
//! Counters are updated lock-free from capture and worker threads and can be
//! persisted so `status` shows totals across sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Runtime statistics for the current session.
#[derive(Debug)]
pub struct AgentStats {
    /// Samples read from all captures
    samples_captured: AtomicU64,
    /// Pipeline evaluations that completed
    detections_run: AtomicU64,
    /// Iterations that failed or panicked
    iteration_failures: AtomicU64,
    /// Alerts durably recorded
    alerts_raised: AtomicU64,
    /// Evidence clips written
    evidence_exported: AtomicU64,
    /// Alerts lost because the store could not persist them
    store_failures: AtomicU64,
    /// Why detection is disabled, if it is
    reduced_reason: Mutex<Option<String>>,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl AgentStats {
    pub fn new() -> Self {
        Self {
            samples_captured: AtomicU64::new(0),
            detections_run: AtomicU64::new(0),
            iteration_failures: AtomicU64::new(0),
            alerts_raised: AtomicU64::new(0),
            evidence_exported: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            reduced_reason: Mutex::new(None),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create stats that load and save totals at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!("Could not load previous statistics: {e}");
        }

        stats
    }

    pub fn record_samples_captured(&self, count: u64) {
        self.samples_captured.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_detection_run(&self) {
        self.detections_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_iteration_failure(&self) {
        self.iteration_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert_raised(&self) {
        self.alerts_raised.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evidence_exported(&self) {
        self.evidence_exported.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record that detection is disabled for this session.
    pub fn set_reduced_mode(&self, reason: impl Into<String>) {
        *self.reduced_reason.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason.into());
    }

    /// Get the current statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            samples_captured: self.samples_captured.load(Ordering::Relaxed),
            detections_run: self.detections_run.load(Ordering::Relaxed),
            iteration_failures: self.iteration_failures.load(Ordering::Relaxed),
            alerts_raised: self.alerts_raised.load(Ordering::Relaxed),
            evidence_exported: self.evidence_exported.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            reduced_reason: self
                .reduced_reason
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        let mode = match &stats.reduced_reason {
            Some(reason) => format!("reduced ({reason})"),
            None => "full".to_string(),
        };
        format!(
            "Session Statistics:\n\
             - Detection mode: {}\n\
             - Samples captured: {}\n\
             - Detection iterations: {}\n\
             - Failed iterations: {}\n\
             - Alerts raised: {}\n\
             - Evidence clips exported: {}\n\
             - Alerts lost to store failures: {}\n\
             - Session duration: {} seconds",
            mode,
            stats.samples_captured,
            stats.detections_run,
            stats.iteration_failures,
            stats.alerts_raised,
            stats.evidence_exported,
            stats.store_failures,
            stats.session_duration_secs
        )
    }

    /// Save totals to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.snapshot();
            let persisted = PersistedStats {
                samples_captured: stats.samples_captured,
                detections_run: stats.detections_run,
                iteration_failures: stats.iteration_failures,
                alerts_raised: stats.alerts_raised,
                evidence_exported: stats.evidence_exported,
                store_failures: stats.store_failures,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.samples_captured
                    .store(persisted.samples_captured, Ordering::Relaxed);
                self.detections_run
                    .store(persisted.detections_run, Ordering::Relaxed);
                self.iteration_failures
                    .store(persisted.iteration_failures, Ordering::Relaxed);
                self.alerts_raised
                    .store(persisted.alerts_raised, Ordering::Relaxed);
                self.evidence_exported
                    .store(persisted.evidence_exported, Ordering::Relaxed);
                self.store_failures
                    .store(persisted.store_failures, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for AgentStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub samples_captured: u64,
    pub detections_run: u64,
    pub iteration_failures: u64,
    pub alerts_raised: u64,
    pub evidence_exported: u64,
    pub store_failures: u64,
    pub reduced_reason: Option<String>,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    samples_captured: u64,
    detections_run: u64,
    iteration_failures: u64,
    alerts_raised: u64,
    evidence_exported: u64,
    #[serde(default)]
    store_failures: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared statistics.
pub type SharedAgentStats = Arc<AgentStats>;

pub fn create_shared_stats() -> SharedAgentStats {
    Arc::new(AgentStats::new())
}

pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedAgentStats {
    Arc::new(AgentStats::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let stats = AgentStats::new();

        stats.record_samples_captured(30);
        stats.record_detection_run();
        stats.record_detection_run();
        stats.record_iteration_failure();
        stats.record_alert_raised();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.samples_captured, 30);
        assert_eq!(snapshot.detections_run, 2);
        assert_eq!(snapshot.iteration_failures, 1);
        assert_eq!(snapshot.alerts_raised, 1);
        assert_eq!(snapshot.store_failures, 0);
        assert!(snapshot.reduced_reason.is_none());
    }

    #[test]
    fn test_summary_reports_mode() {
        let stats = AgentStats::new();
        assert!(stats.summary().contains("Detection mode: full"));

        stats.set_reduced_mode("safe mode");
        let summary = stats.summary();
        assert!(summary.contains("reduced (safe mode)"));
        assert!(summary.contains("Alerts raised: 0"));
    }

    #[test]
    fn test_totals_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");

        let stats = AgentStats::with_persistence(path.clone());
        stats.record_alert_raised();
        stats.record_evidence_exported();
        stats.save().unwrap();

        let reloaded = AgentStats::with_persistence(path);
        let snapshot = reloaded.snapshot();
        assert_eq!(snapshot.alerts_raised, 1);
        assert_eq!(snapshot.evidence_exported, 1);
    }
}
