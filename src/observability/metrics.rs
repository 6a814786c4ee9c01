//! Rollback metrics
//!
//! - Counters only
//! - Monotonic increase
//! - Reset only on process start
//! - Relaxed atomics, no locks

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters describing rollback activity
#[derive(Debug, Default)]
pub struct RollbackMetrics {
    attempts: AtomicU64,
    completions: AtomicU64,
    retries: AtomicU64,
    fatal_failures: AtomicU64,
    documents_refetched: AtomicU64,
    refetched_bytes: AtomicU64,
    documents_deleted: AtomicU64,
    documents_updated: AtomicU64,
    capped_failures_ignored: AtomicU64,
    indexes_dropped: AtomicU64,
    indexes_created: AtomicU64,
    collections_dropped: AtomicU64,
    collections_renamed: AtomicU64,
    metadata_resyncs: AtomicU64,
    oplog_truncations: AtomicU64,
}

impl RollbackMetrics {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    // Orchestration

    pub fn increment_attempts(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_completions(&self) {
        self.completions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_fatal_failures(&self) {
        self.fatal_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Refetch

    /// Record one refetched document of `bytes` encoded size.
    pub fn record_refetch(&self, bytes: u64) {
        self.documents_refetched.fetch_add(1, Ordering::Relaxed);
        self.refetched_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    // Document fix-up

    pub fn increment_documents_deleted(&self) {
        self.documents_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_documents_updated(&self) {
        self.documents_updated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_capped_failures_ignored(&self) {
        self.capped_failures_ignored.fetch_add(1, Ordering::Relaxed);
    }

    // Catalog

    pub fn increment_indexes_dropped(&self) {
        self.indexes_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_indexes_created(&self) {
        self.indexes_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_collections_dropped(&self) {
        self.collections_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_collections_renamed(&self) {
        self.collections_renamed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_metadata_resyncs(&self) {
        self.metadata_resyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_oplog_truncations(&self) {
        self.oplog_truncations.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all counters as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            completions: self.completions.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            fatal_failures: self.fatal_failures.load(Ordering::Relaxed),
            documents_refetched: self.documents_refetched.load(Ordering::Relaxed),
            refetched_bytes: self.refetched_bytes.load(Ordering::Relaxed),
            documents_deleted: self.documents_deleted.load(Ordering::Relaxed),
            documents_updated: self.documents_updated.load(Ordering::Relaxed),
            capped_failures_ignored: self.capped_failures_ignored.load(Ordering::Relaxed),
            indexes_dropped: self.indexes_dropped.load(Ordering::Relaxed),
            indexes_created: self.indexes_created.load(Ordering::Relaxed),
            collections_dropped: self.collections_dropped.load(Ordering::Relaxed),
            collections_renamed: self.collections_renamed.load(Ordering::Relaxed),
            metadata_resyncs: self.metadata_resyncs.load(Ordering::Relaxed),
            oplog_truncations: self.oplog_truncations.load(Ordering::Relaxed),
        }
    }

    /// Snapshot rendered as a JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A point-in-time copy of every counter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub attempts: u64,
    pub completions: u64,
    pub retries: u64,
    pub fatal_failures: u64,
    pub documents_refetched: u64,
    pub refetched_bytes: u64,
    pub documents_deleted: u64,
    pub documents_updated: u64,
    pub capped_failures_ignored: u64,
    pub indexes_dropped: u64,
    pub indexes_created: u64,
    pub collections_dropped: u64,
    pub collections_renamed: u64,
    pub metadata_resyncs: u64,
    pub oplog_truncations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_has_zero_values() {
        let metrics = RollbackMetrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_record_refetch_counts_documents_and_bytes() {
        let metrics = RollbackMetrics::new();
        metrics.record_refetch(100);
        metrics.record_refetch(50);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_refetched, 2);
        assert_eq!(snapshot.refetched_bytes, 150);
    }

    #[test]
    fn test_to_json() {
        let metrics = RollbackMetrics::new();
        metrics.increment_attempts();
        metrics.increment_oplog_truncations();

        let parsed: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(parsed["attempts"], 1);
        assert_eq!(parsed["oplog_truncations"], 1);
        assert_eq!(parsed["retries"], 0);
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(RollbackMetrics::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let m = Arc::clone(&metrics);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    m.increment_documents_deleted();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.snapshot().documents_deleted, 800);
    }
}
