//! Run-wide counters, updated atomically by workers and read once at the end.

use serde::Serialize;
use std::{
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    time::Duration,
};

#[derive(Debug, Default)]
pub struct TransferMetrics {
    objects: AtomicU64,
    bytes: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    parts: AtomicU64,
    active_workers: AtomicUsize,
}

/// Aggregate outcome of one run.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TransferSummary {
    /// Objects that ended DONE or SKIPPED.
    pub objects: u64,
    pub bytes: u64,
    pub skipped: u64,
    pub failed: u64,

    /// Parts moved by part workers during this run.
    pub parts: u64,
    pub elapsed_secs: f64,
}

impl TransferMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_done(&self, size: u64) {
        self.objects.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(size, Ordering::Relaxed);
    }

    pub fn record_skipped(&self, size: u64) {
        self.record_done(size);
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_part(&self) {
        self.parts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_started(&self) {
        self.active_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_finished(&self) {
        self.active_workers.fetch_sub(1, Ordering::Relaxed);
    }

    /// Workers currently holding a gate slot. Observability only.
    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, elapsed: Duration) -> TransferSummary {
        TransferSummary {
            objects: self.objects.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            parts: self.parts.load(Ordering::Relaxed),
            elapsed_secs: elapsed.as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skipped_objects_count_as_done() {
        let metrics = TransferMetrics::new();
        metrics.record_done(100);
        metrics.record_skipped(50);
        metrics.record_failed();
        metrics.record_part();
        metrics.record_part();

        let summary = metrics.snapshot(Duration::from_millis(1500));
        assert_eq!(summary.objects, 2);
        assert_eq!(summary.bytes, 150);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.parts, 2);
        assert_eq!(summary.elapsed_secs, 1.5);
    }

    #[test]
    fn summary_serializes_to_json() {
        let summary = TransferMetrics::new().snapshot(Duration::ZERO);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["objects"], 0);
        assert_eq!(json["failed"], 0);
    }
}
