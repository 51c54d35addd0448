//! Aggregate replication counters
//!
//! Write side is the executing tasks; read side is whatever scrapes or
//! displays status. Plain atomics, no metrics backend.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters aggregated across all filesystems of a replication attempt
#[derive(Debug, Default)]
pub struct Metrics {
    bytes_replicated: AtomicU64,
    steps_completed: AtomicU64,
    steps_failed: AtomicU64,
    filesystems_planned: AtomicU64,
    filesystems_failed: AtomicU64,
}

impl Metrics {
    pub fn add_bytes_replicated(&self, bytes: u64) {
        self.bytes_replicated.fetch_add(bytes, Ordering::AcqRel);
    }

    pub fn incr_steps_completed(&self) {
        self.steps_completed.fetch_add(1, Ordering::AcqRel);
    }

    pub fn incr_steps_failed(&self) {
        self.steps_failed.fetch_add(1, Ordering::AcqRel);
    }

    pub fn add_filesystems_planned(&self, count: u64) {
        self.filesystems_planned.fetch_add(count, Ordering::AcqRel);
    }

    pub fn incr_filesystems_failed(&self) {
        self.filesystems_failed.fetch_add(1, Ordering::AcqRel);
    }

    /// Consistent-enough point-in-time copy of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bytes_replicated: self.bytes_replicated.load(Ordering::Acquire),
            steps_completed: self.steps_completed.load(Ordering::Acquire),
            steps_failed: self.steps_failed.load(Ordering::Acquire),
            filesystems_planned: self.filesystems_planned.load(Ordering::Acquire),
            filesystems_failed: self.filesystems_failed.load(Ordering::Acquire),
        }
    }
}

/// Point-in-time values of the aggregate counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub bytes_replicated: u64,
    pub steps_completed: u64,
    pub steps_failed: u64,
    pub filesystems_planned: u64,
    pub filesystems_failed: u64,
}
