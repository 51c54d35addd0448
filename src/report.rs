//! Read-only progress snapshots for external observers
//!
//! Reports are plain data: the planner assembles them from live state on
//! demand, observers render or serialize them. Byte counts never go
//! backwards within one (filesystem, step) pair.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one filesystem within a replication attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilesystemState {
    Pending,
    Planning,
    Running,
    Done,
    Error,
}

impl FilesystemState {
    /// Whether this filesystem will make no further progress
    pub fn is_terminal(&self) -> bool {
        matches!(self, FilesystemState::Done | FilesystemState::Error)
    }
}

/// Progress of a single replication step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    /// Incremental base, e.g. `@a`; absent for a full send
    pub from: Option<String>,

    /// Send target, e.g. `@b`
    pub to: String,

    /// Whether this step continues an interrupted receive
    pub resumed: bool,

    /// Dry-run size estimate; 0 when no estimate is available
    pub bytes_expected: u64,

    /// Bytes that have passed through the send stream so far
    pub bytes_replicated: u64,
}

/// Progress of one filesystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemReport {
    pub path: String,
    pub state: FilesystemState,

    /// Human-readable failure, present iff `state` is `Error`
    pub error: Option<String>,

    /// Total bytes replicated for this filesystem across all steps
    pub bytes_replicated: u64,

    /// Index into `steps` of the step currently executing; equals
    /// `steps.len()` once all steps committed
    pub current_step: usize,

    pub steps: Vec<StepReport>,
}

/// Progress of a whole replication attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationReport {
    pub filesystems: Vec<FilesystemReport>,
}

impl ReplicationReport {
    /// Number of filesystems that finished successfully
    pub fn completed(&self) -> usize {
        self.filesystems
            .iter()
            .filter(|fs| fs.state == FilesystemState::Done)
            .count()
    }

    /// Number of filesystems that failed
    pub fn failed(&self) -> usize {
        self.filesystems
            .iter()
            .filter(|fs| fs.state == FilesystemState::Error)
            .count()
    }

    /// Total bytes replicated across all filesystems
    pub fn bytes_replicated(&self) -> u64 {
        self.filesystems.iter().map(|fs| fs.bytes_replicated).sum()
    }

    /// One-line human summary
    pub fn summary(&self) -> String {
        format!(
            "{}/{} filesystems replicated, {} failed, {} transferred",
            self.completed(),
            self.filesystems.len(),
            self.failed(),
            format_size(self.bytes_replicated())
        )
    }
}

/// Format a byte count for display
pub fn format_size(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}
