//! Planner policy configuration

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default number of filesystems replicated in parallel (strict ordering)
pub const DEFAULT_FILESYSTEM_CONCURRENCY: usize = 1;

/// Default concurrency hint for batched dry-run size estimation
pub const DEFAULT_SIZE_ESTIMATION_CONCURRENCY: usize = 4;

/// Automatic conflict resolution for initial replication.
///
/// Consulted only when sender and receiver share no common version and the
/// receiver has no versions at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialReplication {
    /// Send only the most recent sender snapshot
    MostRecent,

    /// Send every sender snapshot, oldest first
    All,

    /// Never auto-resolve; surface the conflict
    Fail,
}

impl Default for InitialReplication {
    fn default() -> Self {
        InitialReplication::All
    }
}

/// Conflict resolution policy block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictResolution {
    pub initial_replication: InitialReplication,
}

/// Options forwarded verbatim to both endpoints inside every send and
/// receive request. The planner never inspects them; they configure how the
/// sender produces the stream and how the receiver applies it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationOptions {
    pub encrypted: bool,
    pub compressed: bool,
    pub large_blocks: bool,
    pub embedded_data: bool,
    pub send_properties: bool,
}

/// Policy inputs visible to the planner and step engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerPolicy {
    /// How to handle an initial replication with no common ancestor
    pub conflict_resolution: ConflictResolution,

    /// Collapse multi-step plans into a single send where possible
    pub one_step: bool,

    /// How many filesystems may replicate in parallel
    pub filesystem_concurrency: usize,

    /// Concurrency hint forwarded with the batched dry-run send request
    pub size_estimation_concurrency: usize,

    /// Opaque options forwarded inside send and receive requests
    pub replication_options: ReplicationOptions,
}

impl Default for PlannerPolicy {
    fn default() -> Self {
        Self {
            conflict_resolution: ConflictResolution::default(),
            one_step: true,
            filesystem_concurrency: DEFAULT_FILESYSTEM_CONCURRENCY,
            size_estimation_concurrency: DEFAULT_SIZE_ESTIMATION_CONCURRENCY,
            replication_options: ReplicationOptions::default(),
        }
    }
}

impl PlannerPolicy {
    /// Check the policy for values the planner cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.filesystem_concurrency < 1 {
            return Err(Error::policy("filesystem_concurrency must be >= 1"));
        }
        if self.size_estimation_concurrency < 1 {
            return Err(Error::policy("size_estimation_concurrency must be >= 1"));
        }
        Ok(())
    }
}
