//! Endpoint capability traits and request/response types
//!
//! The planner talks to the two sides of a replication through the narrow
//! capability set defined here. Concrete implementations (local ZFS, RPC
//! client, in-memory test double) live outside this crate; the planner only
//! ever holds them as trait objects.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::config::ReplicationOptions;
use crate::error::Result;
use crate::version::{Filesystem, FilesystemVersion};

/// Type alias for a send stream: byte chunks produced by the sender and
/// consumed by the receiver
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send + Sync>>;

/// Request for a send stream between two versions of one filesystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReq {
    pub filesystem: String,

    /// Incremental base; absent for a full send
    pub from: Option<FilesystemVersion>,

    pub to: FilesystemVersion,

    /// Raw receiver-reported resume token; empty means none
    pub resume_token: String,

    pub replication_options: ReplicationOptions,
}

/// Metadata accompanying a send stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRes {
    /// Whether the sender honored the resume token in the request
    pub used_resume_token: bool,
}

/// Batch of send requests to size without producing streams
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendDryReq {
    pub items: Vec<SendReq>,

    /// How many estimations the sender may run in parallel
    pub concurrency: usize,
}

/// Size estimate for one dry-run item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendDryItem {
    pub expected_size: u64,
}

/// Response to a batched dry-run send, item order matching the request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendDryRes {
    pub items: Vec<SendDryItem>,
}

/// Notification that a send stream was fully received.
///
/// Lets the sender release holds and advance its replication cursor for the
/// versions covered by the original request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendCompletedReq {
    pub original: SendReq,
}

/// Request to apply a send stream on the receiver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveReq {
    pub filesystem: String,

    pub to: FilesystemVersion,

    /// Discard any existing resume token before applying the stream
    pub clear_resume_token: bool,

    pub replication_options: ReplicationOptions,
}

/// Request to destroy a batch of snapshots on one filesystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestroySnapshotsReq {
    pub filesystem: String,
    pub snapshots: Vec<String>,
}

impl DestroySnapshotsReq {
    /// Build a destroy request.
    ///
    /// Panics on an empty batch: callers batch destroys deliberately and an
    /// empty list indicates a caller bug, not a runtime condition.
    pub fn new(filesystem: impl Into<String>, snapshots: Vec<String>) -> Self {
        let filesystem = filesystem.into();
        if snapshots.is_empty() {
            panic!("empty snapshot batch for destroy on {filesystem}");
        }
        Self {
            filesystem,
            snapshots,
        }
    }
}

/// Per-snapshot outcome of a destroy request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestroyResult {
    pub name: String,
    pub error: Option<String>,
}

/// Response to a destroy request, one entry per requested snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestroySnapshotsRes {
    pub results: Vec<DestroyResult>,
}

/// Request for the sender's replication cursor on one filesystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationCursorReq {
    pub filesystem: String,
}

/// The sender's replication cursor position, if one exists
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationCursorRes {
    pub guid: Option<u64>,
}

/// Capabilities common to both sides of a replication
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// List the filesystems this endpoint offers for replication
    async fn list_filesystems(&self) -> Result<Vec<Filesystem>>;

    /// List all versions (snapshots and bookmarks) of one filesystem
    async fn list_versions(&self, filesystem: &str) -> Result<Vec<FilesystemVersion>>;

    /// Destroy a batch of snapshots; used by pruning, and internally by the
    /// sender when `send_completed` retires obsolete replication cursors
    async fn destroy_snapshots(&self, req: DestroySnapshotsReq) -> Result<DestroySnapshotsRes>;

    /// Block until the endpoint is reachable or report why it is not
    async fn wait_for_connectivity(&self) -> Result<()>;
}

/// The sending side of a replication
#[async_trait]
pub trait Sender: Endpoint {
    /// Open a send stream.
    ///
    /// The stream is `None` only for dry-run requests; a non-dry send
    /// returning no stream is a protocol violation the caller must reject.
    async fn send(&self, req: SendReq) -> Result<(SendRes, Option<ByteStream>)>;

    /// Estimate sizes for a batch of send requests without producing streams
    async fn send_dry(&self, req: SendDryReq) -> Result<SendDryRes>;

    /// Signal that the stream for `req.original` was fully received, so the
    /// sender may release holds and advance its replication cursor.
    /// Idempotent best-effort.
    async fn send_completed(&self, req: SendCompletedReq) -> Result<()>;

    /// Report the current replication cursor for one filesystem
    async fn replication_cursor(&self, req: ReplicationCursorReq) -> Result<ReplicationCursorRes>;
}

/// The receiving side of a replication
#[async_trait]
pub trait Receiver: Endpoint {
    /// Apply a send stream. Drives `stream` to EOF or until an error on
    /// either side; a partial receive leaves a resume token behind.
    async fn receive(&self, req: ReceiveReq, stream: ByteStream) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destroy_req_keeps_batch() {
        let req = DestroySnapshotsReq::new("tank/data", vec!["a".into(), "b".into()]);
        assert_eq!(req.snapshots.len(), 2);
    }

    #[test]
    #[should_panic(expected = "empty snapshot batch")]
    fn test_destroy_req_panics_on_empty_batch() {
        DestroySnapshotsReq::new("tank/data", Vec::new());
    }
}
