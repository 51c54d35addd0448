//! Core domain types: filesystem descriptors and their versions

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Kind of a filesystem version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionKind {
    /// Named immutable point-in-time that retains data
    Snapshot,

    /// Metadata-only marker derived from a snapshot (no data)
    Bookmark,
}

impl VersionKind {
    /// Separator used in the version's full name (`@` or `#`)
    pub fn separator(&self) -> char {
        match self {
            VersionKind::Snapshot => '@',
            VersionKind::Bookmark => '#',
        }
    }
}

/// A snapshot or bookmark on one endpoint.
///
/// The GUID is assigned by the storage layer and identifies the point-in-time
/// regardless of name; it survives renames and crosses the sender/receiver
/// boundary on a successful receive. Within one filesystem two entries may
/// share a GUID only if one is a snapshot and the other a bookmark derived
/// from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemVersion {
    /// Path of the owning filesystem
    pub filesystem: String,

    /// Short name (no filesystem prefix, no separator)
    pub name: String,

    /// Snapshot or bookmark
    pub kind: VersionKind,

    /// Storage-assigned 64-bit identifier, stable across renames
    pub guid: u64,

    /// Transaction group the version was created in; monotonically
    /// increasing per pool
    pub create_txg: u64,

    /// Wall-clock creation time (advisory only)
    pub creation: SystemTime,
}

impl FilesystemVersion {
    /// Create a snapshot version
    pub fn snapshot(
        filesystem: impl Into<String>,
        name: impl Into<String>,
        guid: u64,
        create_txg: u64,
    ) -> Self {
        Self {
            filesystem: filesystem.into(),
            name: name.into(),
            kind: VersionKind::Snapshot,
            guid,
            create_txg,
            creation: SystemTime::UNIX_EPOCH,
        }
    }

    /// Create a bookmark version
    pub fn bookmark(
        filesystem: impl Into<String>,
        name: impl Into<String>,
        guid: u64,
        create_txg: u64,
    ) -> Self {
        Self {
            filesystem: filesystem.into(),
            name: name.into(),
            kind: VersionKind::Bookmark,
            guid,
            create_txg,
            creation: SystemTime::UNIX_EPOCH,
        }
    }

    /// Check if this version is a snapshot
    pub fn is_snapshot(&self) -> bool {
        self.kind == VersionKind::Snapshot
    }

    /// Name relative to the filesystem, e.g. `@daily-2024-01-01` or `#cursor`
    pub fn rel_name(&self) -> String {
        format!("{}{}", self.kind.separator(), self.name)
    }

    /// Fully qualified name, e.g. `tank/data@daily-2024-01-01`
    pub fn full_name(&self) -> String {
        format!("{}{}{}", self.filesystem, self.kind.separator(), self.name)
    }
}

impl fmt::Display for FilesystemVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rel_name())
    }
}

/// Filesystem descriptor as reported by an endpoint's `list_filesystems`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filesystem {
    /// Dataset path, e.g. `tank/data`
    pub path: String,

    /// Receiver-created empty stand-in for an intermediate path
    pub is_placeholder: bool,

    /// Token reported by the storage layer when a previous receive was
    /// interrupted; receiver side only
    pub resume_token: Option<String>,
}

impl Filesystem {
    /// Create a plain filesystem descriptor
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_placeholder: false,
            resume_token: None,
        }
    }

    /// Create a placeholder descriptor
    pub fn placeholder(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_placeholder: true,
            resume_token: None,
        }
    }

    /// Attach a resume token to this descriptor
    pub fn with_resume_token(mut self, token: impl Into<String>) -> Self {
        self.resume_token = Some(token.into());
        self
    }
}

/// One replication candidate: the sender-side descriptor paired with the
/// receiver-side descriptor for the same path, if the receiver has one.
/// An absent receiver side means initial replication.
#[derive(Debug, Clone)]
pub struct FilesystemPair {
    pub sender_fs: Filesystem,
    pub receiver_fs: Option<Filesystem>,
}

impl FilesystemPair {
    /// Path both sides share
    pub fn path(&self) -> &str {
        &self.sender_fs.path
    }
}
