//! Version algebra: replication ordering, incremental paths, conflict
//! classification
//!
//! All functions here are pure; they operate on version lists snapshotted
//! from the endpoints at planning time.

use std::fmt;

use crate::version::{FilesystemVersion, VersionKind};

/// Why no incremental path exists between a receiver and a sender version
/// list.
///
/// The variants keep their payloads so the auto-resolver can pattern match
/// instead of re-deriving state from an error string.
#[derive(Debug, Clone)]
pub enum Conflict {
    /// The two lists share no GUID at all
    NoCommonAncestor {
        sorted_sender_versions: Vec<FilesystemVersion>,
        sorted_receiver_versions: Vec<FilesystemVersion>,
    },

    /// A common ancestor exists but the receiver has versions after it that
    /// the sender does not know
    DivergedAfter {
        common_ancestor: FilesystemVersion,
        sender_tip: FilesystemVersion,
        receiver_tip: FilesystemVersion,
    },

    /// The receiver diverged but already holds the sender's most recent
    /// version; replication is a no-op
    MostRecentAlreadyPresent { most_recent: FilesystemVersion },

    /// The sender offers nothing to replicate
    SenderHasNoVersions,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::NoCommonAncestor {
                sorted_sender_versions,
                sorted_receiver_versions,
            } => write!(
                f,
                "no common ancestor: sender has {} versions, receiver has {} versions, none shared",
                sorted_sender_versions.len(),
                sorted_receiver_versions.len()
            ),
            Conflict::DivergedAfter {
                common_ancestor,
                sender_tip,
                receiver_tip,
            } => write!(
                f,
                "receiver was modified since the last replication: diverged after {}, sender tip {}, receiver tip {}",
                common_ancestor, sender_tip, receiver_tip
            ),
            Conflict::MostRecentAlreadyPresent { most_recent } => write!(
                f,
                "the sender's most recent version {} is already present on the receiver",
                most_recent
            ),
            Conflict::SenderHasNoVersions => {
                f.write_str("sender does not have any versions")
            }
        }
    }
}

/// Sort versions into replication order: creation TXG ascending, with a
/// bookmark sorting before a snapshot in the same TXG.
///
/// A bookmark and a snapshot at the same TXG with the same GUID represent
/// the same point-in-time; putting the snapshot later means any
/// newest-to-oldest scan finds the snapshot first, and snapshots are the
/// preferred send endpoints.
pub fn sort_versions(mut versions: Vec<FilesystemVersion>) -> Vec<FilesystemVersion> {
    versions.sort_by(|a, b| {
        a.create_txg
            .cmp(&b.create_txg)
            .then_with(|| kind_rank(a.kind).cmp(&kind_rank(b.kind)))
    });
    versions
}

fn kind_rank(kind: VersionKind) -> u8 {
    match kind {
        VersionKind::Bookmark => 0,
        VersionKind::Snapshot => 1,
    }
}

/// Compute the incremental send path from `receiver` state to `sender`
/// state for one filesystem.
///
/// The result is `[base, s1, s2, ..., tip]` where `base` is the most recent
/// sender version whose GUID the receiver already holds and the rest are the
/// sender's later snapshots in TXG order (bookmarks cannot be send targets).
/// An empty result means the receiver is already up to date.
pub fn incremental_path(
    receiver: &[FilesystemVersion],
    sender: &[FilesystemVersion],
) -> Result<Vec<FilesystemVersion>, Conflict> {
    if sender.is_empty() {
        return Err(Conflict::SenderHasNoVersions);
    }
    let receiver = sort_versions(receiver.to_vec());
    let sender = sort_versions(sender.to_vec());

    // Most recent common ancestor by GUID. Scanning the sender from the
    // newest end prefers a snapshot over a bookmark sharing its GUID.
    let mut mrca: Option<(usize, usize)> = None;
    'rcv: for r in (0..receiver.len()).rev() {
        for s in (0..sender.len()).rev() {
            if sender[s].guid == receiver[r].guid {
                mrca = Some((r, s));
                break 'rcv;
            }
        }
    }

    let Some((mrca_rcv, mrca_snd)) = mrca else {
        return Err(Conflict::NoCommonAncestor {
            sorted_sender_versions: sender,
            sorted_receiver_versions: receiver,
        });
    };

    if mrca_rcv != receiver.len() - 1 {
        // The receiver continued past the common ancestor. If it already
        // holds the sender's tip there is nothing to send; otherwise the
        // histories truly diverged.
        let sender_tip = sender[sender.len() - 1].clone();
        if receiver.iter().any(|v| v.guid == sender_tip.guid) {
            return Err(Conflict::MostRecentAlreadyPresent {
                most_recent: sender_tip,
            });
        }
        return Err(Conflict::DivergedAfter {
            common_ancestor: sender[mrca_snd].clone(),
            sender_tip,
            receiver_tip: receiver[receiver.len() - 1].clone(),
        });
    }

    // The base may be a bookmark, but every later element must be a
    // snapshot.
    let mut path = Vec::with_capacity(sender.len() - mrca_snd);
    path.push(sender[mrca_snd].clone());
    for version in &sender[mrca_snd + 1..] {
        if version.is_snapshot() {
            path.push(version.clone());
        }
    }
    if path.len() == 1 {
        // base == tip, nothing to do
        path.clear();
    }
    Ok(path)
}
