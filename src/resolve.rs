//! Automatic conflict resolution for initial replication

use tracing::debug;

use crate::config::InitialReplication;
use crate::diff::Conflict;
use crate::error::{Error, Result};
use crate::version::FilesystemVersion;

/// A replication path whose first element may be absent, signalling a full
/// send of the second element
pub type ResolvedPath = Vec<Option<FilesystemVersion>>;

/// Try to turn a classified conflict into an acceptable replication path.
///
/// Only two situations are ever auto-resolved: the sender's most recent
/// version already being present (a no-op), and an initial replication
/// (no common ancestor, receiver empty) under a permissive policy. Anything
/// else — a diverged receiver, a non-empty receiver with no shared history —
/// surfaces to the caller untouched.
pub fn try_autoresolve_conflict(
    conflict: Conflict,
    policy: InitialReplication,
) -> Result<ResolvedPath> {
    match conflict {
        Conflict::MostRecentAlreadyPresent { most_recent } => {
            debug!(version = %most_recent, "most recent version already on receiver");
            Ok(Vec::new())
        }

        Conflict::SenderHasNoVersions => Err(Conflict::SenderHasNoVersions.into()),

        Conflict::NoCommonAncestor {
            sorted_sender_versions,
            sorted_receiver_versions,
        } if sorted_receiver_versions.is_empty() => {
            if sorted_sender_versions.is_empty() {
                return Err(Conflict::SenderHasNoVersions.into());
            }
            resolve_initial(sorted_sender_versions, sorted_receiver_versions, policy)
        }

        other => Err(other.into()),
    }
}

fn resolve_initial(
    sender_versions: Vec<FilesystemVersion>,
    receiver_versions: Vec<FilesystemVersion>,
    policy: InitialReplication,
) -> Result<ResolvedPath> {
    match policy {
        InitialReplication::MostRecent => {
            // Bookmarks carry no data and cannot seed a full send.
            let most_recent = sender_versions
                .iter()
                .rev()
                .find(|v| v.is_snapshot())
                .cloned();
            match most_recent {
                Some(snapshot) => Ok(vec![None, Some(snapshot)]),
                None => Err(unresolved(sender_versions, receiver_versions)),
            }
        }

        InitialReplication::All => {
            let mut path: ResolvedPath = vec![None];
            path.extend(
                sender_versions
                    .iter()
                    .filter(|v| v.is_snapshot())
                    .cloned()
                    .map(Some),
            );
            if path.len() == 1 {
                return Err(unresolved(sender_versions, receiver_versions));
            }
            Ok(path)
        }

        InitialReplication::Fail => Err(unresolved(sender_versions, receiver_versions)),
    }
}

fn unresolved(
    sorted_sender_versions: Vec<FilesystemVersion>,
    sorted_receiver_versions: Vec<FilesystemVersion>,
) -> Error {
    Conflict::NoCommonAncestor {
        sorted_sender_versions,
        sorted_receiver_versions,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::VersionKind;

    fn snap(name: &str, guid: u64, txg: u64) -> FilesystemVersion {
        FilesystemVersion::snapshot("tank/data", name, guid, txg)
    }

    fn bookmark(name: &str, guid: u64, txg: u64) -> FilesystemVersion {
        FilesystemVersion::bookmark("tank/data", name, guid, txg)
    }

    fn initial_conflict(sender: Vec<FilesystemVersion>) -> Conflict {
        Conflict::NoCommonAncestor {
            sorted_sender_versions: sender,
            sorted_receiver_versions: Vec::new(),
        }
    }

    #[test]
    fn test_most_recent_picks_latest_snapshot() {
        let conflict = initial_conflict(vec![
            snap("a", 1, 10),
            snap("b", 2, 20),
            bookmark("c", 3, 30),
        ]);

        let path =
            try_autoresolve_conflict(conflict, InitialReplication::MostRecent).unwrap();
        assert_eq!(path.len(), 2);
        assert!(path[0].is_none());
        assert_eq!(path[1].as_ref().unwrap().name, "b");
    }

    #[test]
    fn test_all_keeps_every_snapshot_in_order() {
        let conflict = initial_conflict(vec![
            snap("a", 1, 10),
            bookmark("x", 9, 15),
            snap("b", 2, 20),
            snap("c", 3, 30),
        ]);

        let path = try_autoresolve_conflict(conflict, InitialReplication::All).unwrap();
        assert!(path[0].is_none());
        let names: Vec<_> = path[1..]
            .iter()
            .map(|v| v.as_ref().unwrap().name.clone())
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert!(path[1..]
            .iter()
            .all(|v| v.as_ref().unwrap().kind == VersionKind::Snapshot));
    }

    #[test]
    fn test_fail_policy_propagates_conflict() {
        let conflict = initial_conflict(vec![snap("a", 1, 10)]);
        let err = try_autoresolve_conflict(conflict, InitialReplication::Fail).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_most_recent_already_present_is_noop() {
        let conflict = Conflict::MostRecentAlreadyPresent {
            most_recent: snap("b", 2, 20),
        };
        let path = try_autoresolve_conflict(conflict, InitialReplication::Fail).unwrap();
        assert!(path.is_empty());
    }

    #[test]
    fn test_nonempty_receiver_never_resolved() {
        let conflict = Conflict::NoCommonAncestor {
            sorted_sender_versions: vec![snap("a", 1, 10)],
            sorted_receiver_versions: vec![snap("x", 99, 5)],
        };
        let err = try_autoresolve_conflict(conflict, InitialReplication::All).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_diverged_never_resolved() {
        let conflict = Conflict::DivergedAfter {
            common_ancestor: snap("a", 1, 10),
            sender_tip: snap("b", 2, 20),
            receiver_tip: snap("r", 50, 25),
        };
        let err = try_autoresolve_conflict(conflict, InitialReplication::All).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_sender_without_versions_is_terminal() {
        let err = try_autoresolve_conflict(
            initial_conflict(Vec::new()),
            InitialReplication::All,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Conflict {
                conflict: Conflict::SenderHasNoVersions
            }
        ));
    }

    #[test]
    fn test_bookmark_only_sender_not_resolvable() {
        let conflict = initial_conflict(vec![bookmark("a", 1, 10)]);
        let err =
            try_autoresolve_conflict(conflict, InitialReplication::MostRecent).unwrap_err();
        assert!(err.is_conflict());
    }
}
