//! Three-way sync planning.
//!
//! Every path in the union of the client manifest `C`, the last-known server
//! manifest `L` and the live server manifest `S` is classified by comparing
//! each side against `L`. Only presence and content hashes matter; modified
//! times never influence the outcome.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::manifest::{SnapshotId, SyncManifest};

/// Outcome for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeClassification {
    /// Nothing to do.
    Unchanged,
    /// Client created it; server never had it.
    UploadNew,
    /// Client edited it; server did not.
    UploadModified,
    /// Server created it; client never had it.
    DownloadNew,
    /// Server edited it; client did not.
    DownloadModified,
    /// Both sides edited (or created) it differently.
    Conflict,
    /// One side deleted it while the other edited it.
    DeleteModifyConflict,
    /// Server deleted it; client should delete its copy.
    DeleteLocal,
    /// Client deleted it; server should delete its copy.
    DeleteRemote,
}

impl ChangeClassification {
    /// The classification seen from the other side of the wire.
    pub fn mirrored(self) -> Self {
        use ChangeClassification::*;
        match self {
            UploadNew => DownloadNew,
            UploadModified => DownloadModified,
            DownloadNew => UploadNew,
            DownloadModified => UploadModified,
            DeleteLocal => DeleteRemote,
            DeleteRemote => DeleteLocal,
            Unchanged | Conflict | DeleteModifyConflict => self,
        }
    }

    /// Whether this outcome needs conflict resolution.
    pub fn is_conflict(self) -> bool {
        matches!(
            self,
            ChangeClassification::Conflict | ChangeClassification::DeleteModifyConflict
        )
    }
}

/// How one side relates to the last-known state of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SideState<'a> {
    Unchanged,
    Modified(&'a str),
    Deleted,
    New(&'a str),
    Absent,
}

fn side_state<'a>(side: Option<&'a str>, last_known: Option<&str>) -> SideState<'a> {
    match (last_known, side) {
        (Some(base), Some(hash)) if base == hash => SideState::Unchanged,
        (Some(_), Some(hash)) => SideState::Modified(hash),
        (Some(_), None) => SideState::Deleted,
        (None, Some(hash)) => SideState::New(hash),
        (None, None) => SideState::Absent,
    }
}

/// Classify a single path from its three content hashes.
pub fn classify(
    client: Option<&str>,
    last_known: Option<&str>,
    server: Option<&str>,
) -> ChangeClassification {
    use ChangeClassification::*;

    match (side_state(client, last_known), side_state(server, last_known)) {
        (SideState::Unchanged, SideState::Unchanged) => Unchanged,
        (SideState::Modified(_), SideState::Unchanged) => UploadModified,
        (SideState::Unchanged, SideState::Modified(_)) => DownloadModified,
        (SideState::Modified(c), SideState::Modified(s)) | (SideState::New(c), SideState::New(s)) => {
            if c == s {
                Unchanged
            } else {
                Conflict
            }
        }
        (SideState::New(_), SideState::Absent) => UploadNew,
        (SideState::Absent, SideState::New(_)) => DownloadNew,
        (SideState::Deleted, SideState::Unchanged) => DeleteRemote,
        (SideState::Unchanged, SideState::Deleted) => DeleteLocal,
        (SideState::Deleted, SideState::Modified(_)) | (SideState::Modified(_), SideState::Deleted) => {
            DeleteModifyConflict
        }
        (SideState::Deleted, SideState::Deleted) | (SideState::Absent, SideState::Absent) => {
            Unchanged
        }
        // Remaining pairs mix "L has it" with "L lacks it", which cannot happen
        // for the same path; treat them as conflicts rather than guess.
        _ => Conflict,
    }
}

/// What the client has to do to converge with the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    /// Paths the client should upload.
    pub to_upload: Vec<String>,
    /// Paths the client should download.
    pub to_download: Vec<String>,
    /// Paths changed on both sides.
    pub conflicts: Vec<String>,
    /// Paths the client should delete locally.
    pub to_delete_local: Vec<String>,
    /// Paths the client should ask the server to delete.
    pub to_delete_remote: Vec<String>,
    /// Server's current snapshot id.
    pub snapshot_id: Option<SnapshotId>,
    /// Per-path outcome for every path that is not `Unchanged`.
    #[serde(skip)]
    pub classifications: BTreeMap<String, ChangeClassification>,
}

impl SyncPlan {
    /// Whether every path is `Unchanged`.
    pub fn is_empty(&self) -> bool {
        self.to_upload.is_empty()
            && self.to_download.is_empty()
            && self.conflicts.is_empty()
            && self.to_delete_local.is_empty()
            && self.to_delete_remote.is_empty()
    }

    /// Outcome for one path.
    pub fn classification(&self, path: &str) -> ChangeClassification {
        self.classifications
            .get(path)
            .copied()
            .unwrap_or(ChangeClassification::Unchanged)
    }

    fn push(&mut self, path: &str, classification: ChangeClassification) {
        use ChangeClassification::*;

        let list = match classification {
            Unchanged => return,
            UploadNew | UploadModified => &mut self.to_upload,
            DownloadNew | DownloadModified => &mut self.to_download,
            Conflict | DeleteModifyConflict => &mut self.conflicts,
            DeleteLocal => &mut self.to_delete_local,
            DeleteRemote => &mut self.to_delete_remote,
        };
        list.push(path.to_string());
        self.classifications.insert(path.to_string(), classification);
    }
}

/// Build the plan for `client` against `last_known` and the live `server`.
pub fn plan_sync(
    client: &SyncManifest,
    last_known: &SyncManifest,
    server: &SyncManifest,
) -> SyncPlan {
    let all_paths: BTreeSet<&String> = client
        .paths()
        .chain(last_known.paths())
        .chain(server.paths())
        .collect();

    let mut plan = SyncPlan {
        snapshot_id: server.snapshot_id.clone(),
        ..SyncPlan::default()
    };

    for path in all_paths {
        let classification = classify(
            client.hash_of(path),
            last_known.hash_of(path),
            server.hash_of(path),
        );
        if classification != ChangeClassification::Unchanged {
            debug!("sync plan: {} -> {:?}", path, classification);
        }
        plan.push(path, classification);
    }

    plan
}
