//! Durable snapshot history of the content tree.
//!
//! The commit orchestrator only talks to [`VersionStore`]; the shipped
//! backend is [`GitVersionStore`], a bare git repository next to the content.

mod git;

pub use git::GitVersionStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::manifest::SnapshotId;

/// One entry of the history listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    /// Snapshot id.
    pub id: SnapshotId,
    /// Snapshot message.
    pub message: String,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Number of files captured.
    pub file_count: usize,
}

/// Linear snapshot history.
pub trait VersionStore: Send + Sync {
    /// Record the current on-disk state of `changed_paths` on top of the
    /// latest snapshot. The first snapshot captures the whole tree.
    fn snapshot(&self, changed_paths: &[String], message: &str) -> Result<SnapshotId>;

    /// Bytes of `path` at `snapshot`. `Ok(None)` when the path did not exist
    /// there; an unknown snapshot is [`FolioError::SnapshotNotFound`].
    ///
    /// [`FolioError::SnapshotNotFound`]: crate::error::FolioError::SnapshotNotFound
    fn read_file_at(&self, path: &str, snapshot: &SnapshotId) -> Result<Option<Vec<u8>>>;

    /// Latest snapshot, if any.
    fn head(&self) -> Result<Option<SnapshotId>>;

    /// Move the head back to `to` (or to "no history" with `None`).
    fn rewind(&self, to: Option<&SnapshotId>) -> Result<()>;

    /// Most recent snapshots first.
    fn history(&self, limit: usize) -> Result<Vec<SnapshotInfo>>;
}
