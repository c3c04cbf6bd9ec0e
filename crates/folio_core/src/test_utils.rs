//! Test utilities for folio_core
//!
//! An in-memory [`VersionStore`] that reads changed files straight from a
//! [`ContentFs`], with a switch to make snapshots fail.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;

use crate::error::{FolioError, Result};
use crate::fs::ContentFs;
use crate::manifest::{SnapshotId, build_manifest};
use crate::version_store::{SnapshotInfo, VersionStore};

struct StoredSnapshot {
    info: SnapshotInfo,
    files: BTreeMap<String, Vec<u8>>,
}

#[derive(Default)]
struct MemoryState {
    snapshots: Vec<StoredSnapshot>,
    head: Option<usize>,
}

/// Version store kept in memory.
pub struct MemoryVersionStore {
    content: ContentFs,
    state: Mutex<MemoryState>,
    fail_snapshots: AtomicBool,
}

impl MemoryVersionStore {
    /// Empty history over `content`.
    pub fn new(content: ContentFs) -> Self {
        Self {
            content,
            state: Mutex::new(MemoryState::default()),
            fail_snapshots: AtomicBool::new(false),
        }
    }

    /// Make every following `snapshot` call fail.
    pub fn set_fail_snapshots(&self, fail: bool) {
        self.fail_snapshots.store(fail, Ordering::SeqCst);
    }

    /// Number of snapshots reachable from head.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().head.map_or(0, |h| h + 1)
    }
}

impl VersionStore for MemoryVersionStore {
    fn snapshot(&self, changed_paths: &[String], message: &str) -> Result<SnapshotId> {
        if self.fail_snapshots.load(Ordering::SeqCst) {
            return Err(FolioError::Snapshot("injected snapshot failure".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        let (mut files, paths) = match state.head {
            Some(head) => (state.snapshots[head].files.clone(), changed_paths.to_vec()),
            None => (
                BTreeMap::new(),
                build_manifest(self.content.root())
                    .manifest
                    .paths()
                    .cloned()
                    .collect(),
            ),
        };
        for path in &paths {
            match self.content.read(path)? {
                Some(bytes) => {
                    files.insert(path.clone(), bytes);
                }
                None => {
                    files.remove(path);
                }
            }
        }

        let index = state.head.map_or(0, |h| h + 1);
        state.snapshots.truncate(index);
        let id = SnapshotId(format!("mem-{index}"));
        state.snapshots.push(StoredSnapshot {
            info: SnapshotInfo {
                id: id.clone(),
                message: message.to_string(),
                timestamp: Utc::now(),
                file_count: files.len(),
            },
            files,
        });
        state.head = Some(index);
        Ok(id)
    }

    fn read_file_at(&self, path: &str, snapshot: &SnapshotId) -> Result<Option<Vec<u8>>> {
        let state = self.state.lock().unwrap();
        let stored = state
            .snapshots
            .iter()
            .find(|s| &s.info.id == snapshot)
            .ok_or_else(|| FolioError::SnapshotNotFound(snapshot.to_string()))?;
        Ok(stored.files.get(path).cloned())
    }

    fn head(&self) -> Result<Option<SnapshotId>> {
        let state = self.state.lock().unwrap();
        Ok(state.head.map(|h| state.snapshots[h].info.id.clone()))
    }

    fn rewind(&self, to: Option<&SnapshotId>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.head = match to {
            Some(id) => Some(
                state
                    .snapshots
                    .iter()
                    .position(|s| &s.info.id == id)
                    .ok_or_else(|| FolioError::SnapshotNotFound(id.to_string()))?,
            ),
            None => None,
        };
        Ok(())
    }

    fn history(&self, limit: usize) -> Result<Vec<SnapshotInfo>> {
        let state = self.state.lock().unwrap();
        let Some(head) = state.head else {
            return Ok(Vec::new());
        };
        Ok(state.snapshots[..=head]
            .iter()
            .rev()
            .take(limit)
            .map(|s| s.info.clone())
            .collect())
    }
}
