//! Commit orchestration: the only code path that mutates the content tree,
//! the persisted sync manifest and the snapshot history.
//!
//! Every mutating operation runs under one process-wide write lock, for the
//! whole write, snapshot and manifest persist sequence. Read-only operations
//! (status, download, history) never take it.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::SiteConfig;
use crate::error::{FolioError, Result};
use crate::frontmatter;
use crate::fs::{BACKUP_SUFFIX, ContentFs, TEMP_SUFFIX, Transaction};
use crate::manifest::{SnapshotId, SyncManifest, build_manifest, hash_bytes};
use crate::merge::{MergeStatus, merge_document};
use crate::path::normalize_relative_path;
use crate::planner::{SyncPlan, plan_sync};
use crate::version_store::{GitVersionStore, SnapshotInfo, VersionStore};

/// Content tree directory under the data dir.
pub const CONTENT_DIR: &str = "content";
/// Snapshot repository under the data dir.
pub const HISTORY_DIR: &str = "history.git";
/// Persisted last-known manifest under the data dir.
pub const MANIFEST_FILE: &str = "sync-manifest.json";
/// Site configuration under the data dir.
pub const CONFIG_FILE: &str = "folio.toml";

/// One file sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Root-relative path.
    pub path: String,
    /// Raw bytes.
    pub content: Vec<u8>,
}

/// A batch of client changes.
#[derive(Debug, Clone, Default)]
pub struct CommitRequest {
    /// Paths the client deleted.
    pub deleted_files: Vec<String>,
    /// Files the client created or edited.
    pub uploaded_files: Vec<UploadedFile>,
    /// Snapshot the client last synced at; the merge base comes from here.
    pub last_sync_commit: Option<SnapshotId>,
}

/// Why a path ended up in the conflict report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// Both sides edited the same region or field.
    Content,
    /// One side deleted what the other edited.
    DeleteModify,
    /// No common ancestor was available; the server copy was kept.
    NoMergeBase,
    /// A file without front matter was overwritten with the client's bytes.
    LastWriterWins,
}

/// A conflict the client should know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictReport {
    /// Conflicting path.
    pub path: String,
    /// Whether the body fell back to the server's text.
    pub body_conflicted: bool,
    /// Front matter fields that fell back to the server's value.
    pub field_conflicts: Vec<String>,
    /// What happened.
    pub reason: ConflictReason,
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitOutcome {
    /// Snapshot now reflecting the server state.
    pub new_snapshot_id: SnapshotId,
    /// Paths whose server bytes differ from what the client holds.
    pub to_download: Vec<String>,
    /// Paths removed on the server since the client's last sync.
    pub to_delete_local: Vec<String>,
    /// Conflicts, sorted by path.
    pub conflicts: Vec<ConflictReport>,
    /// Non-fatal notes (unrecognized metadata, unreadable files).
    pub warnings: Vec<String>,
}

/// Result of a single post write or delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostOutcome {
    /// Snapshot taken after the change.
    pub snapshot_id: SnapshotId,
    /// Normalized path.
    pub path: String,
    /// Non-fatal notes.
    pub warnings: Vec<String>,
}

/// Where a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    /// A sync commit.
    Sync,
    /// A direct post write or delete.
    Post,
}

/// Emitted after content changed and was snapshotted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Snapshot that captured the change.
    pub snapshot_id: SnapshotId,
    /// Paths written or deleted.
    pub changed_paths: Vec<String>,
    /// Origin of the change.
    pub source: ChangeSource,
}

/// Receives change events. Must not block; delivery is fire-and-forget.
pub trait ChangeNotifier: Send + Sync {
    /// Handle one event.
    fn notify(&self, event: ChangeEvent);
}

/// Notifier that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {
    fn notify(&self, _event: ChangeEvent) {}
}

/// Owns the content tree, its history and the last-known manifest.
pub struct SyncEngine {
    content: ContentFs,
    store: Arc<dyn VersionStore>,
    manifest_path: PathBuf,
    config: SiteConfig,
    notifier: Arc<dyn ChangeNotifier>,
    write_lock: Mutex<()>,
}

impl SyncEngine {
    /// Assemble an engine from its parts.
    pub fn new(
        content: ContentFs,
        store: Arc<dyn VersionStore>,
        manifest_path: impl Into<PathBuf>,
        config: SiteConfig,
    ) -> Self {
        Self {
            content,
            store,
            manifest_path: manifest_path.into(),
            config,
            notifier: Arc::new(NoopNotifier),
            write_lock: Mutex::new(()),
        }
    }

    /// Open the standard layout under `data_dir`: `content/`, `history.git`,
    /// `sync-manifest.json` and an optional `folio.toml`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let config = SiteConfig::load(&data_dir.join(CONFIG_FILE))?;
        let content = ContentFs::new(data_dir.join(CONTENT_DIR))?;
        let store = Arc::new(GitVersionStore::new(
            data_dir.join(HISTORY_DIR),
            content.clone(),
            &config,
        ));
        info!("Opened content at {}", content.root().display());
        Ok(Self::new(content, store, data_dir.join(MANIFEST_FILE), config))
    }

    /// Replace the change notifier.
    pub fn with_notifier(mut self, notifier: Arc<dyn ChangeNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|poisoned| {
            warn!("Write lock was poisoned by a panicked writer; continuing");
            poisoned.into_inner()
        })
    }

    /// Last-known manifest as persisted by the previous commit.
    pub fn last_known_manifest(&self) -> Result<SyncManifest> {
        SyncManifest::load(&self.manifest_path)
    }

    fn current_manifest(&self, warnings: &mut Vec<String>) -> Result<SyncManifest> {
        let build = build_manifest(self.content.root());
        for skipped in &build.skipped {
            warnings.push(format!(
                "Skipped unreadable file {}: {}",
                skipped.path.display(),
                skipped.reason
            ));
        }
        let mut manifest = build.manifest;
        manifest.snapshot_id = self.store.head()?;
        Ok(manifest)
    }

    /// Live server manifest tagged with the current head snapshot.
    pub fn server_manifest(&self) -> Result<SyncManifest> {
        self.current_manifest(&mut Vec::new())
    }

    /// Plan what `client` has to do. Takes no lock.
    pub fn status(&self, client: &SyncManifest) -> Result<SyncPlan> {
        let last_known = self.last_known_manifest()?;
        let server = self.server_manifest()?;
        let plan = plan_sync(client, &last_known, &server);
        debug!(
            "Status: {} up, {} down, {} conflicts, {} local deletes, {} remote deletes",
            plan.to_upload.len(),
            plan.to_download.len(),
            plan.conflicts.len(),
            plan.to_delete_local.len(),
            plan.to_delete_remote.len()
        );
        Ok(plan)
    }

    /// Read one file for download.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.content
            .read(path)?
            .ok_or_else(|| FolioError::NotFound(path.to_string()))
    }

    /// Open one file for a streamed download.
    pub fn open_file(&self, path: &str) -> Result<fs::File> {
        self.content.open(path)
    }

    /// Most recent snapshots first.
    pub fn history(&self, limit: usize) -> Result<Vec<SnapshotInfo>> {
        self.store.history(limit)
    }

    /// Apply a batch of client changes.
    ///
    /// Either every file change, the snapshot and the manifest are recorded,
    /// or the content tree is left as it was.
    pub fn commit(&self, request: CommitRequest) -> Result<CommitOutcome> {
        let ValidatedRequest {
            uploads,
            deletes,
            last_sync_commit,
        } = validate_request(request)?;

        let _guard = self.lock();
        let now = Utc::now();
        let mut warnings = Vec::new();
        let last_known = self.last_known_manifest()?;
        let server = self.current_manifest(&mut warnings)?;

        let mut tx = Transaction::new(&self.content);
        let mut conflicts = Vec::new();
        let mut to_download = BTreeSet::new();

        for path in &deletes {
            let server_hash = server.hash_of(path);
            if server_hash.is_some() && server_hash != last_known.hash_of(path) {
                warn!("Delete/modify conflict on {}: keeping the server copy", path);
                conflicts.push(ConflictReport {
                    path: path.clone(),
                    body_conflicted: false,
                    field_conflicts: Vec::new(),
                    reason: ConflictReason::DeleteModify,
                });
                to_download.insert(path.clone());
            } else if server_hash.is_some() {
                tx.delete(path.clone());
            }
        }

        for upload in &uploads {
            let path = &upload.path;
            let upload_hash = hash_bytes(&upload.content);
            let server_hash = server.hash_of(path);
            let last_hash = last_known.hash_of(path);
            if server_hash == Some(upload_hash.as_str()) {
                continue;
            }

            let (final_bytes, report) = if server_hash.is_some() && server_hash != last_hash {
                self.resolve_conflict(upload, last_sync_commit.as_ref(), now, &mut warnings)?
            } else if server_hash.is_none() && last_hash.is_some() {
                warn!("{} was deleted on the server but edited by the client; restoring it", path);
                let bytes = self.prepare_upload(upload, false, None, now, &mut warnings)?;
                let report = ConflictReport {
                    path: path.clone(),
                    body_conflicted: false,
                    field_conflicts: Vec::new(),
                    reason: ConflictReason::DeleteModify,
                };
                (bytes, Some(report))
            } else {
                let server_bytes = match server_hash {
                    Some(_) => self.content.read(path)?,
                    None => None,
                };
                let bytes = self.prepare_upload(
                    upload,
                    last_hash.is_none(),
                    server_bytes.as_deref(),
                    now,
                    &mut warnings,
                )?;
                (bytes, None)
            };

            conflicts.extend(report);
            if final_bytes != upload.content {
                to_download.insert(path.clone());
            }
            if server_hash != Some(hash_bytes(&final_bytes).as_str()) {
                tx.write(path.clone(), final_bytes);
            }
        }

        // The manifest persisted below absorbs every server-side change since
        // the last sync, so the client has to hear about all of them now.
        let mut to_delete_local = BTreeSet::new();
        let touched: HashSet<&str> = uploads
            .iter()
            .map(|u| u.path.as_str())
            .chain(deletes.iter().map(String::as_str))
            .collect();
        let candidates: BTreeSet<&String> = server.paths().chain(last_known.paths()).collect();
        for path in candidates {
            if touched.contains(path.as_str()) || server.hash_of(path) == last_known.hash_of(path) {
                continue;
            }
            if server.contains(path) {
                to_download.insert(path.clone());
            } else {
                to_delete_local.insert(path.clone());
            }
        }

        let nothing_staged = tx.is_empty();
        let changed = tx.paths();
        let previous_head = self.store.head()?;
        tx.apply()?;

        let message = format!(
            "Sync: {} uploaded, {} deleted",
            uploads.len(),
            deletes.len()
        );
        let snapshot_id = match (&previous_head, nothing_staged) {
            (Some(head), true) => head.clone(),
            _ => match self.store.snapshot(&changed, &message) {
                Ok(id) => id,
                Err(e) => {
                    error!("Snapshot failed, rolling back {} paths: {}", changed.len(), e);
                    tx.rollback();
                    return Err(snapshot_error(e));
                }
            },
        };
        let took_snapshot = previous_head.as_ref() != Some(&snapshot_id);

        let mut manifest = build_manifest(self.content.root()).manifest;
        manifest.snapshot_id = Some(snapshot_id.clone());
        if let Err(e) = manifest.save(&self.manifest_path) {
            error!("Persisting manifest failed, rolling back: {}", e);
            tx.rollback();
            if took_snapshot && let Err(rewind_err) = self.store.rewind(previous_head.as_ref()) {
                error!("Rewinding history failed: {}", rewind_err);
            }
            return Err(e);
        }

        if !nothing_staged {
            self.notifier.notify(ChangeEvent {
                snapshot_id: snapshot_id.clone(),
                changed_paths: changed.clone(),
                source: ChangeSource::Sync,
            });
        }

        conflicts.sort_by(|a, b| a.path.cmp(&b.path));
        info!(
            "Commit {}: {} changed, {} conflicts, {} to download, {} to delete locally",
            snapshot_id,
            changed.len(),
            conflicts.len(),
            to_download.len(),
            to_delete_local.len()
        );

        Ok(CommitOutcome {
            new_snapshot_id: snapshot_id,
            to_download: to_download.into_iter().collect(),
            to_delete_local: to_delete_local.into_iter().collect(),
            conflicts,
            warnings,
        })
    }

    /// Write one post outside of sync. The sync manifest is not advanced, so
    /// the next status reports it as a server-side change.
    pub fn write_post(&self, path: &str, content: Vec<u8>) -> Result<PostOutcome> {
        let path = normalize_relative_path(path)?;
        reject_reserved(&path)?;

        let _guard = self.lock();
        let now = Utc::now();
        let mut warnings = Vec::new();
        let existing = self.content.read(&path)?;
        let upload = UploadedFile {
            path: path.clone(),
            content,
        };
        let bytes = self.prepare_upload(
            &upload,
            existing.is_none(),
            existing.as_deref(),
            now,
            &mut warnings,
        )?;

        let mut tx = Transaction::new(&self.content);
        tx.write(path.clone(), bytes);
        let snapshot_id = self.apply_and_snapshot(tx, &format!("Update {}", path))?;
        Ok(PostOutcome {
            snapshot_id,
            path,
            warnings,
        })
    }

    /// Delete one post outside of sync.
    pub fn delete_post(&self, path: &str) -> Result<PostOutcome> {
        let path = normalize_relative_path(path)?;

        let _guard = self.lock();
        if self.content.read(&path)?.is_none() {
            return Err(FolioError::NotFound(path));
        }
        let mut tx = Transaction::new(&self.content);
        tx.delete(path.clone());
        let snapshot_id = self.apply_and_snapshot(tx, &format!("Delete {}", path))?;
        Ok(PostOutcome {
            snapshot_id,
            path,
            warnings: Vec::new(),
        })
    }

    /// Caller holds the write lock.
    fn apply_and_snapshot(&self, mut tx: Transaction<'_>, message: &str) -> Result<SnapshotId> {
        let changed = tx.paths();
        tx.apply()?;
        let snapshot_id = match self.store.snapshot(&changed, message) {
            Ok(id) => id,
            Err(e) => {
                error!("Snapshot failed for {:?}: {}", changed, e);
                tx.rollback();
                return Err(snapshot_error(e));
            }
        };
        info!("{} -> {}", message, snapshot_id);
        self.notifier.notify(ChangeEvent {
            snapshot_id: snapshot_id.clone(),
            changed_paths: changed,
            source: ChangeSource::Post,
        });
        Ok(snapshot_id)
    }

    /// Bytes to store for a non-conflicting upload: metadata files are
    /// normalized, everything else is kept verbatim.
    fn prepare_upload(
        &self,
        upload: &UploadedFile,
        is_new: bool,
        server_bytes: Option<&[u8]>,
        now: DateTime<Utc>,
        warnings: &mut Vec<String>,
    ) -> Result<Vec<u8>> {
        if !self.config.is_metadata_file(&upload.path) {
            return Ok(upload.content.clone());
        }
        let text = utf8(&upload.path, &upload.content)?;
        let mut doc = frontmatter::parse(&upload.path, text)?;
        report_repeated_keys(&doc, &upload.path, warnings);
        if is_new {
            doc.frontmatter
                .normalize_new(&upload.path, now, &self.config.default_author);
        } else {
            let server_fm = server_bytes.map(|bytes| {
                frontmatter::parse_lenient(&upload.path, &String::from_utf8_lossy(bytes)).frontmatter
            });
            doc.frontmatter.normalize_existing(now, server_fm.as_ref());
        }
        collect_warnings(&doc.frontmatter, &upload.path, warnings);
        Ok(doc.render().into_bytes())
    }

    /// The server changed `upload.path` since the last sync and the client
    /// sent something different.
    fn resolve_conflict(
        &self,
        upload: &UploadedFile,
        last_sync_commit: Option<&SnapshotId>,
        now: DateTime<Utc>,
        warnings: &mut Vec<String>,
    ) -> Result<(Vec<u8>, Option<ConflictReport>)> {
        let path = &upload.path;
        let server_bytes = self.content.read(path)?.unwrap_or_default();

        if !self.config.is_metadata_file(path) {
            warn!("Conflict on {}: client bytes win", path);
            let report = ConflictReport {
                path: path.clone(),
                body_conflicted: false,
                field_conflicts: Vec::new(),
                reason: ConflictReason::LastWriterWins,
            };
            return Ok((upload.content.clone(), Some(report)));
        }

        let client_text = utf8(path, &upload.content)?;
        let client_doc = frontmatter::parse(path, client_text)?;
        report_repeated_keys(&client_doc, path, warnings);
        let server_text = String::from_utf8_lossy(&server_bytes);

        let base = match self.load_merge_base(path, last_sync_commit) {
            Ok(base) => Some(base),
            Err(e) => {
                warn!("{}; keeping the server copy", e);
                None
            }
        };
        let result = merge_document(path, base.as_deref(), &server_text, client_text);

        let final_bytes = if base.is_some() {
            let merged = String::from_utf8_lossy(&result.content);
            let mut doc = frontmatter::parse_lenient(path, &merged);
            let server_fm = frontmatter::parse_lenient(path, &server_text).frontmatter;
            doc.frontmatter.normalize_existing(now, Some(&server_fm));
            collect_warnings(&doc.frontmatter, path, warnings);
            doc.render().into_bytes()
        } else {
            result.content
        };

        let report = (result.status == MergeStatus::Conflicted).then(|| ConflictReport {
            path: path.clone(),
            body_conflicted: result.body_conflicted,
            field_conflicts: result.field_conflicts.into_iter().collect(),
            reason: if base.is_some() {
                ConflictReason::Content
            } else {
                ConflictReason::NoMergeBase
            },
        });
        if report.is_none() {
            debug!("Merged concurrent edits to {} cleanly", path);
        }
        Ok((final_bytes, report))
    }

    fn load_merge_base(&self, path: &str, snapshot: Option<&SnapshotId>) -> Result<String> {
        let unavailable = |reason: String| FolioError::MergeBaseUnavailable {
            path: path.to_string(),
            reason,
        };
        let snapshot = snapshot.ok_or_else(|| unavailable("client has never synced".to_string()))?;
        match self.store.read_file_at(path, snapshot) {
            Ok(Some(bytes)) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Ok(None) => Err(unavailable(format!("not present at snapshot {}", snapshot))),
            Err(e) => Err(unavailable(e.to_string())),
        }
    }
}

fn collect_warnings(fm: &frontmatter::FrontMatterDocument, path: &str, warnings: &mut Vec<String>) {
    for warning in fm.unrecognized_warnings(path) {
        warn!("{}", warning);
        warnings.push(warning);
    }
}

fn report_repeated_keys(doc: &frontmatter::ParsedDocument, path: &str, warnings: &mut Vec<String>) {
    for key in &doc.repeated_keys {
        warnings.push(format!(
            "{}: metadata field '{}' appears more than once; the last value was kept",
            path, key
        ));
    }
}

fn utf8<'a>(path: &str, bytes: &'a [u8]) -> Result<&'a str> {
    std::str::from_utf8(bytes)
        .map_err(|e| FolioError::Validation(format!("{} is not valid UTF-8: {}", path, e)))
}

fn snapshot_error(e: FolioError) -> FolioError {
    match e {
        FolioError::Snapshot(_) => e,
        other => FolioError::Snapshot(other.to_string()),
    }
}

fn reject_reserved(path: &str) -> Result<()> {
    if path.ends_with(TEMP_SUFFIX) || path.ends_with(BACKUP_SUFFIX) {
        return Err(FolioError::Validation(format!(
            "Path uses a reserved suffix: {}",
            path
        )));
    }
    Ok(())
}

struct ValidatedRequest {
    uploads: Vec<UploadedFile>,
    deletes: Vec<String>,
    last_sync_commit: Option<SnapshotId>,
}

/// Normalize every path and reject duplicates before anything is touched.
fn validate_request(request: CommitRequest) -> Result<ValidatedRequest> {
    let mut uploaded = HashSet::new();
    let mut uploads = Vec::with_capacity(request.uploaded_files.len());
    for file in request.uploaded_files {
        let path = normalize_relative_path(&file.path)?;
        reject_reserved(&path)?;
        if !uploaded.insert(path.clone()) {
            return Err(FolioError::Validation(format!("Duplicate upload: {}", path)));
        }
        uploads.push(UploadedFile {
            path,
            content: file.content,
        });
    }

    let mut deleted = HashSet::new();
    let mut deletes = Vec::with_capacity(request.deleted_files.len());
    for raw in request.deleted_files {
        let path = normalize_relative_path(&raw)?;
        if uploaded.contains(&path) {
            return Err(FolioError::Validation(format!(
                "Path both uploaded and deleted: {}",
                path
            )));
        }
        if !deleted.insert(path.clone()) {
            return Err(FolioError::Validation(format!("Duplicate delete: {}", path)));
        }
        deletes.push(path);
    }

    Ok(ValidatedRequest {
        uploads,
        deletes,
        last_sync_commit: request.last_sync_commit,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::manifest::ManifestEntry;
    use crate::test_utils::MemoryVersionStore;

    struct Harness {
        _dir: tempfile::TempDir,
        store: Arc<MemoryVersionStore>,
        events: Arc<RecordingNotifier>,
        engine: SyncEngine,
    }

    #[derive(Default)]
    struct RecordingNotifier {
        events: StdMutex<Vec<ChangeEvent>>,
    }

    impl ChangeNotifier for RecordingNotifier {
        fn notify(&self, event: ChangeEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let content = ContentFs::new(dir.path().join(CONTENT_DIR)).unwrap();
        let store = Arc::new(MemoryVersionStore::new(content.clone()));
        let events = Arc::new(RecordingNotifier::default());
        let config = SiteConfig {
            default_author: "Site Owner".to_string(),
            ..SiteConfig::default()
        };
        let engine = SyncEngine::new(
            content,
            store.clone(),
            dir.path().join(MANIFEST_FILE),
            config,
        )
        .with_notifier(events.clone());
        Harness {
            _dir: dir,
            store,
            events,
            engine,
        }
    }

    fn upload(path: &str, content: &str) -> UploadedFile {
        UploadedFile {
            path: path.to_string(),
            content: content.as_bytes().to_vec(),
        }
    }

    fn client_manifest(files: &[(&str, &[u8])], snapshot: Option<SnapshotId>) -> SyncManifest {
        SyncManifest::from_entries(
            files.iter().map(|(path, bytes)| ManifestEntry {
                path: path.to_string(),
                content_hash: hash_bytes(bytes),
                size: bytes.len() as u64,
                modified_time: Utc::now(),
            }),
            snapshot,
        )
        .unwrap()
    }

    fn read(h: &Harness, path: &str) -> String {
        String::from_utf8(h.engine.read_file(path).unwrap()).unwrap()
    }

    #[test]
    fn test_new_metadata_file_is_normalized() {
        let h = harness();
        let outcome = h
            .engine
            .commit(CommitRequest {
                uploaded_files: vec![upload("notes/new.md", "Hello\n")],
                ..Default::default()
            })
            .unwrap();

        let stored = read(&h, "notes/new.md");
        let doc = frontmatter::parse("notes/new.md", &stored).unwrap();
        assert_eq!(doc.frontmatter.title.as_deref(), Some("New"));
        assert_eq!(doc.frontmatter.author.as_deref(), Some("Site Owner"));
        assert_eq!(doc.frontmatter.labels, Some(Vec::new()));
        assert_eq!(doc.frontmatter.draft, Some(false));
        assert!(doc.frontmatter.created_at.is_some());
        assert_eq!(doc.body, "Hello\n");

        assert_eq!(outcome.to_download, vec!["notes/new.md"]);
        assert!(outcome.conflicts.is_empty());
        assert_eq!(h.store.head().unwrap(), Some(outcome.new_snapshot_id.clone()));

        let persisted = h.engine.last_known_manifest().unwrap();
        assert_eq!(persisted.snapshot_id, Some(outcome.new_snapshot_id));
        assert!(persisted.contains("notes/new.md"));
        assert_eq!(h.events.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_binary_upload_is_stored_verbatim() {
        let h = harness();
        let bytes = vec![0u8, 159, 146, 150, 255];
        let outcome = h
            .engine
            .commit(CommitRequest {
                uploaded_files: vec![UploadedFile {
                    path: "img/logo.png".to_string(),
                    content: bytes.clone(),
                }],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(h.engine.read_file("img/logo.png").unwrap(), bytes);
        assert!(outcome.to_download.is_empty());
    }

    #[test]
    fn test_status_after_commit_is_empty_and_idempotent() {
        let h = harness();
        h.engine
            .commit(CommitRequest {
                uploaded_files: vec![upload("a.txt", "plain")],
                ..Default::default()
            })
            .unwrap();

        let client = client_manifest(&[("a.txt", b"plain".as_slice())], None);
        let first = h.engine.status(&client).unwrap();
        let second = h.engine.status(&client).unwrap();
        assert!(first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn test_rejects_invalid_requests_before_writing() {
        let h = harness();
        let cases = vec![
            CommitRequest {
                uploaded_files: vec![upload("ok.txt", "x"), upload("../evil.txt", "x")],
                ..Default::default()
            },
            CommitRequest {
                uploaded_files: vec![upload("dup.txt", "1"), upload("dup.txt", "2")],
                ..Default::default()
            },
            CommitRequest {
                uploaded_files: vec![upload("both.txt", "1")],
                deleted_files: vec!["both.txt".to_string()],
                ..Default::default()
            },
        ];
        for request in cases {
            let err = h.engine.commit(request).unwrap_err();
            assert!(err.is_client_error(), "{err:?}");
        }
        assert!(h.engine.read_file("ok.txt").is_err());
        assert_eq!(h.store.len(), 0);
    }

    #[test]
    fn test_malformed_frontmatter_rejects_whole_commit() {
        let h = harness();
        let err = h
            .engine
            .commit(CommitRequest {
                uploaded_files: vec![
                    upload("fine.txt", "ok"),
                    upload("bad.md", "---\ndraft: perhaps\n---\n"),
                ],
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, FolioError::Frontmatter { .. }));
        assert!(matches!(h.engine.read_file("fine.txt"), Err(FolioError::NotFound(_))));
    }

    #[test]
    fn test_snapshot_failure_rolls_back() {
        let h = harness();
        h.engine
            .commit(CommitRequest {
                uploaded_files: vec![upload("a.txt", "v1")],
                ..Default::default()
            })
            .unwrap();
        let manifest_before = h.engine.last_known_manifest().unwrap();

        h.store.set_fail_snapshots(true);
        let err = h
            .engine
            .commit(CommitRequest {
                uploaded_files: vec![upload("a.txt", "v2"), upload("b.txt", "new")],
                last_sync_commit: manifest_before.snapshot_id.clone(),
                ..Default::default()
            })
            .unwrap_err();

        assert!(matches!(err, FolioError::Snapshot(_)));
        assert_eq!(read(&h, "a.txt"), "v1");
        assert!(h.engine.read_file("b.txt").is_err());
        assert_eq!(h.engine.last_known_manifest().unwrap(), manifest_before);
        assert_eq!(h.events.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_delete_modify_keeps_server_copy() {
        let h = harness();
        let first = h
            .engine
            .commit(CommitRequest {
                uploaded_files: vec![upload("shared.txt", "v1")],
                ..Default::default()
            })
            .unwrap();
        h.engine.write_post("shared.txt", b"server edit".to_vec()).unwrap();

        let outcome = h
            .engine
            .commit(CommitRequest {
                deleted_files: vec!["shared.txt".to_string()],
                last_sync_commit: Some(first.new_snapshot_id),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(read(&h, "shared.txt"), "server edit");
        assert_eq!(outcome.to_download, vec!["shared.txt"]);
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].reason, ConflictReason::DeleteModify);
    }

    #[test]
    fn test_unchanged_delete_removes_file() {
        let h = harness();
        h.engine
            .commit(CommitRequest {
                uploaded_files: vec![upload("gone.txt", "bye")],
                ..Default::default()
            })
            .unwrap();
        let outcome = h
            .engine
            .commit(CommitRequest {
                deleted_files: vec!["gone.txt".to_string(), "never-existed.txt".to_string()],
                ..Default::default()
            })
            .unwrap();
        assert!(matches!(h.engine.read_file("gone.txt"), Err(FolioError::NotFound(_))));
        assert!(outcome.conflicts.is_empty());
        assert!(!h.engine.last_known_manifest().unwrap().contains("gone.txt"));
    }

    #[test]
    fn test_concurrent_body_edits_merge() {
        let h = harness();
        let seeded = "---\ntitle: Story\n---\nA\nB\nC\n";
        let first = h
            .engine
            .commit(CommitRequest {
                uploaded_files: vec![upload("story.md", seeded)],
                ..Default::default()
            })
            .unwrap();
        let base = read(&h, "story.md");
        let header_end = base.find("---\nA").unwrap();

        let server_version = format!("{}---\nA2\nB\nC\n", &base[..header_end]);
        h.engine.write_post("story.md", server_version.into_bytes()).unwrap();
        // Post writes don't advance the sync manifest, so the server side
        // now shows as changed since the last sync.
        let client_version = format!("{}---\nA\nB\nC2\n", &base[..header_end]);
        let outcome = h
            .engine
            .commit(CommitRequest {
                uploaded_files: vec![upload("story.md", &client_version)],
                last_sync_commit: Some(first.new_snapshot_id),
                ..Default::default()
            })
            .unwrap();

        assert!(outcome.conflicts.is_empty(), "{:?}", outcome.conflicts);
        let merged = read(&h, "story.md");
        assert!(merged.ends_with("---\nA2\nB\nC2\n"), "{merged}");
        assert_eq!(outcome.to_download, vec!["story.md"]);
    }

    #[test]
    fn test_missing_merge_base_keeps_server() {
        let h = harness();
        h.engine
            .commit(CommitRequest {
                uploaded_files: vec![upload("doc.md", "---\ntitle: One\n---\nbody\n")],
                ..Default::default()
            })
            .unwrap();
        h.engine
            .write_post("doc.md", b"---\ntitle: Server\n---\nserver body\n".to_vec())
            .unwrap();
        let server_bytes = h.engine.read_file("doc.md").unwrap();

        let outcome = h
            .engine
            .commit(CommitRequest {
                uploaded_files: vec![upload("doc.md", "---\ntitle: Client\n---\nclient body\n")],
                last_sync_commit: Some(SnapshotId::from("no-such-snapshot")),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(h.engine.read_file("doc.md").unwrap(), server_bytes);
        assert_eq!(outcome.conflicts[0].reason, ConflictReason::NoMergeBase);
        assert!(outcome.conflicts[0].body_conflicted);
        assert_eq!(outcome.to_download, vec!["doc.md"]);
    }

    #[test]
    fn test_binary_conflict_is_last_writer_wins() {
        let h = harness();
        let first = h
            .engine
            .commit(CommitRequest {
                uploaded_files: vec![upload("data.bin", "one")],
                ..Default::default()
            })
            .unwrap();
        h.engine.write_post("data.bin", b"server".to_vec()).unwrap();

        let outcome = h
            .engine
            .commit(CommitRequest {
                uploaded_files: vec![upload("data.bin", "client")],
                last_sync_commit: Some(first.new_snapshot_id),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(read(&h, "data.bin"), "client");
        assert_eq!(outcome.conflicts[0].reason, ConflictReason::LastWriterWins);
        assert!(outcome.to_download.is_empty());
    }

    #[test]
    fn test_commit_reports_server_changes_the_client_never_pulled() {
        let h = harness();
        let first = h
            .engine
            .commit(CommitRequest {
                uploaded_files: vec![
                    upload("a.txt", "a"),
                    upload("edit.txt", "v1"),
                    upload("gone.txt", "bye"),
                ],
                ..Default::default()
            })
            .unwrap();
        h.engine.write_post("server.txt", b"from server".to_vec()).unwrap();
        h.engine.write_post("edit.txt", b"v2".to_vec()).unwrap();
        h.engine.delete_post("gone.txt").unwrap();

        let outcome = h
            .engine
            .commit(CommitRequest {
                uploaded_files: vec![upload("b.txt", "b")],
                last_sync_commit: Some(first.new_snapshot_id),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(outcome.to_download, vec!["edit.txt", "server.txt"]);
        assert_eq!(outcome.to_delete_local, vec!["gone.txt"]);
        assert!(outcome.conflicts.is_empty());

        // A client that applied the outcome is fully in sync.
        let client = client_manifest(
            &[
                ("a.txt", b"a".as_slice()),
                ("b.txt", b"b".as_slice()),
                ("edit.txt", b"v2".as_slice()),
                ("server.txt", b"from server".as_slice()),
            ],
            Some(outcome.new_snapshot_id),
        );
        let plan = h.engine.status(&client).unwrap();
        assert!(plan.is_empty(), "{plan:?}");
        assert_eq!(
            plan.classification("server.txt"),
            crate::planner::ChangeClassification::Unchanged
        );
    }

    #[test]
    fn test_repeated_metadata_keys_are_warned() {
        let h = harness();
        let outcome = h
            .engine
            .commit(CommitRequest {
                uploaded_files: vec![upload("dup.md", "---\ntitle: One\ntitle: Two\n---\nbody\n")],
                ..Default::default()
            })
            .unwrap();
        assert!(
            outcome.warnings.iter().any(|w| w.contains("'title' appears more than once")),
            "{:?}",
            outcome.warnings
        );
        let doc = frontmatter::parse("dup.md", &read(&h, "dup.md")).unwrap();
        assert_eq!(doc.frontmatter.title.as_deref(), Some("Two"));
        assert!(doc.repeated_keys.is_empty());
    }

    #[test]
    fn test_empty_commit_takes_initial_snapshot() {
        let h = harness();
        let outcome = h.engine.commit(CommitRequest::default()).unwrap();
        assert_eq!(h.store.len(), 1);
        assert!(outcome.to_download.is_empty());

        let again = h.engine.commit(CommitRequest::default()).unwrap();
        assert_eq!(again.new_snapshot_id, outcome.new_snapshot_id);
        assert_eq!(h.store.len(), 1);
        assert!(h.events.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_post_write_shows_up_as_server_change() {
        let h = harness();
        h.engine.commit(CommitRequest::default()).unwrap();
        let outcome = h
            .engine
            .write_post("posts/hello.md", b"---\nmood: sunny\n---\nHi\n".to_vec())
            .unwrap();
        assert_eq!(outcome.path, "posts/hello.md");
        assert_eq!(outcome.warnings.len(), 1);
        assert!(read(&h, "posts/hello.md").contains("mood: sunny"));

        let plan = h.engine.status(&SyncManifest::new()).unwrap();
        assert_eq!(plan.to_download, vec!["posts/hello.md"]);

        h.engine.delete_post("posts/hello.md").unwrap();
        assert!(matches!(
            h.engine.delete_post("posts/hello.md"),
            Err(FolioError::NotFound(_))
        ));
        let events = h.events.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.source == ChangeSource::Post));
    }
}
