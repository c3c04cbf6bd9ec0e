//! Manifest of a content tree: path → (content hash, size, mtime).
//!
//! Hashes cover file bytes only, so two copies of the same content compare
//! equal no matter what their timestamps say. The builder never aborts on a
//! single unreadable file; it records the file in
//! [`ManifestBuild::skipped`] and moves on.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;
use walkdir::WalkDir;

use crate::error::{FolioError, Result};
use crate::fs::{BACKUP_SUFFIX, TEMP_SUFFIX};
use crate::path::{normalize_relative_path, to_relative};

/// Identifier of a snapshot in the version store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub String);

impl SnapshotId {
    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SnapshotId {
    fn from(value: &str) -> Self {
        SnapshotId(value.to_string())
    }
}

/// One file in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Root-relative, slash-separated path.
    pub path: String,
    /// Lowercase hex SHA-256 of the file bytes.
    pub content_hash: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time. Informational only.
    pub modified_time: DateTime<Utc>,
}

impl ManifestEntry {
    /// Check the entry is well formed: normalized path, 64-char hex hash.
    pub fn validate(&self) -> Result<()> {
        let normalized = normalize_relative_path(&self.path)?;
        if normalized != self.path {
            return Err(FolioError::Validation(format!(
                "Manifest path is not normalized: {}",
                self.path
            )));
        }
        if !is_valid_hash(&self.content_hash) {
            return Err(FolioError::Validation(format!(
                "Invalid content hash for {}: {:?}",
                self.path, self.content_hash
            )));
        }
        Ok(())
    }
}

/// Whether `hash` looks like a lowercase hex SHA-256.
pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() == 64 && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Hash raw bytes.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn hash_file(path: &Path) -> io::Result<(String, u64)> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut file, &mut hasher)?;
    Ok((format!("{:x}", hasher.finalize()), size))
}

/// Wire shape of a manifest: a flat entry list.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestWire {
    #[serde(default)]
    snapshot_id: Option<SnapshotId>,
    #[serde(default)]
    entries: Vec<ManifestEntry>,
}

/// Path → entry map, tagged with the snapshot it was captured at.
///
/// Deserializing validates every entry and rejects duplicate paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ManifestWire", into = "ManifestWire")]
pub struct SyncManifest {
    /// Snapshot this manifest corresponds to, if any.
    pub snapshot_id: Option<SnapshotId>,
    files: BTreeMap<String, ManifestEntry>,
}

impl TryFrom<ManifestWire> for SyncManifest {
    type Error = FolioError;

    fn try_from(wire: ManifestWire) -> Result<Self> {
        SyncManifest::from_entries(wire.entries, wire.snapshot_id)
    }
}

impl From<SyncManifest> for ManifestWire {
    fn from(manifest: SyncManifest) -> Self {
        ManifestWire {
            snapshot_id: manifest.snapshot_id,
            entries: manifest.files.into_values().collect(),
        }
    }
}

impl SyncManifest {
    /// Empty manifest with no snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list of entries, validating each and rejecting duplicates.
    pub fn from_entries(
        entries: impl IntoIterator<Item = ManifestEntry>,
        snapshot_id: Option<SnapshotId>,
    ) -> Result<Self> {
        let mut files = BTreeMap::new();
        for entry in entries {
            entry.validate()?;
            if files.contains_key(&entry.path) {
                return Err(FolioError::Validation(format!(
                    "Duplicate manifest path: {}",
                    entry.path
                )));
            }
            files.insert(entry.path.clone(), entry);
        }
        Ok(Self { snapshot_id, files })
    }

    /// Look up one path.
    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.files.get(path)
    }

    /// Content hash of one path.
    pub fn hash_of(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(|e| e.content_hash.as_str())
    }

    /// Insert or replace an entry.
    pub fn insert(&mut self, entry: ManifestEntry) {
        self.files.insert(entry.path.clone(), entry);
    }

    /// Remove a path.
    pub fn remove(&mut self, path: &str) -> Option<ManifestEntry> {
        self.files.remove(path)
    }

    /// Whether the manifest lists `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Iterate paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.files.keys()
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the manifest is empty.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Load a persisted manifest. A missing file is an empty manifest.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(FolioError::storage(path, e)),
        };
        serde_json::from_str(&content)
            .map_err(|e| FolioError::Manifest(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Persist atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| FolioError::Manifest(format!("Failed to serialize manifest: {}", e)))?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| FolioError::storage(parent, e))?;
        }
        let temp = path.with_extension("json.tmp");
        fs::write(&temp, json).map_err(|e| FolioError::storage(&temp, e))?;
        fs::rename(&temp, path).map_err(|e| FolioError::storage(path, e))
    }
}

/// A file the builder could not read.
#[derive(Debug, Clone)]
pub struct SkippedFile {
    /// Where the failure happened.
    pub path: PathBuf,
    /// The IO error, rendered.
    pub reason: String,
}

/// Result of a manifest build.
#[derive(Debug, Default)]
pub struct ManifestBuild {
    /// Every file that could be hashed.
    pub manifest: SyncManifest,
    /// Files skipped because of IO errors.
    pub skipped: Vec<SkippedFile>,
}

/// Hash every regular file under `root`.
///
/// Symlinks are not followed. A missing root yields an empty manifest.
pub fn build_manifest(root: &Path) -> ManifestBuild {
    let mut build = ManifestBuild::default();
    if !root.exists() {
        return build;
    }

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                warn!("Skipping unreadable path {}: {}", path.display(), e);
                build.skipped.push(SkippedFile {
                    path,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let full_path = entry.path();
        let Some(rel) = to_relative(root, full_path) else {
            continue;
        };
        if rel.ends_with(TEMP_SUFFIX) || rel.ends_with(BACKUP_SUFFIX) {
            continue;
        }
        if normalize_relative_path(&rel).is_err() {
            warn!("Skipping file with unsupported path: {}", rel);
            continue;
        }

        let hashed = hash_file(full_path).and_then(|(hash, size)| {
            let modified = entry.metadata().map_err(io::Error::from)?.modified()?;
            Ok((hash, size, DateTime::<Utc>::from(modified)))
        });
        match hashed {
            Ok((content_hash, size, modified_time)) => build.manifest.insert(ManifestEntry {
                path: rel,
                content_hash,
                size,
                modified_time,
            }),
            Err(e) => {
                warn!("Skipping {} from manifest: {}", rel, e);
                build.skipped.push(SkippedFile {
                    path: full_path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        }
    }

    build
}
