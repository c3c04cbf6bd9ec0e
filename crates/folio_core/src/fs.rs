//! Sandboxed access to the synchronized content tree.
//!
//! [`ContentFs`] only accepts root-relative paths that already passed
//! [`normalize_relative_path`], so nothing it touches can resolve outside the
//! root. Writes go through a temp file + rename; multi-file changes go
//! through [`Transaction`], which restores every original on failure.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::error::{FolioError, Result};
use crate::path::normalize_relative_path;

/// Suffix of in-flight writes. The manifest builder ignores these.
pub const TEMP_SUFFIX: &str = ".folio-tmp";
/// Suffix of pre-swap backups. The manifest builder ignores these.
pub const BACKUP_SUFFIX: &str = ".folio-bak";

/// Filesystem rooted at the content directory.
#[derive(Debug, Clone)]
pub struct ContentFs {
    root: PathBuf,
}

impl ContentFs {
    /// Open (creating if needed) the content root.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| FolioError::storage(&root, e))?;
        Ok(Self { root })
    }

    /// Absolute content root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path to an absolute one inside the root.
    pub fn resolve(&self, rel: &str) -> Result<PathBuf> {
        let normalized = normalize_relative_path(rel)?;
        Ok(self.root.join(normalized))
    }

    /// Read a file. Missing files yield `Ok(None)`.
    pub fn read(&self, rel: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(rel)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FolioError::storage(path, e)),
        }
    }

    /// Open a regular file for streaming reads.
    pub fn open(&self, rel: &str) -> Result<fs::File> {
        let path = self.resolve(rel)?;
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(FolioError::NotFound(rel.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(FolioError::NotFound(rel.to_string()));
            }
            Err(e) => return Err(FolioError::storage(path, e)),
        }
        fs::File::open(&path).map_err(|e| FolioError::storage(path, e))
    }

    /// Replace (or create) a file, creating parent directories.
    pub fn write(&self, rel: &str, content: &[u8]) -> Result<()> {
        let path = self.resolve(rel)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| FolioError::storage(parent, e))?;
        }

        let temp_path = sibling_with_suffix(&path, TEMP_SUFFIX);
        let write_temp = || -> io::Result<()> {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(content)?;
            file.sync_all()
        };
        if let Err(e) = write_temp() {
            let _ = fs::remove_file(&temp_path);
            return Err(FolioError::storage(temp_path, e));
        }

        fs::rename(&temp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            FolioError::storage(&path, e)
        })
    }

    /// Delete a file and any directories it leaves empty. Missing files are fine.
    pub fn delete(&self, rel: &str) -> Result<bool> {
        let path = self.resolve(rel)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                self.prune_empty_dirs(&path);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(FolioError::storage(path, e)),
        }
    }

    fn prune_empty_dirs(&self, removed: &Path) {
        let mut dir = removed.parent();
        while let Some(d) = dir {
            if d == self.root || !d.starts_with(&self.root) {
                break;
            }
            // remove_dir fails on non-empty directories, which ends the walk.
            if fs::remove_dir(d).is_err() {
                break;
            }
            dir = d.parent();
        }
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => path.with_file_name(format!("{name}{suffix}")),
        None => path.with_extension(suffix.trim_start_matches('.')),
    }
}

/// A staged change to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedChange {
    /// Write these bytes.
    Write(Vec<u8>),
    /// Remove the file.
    Delete,
}

/// All-or-nothing application of a batch of file changes.
///
/// Originals are captured before each change; [`Transaction::rollback`]
/// puts every touched path back the way it was.
#[derive(Debug)]
pub struct Transaction<'a> {
    fs: &'a ContentFs,
    staged: Vec<(String, StagedChange)>,
    applied: Vec<(String, Option<Vec<u8>>)>,
}

impl<'a> Transaction<'a> {
    /// Start an empty transaction.
    pub fn new(fs: &'a ContentFs) -> Self {
        Self {
            fs,
            staged: Vec::new(),
            applied: Vec::new(),
        }
    }

    /// Queue a write.
    pub fn write(&mut self, path: impl Into<String>, content: Vec<u8>) {
        self.staged.push((path.into(), StagedChange::Write(content)));
    }

    /// Queue a deletion.
    pub fn delete(&mut self, path: impl Into<String>) {
        self.staged.push((path.into(), StagedChange::Delete));
    }

    /// Paths touched by this transaction, in staging order.
    pub fn paths(&self) -> Vec<String> {
        self.staged.iter().map(|(p, _)| p.clone()).collect()
    }

    /// Whether nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Apply every staged change. On the first failure everything already
    /// applied is rolled back and the error is returned.
    pub fn apply(&mut self) -> Result<()> {
        let staged = std::mem::take(&mut self.staged);
        for (path, change) in &staged {
            let original = match self.fs.read(path) {
                Ok(original) => original,
                Err(e) => {
                    self.rollback();
                    return Err(e);
                }
            };
            let outcome = match change {
                StagedChange::Write(bytes) => self.fs.write(path, bytes),
                StagedChange::Delete => self.fs.delete(path).map(|_| ()),
            };
            // Record before checking, so a half-done write is restored too.
            self.applied.push((path.clone(), original));
            if let Err(e) = outcome {
                error!("Commit write failed for {}: {}", path, e);
                self.rollback();
                return Err(e);
            }
        }
        self.staged = staged;
        Ok(())
    }

    /// Restore every applied path to its original content.
    pub fn rollback(&mut self) {
        while let Some((path, original)) = self.applied.pop() {
            let restored = match &original {
                Some(bytes) => self.fs.write(&path, bytes),
                None => self.fs.delete(&path).map(|_| ()),
            };
            if let Err(e) = restored {
                warn!("Rollback could not restore {}: {}", path, e);
            }
        }
    }
}
