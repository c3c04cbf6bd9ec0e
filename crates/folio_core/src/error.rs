//! Error type shared by every Folio operation.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout `folio_core`.
pub type Result<T, E = FolioError> = std::result::Result<T, E>;

/// Everything that can go wrong while planning, merging or committing.
#[derive(Debug, Error)]
pub enum FolioError {
    /// Malformed request input (manifest entry, duplicate path, bad hash...).
    /// The whole request is rejected before anything is written.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A path tried to leave the content root (`..`, absolute, drive prefix).
    #[error("Path escapes content root: {0}")]
    PathEscapesRoot(String),

    /// No common ancestor could be loaded for a conflicting file.
    #[error("Merge base unavailable for {path}: {reason}")]
    MergeBaseUnavailable {
        /// Conflicting path.
        path: String,
        /// Why the base could not be loaded.
        reason: String,
    },

    /// The requested snapshot id does not exist in history.
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// Filesystem read/write failure.
    #[error("Storage error at {path}: {source}")]
    Storage {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },

    /// The history backend failed to record or read a snapshot.
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Frontmatter could not be parsed.
    #[error("Invalid frontmatter in {path}: {message}")]
    Frontmatter {
        /// File whose frontmatter is broken.
        path: String,
        /// Parser message.
        message: String,
    },

    /// Persisted manifest could not be read or written.
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// Requested file does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Site configuration could not be loaded.
    #[error("Config error: {0}")]
    Config(String),
}

impl FolioError {
    /// Wrap an IO error with the path it happened on.
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        FolioError::Storage {
            path: path.into(),
            source,
        }
    }

    /// True for errors caused by the caller's input rather than server state.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            FolioError::Validation(_)
                | FolioError::PathEscapesRoot(_)
                | FolioError::Frontmatter { .. }
        )
    }
}

impl From<git2::Error> for FolioError {
    fn from(e: git2::Error) -> Self {
        FolioError::Snapshot(e.to_string())
    }
}
