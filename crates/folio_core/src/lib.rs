//! # `folio_core`
//!
//! Shared engine behind the Folio sync server.
//!
//! Folio keeps a tree of markdown posts (YAML frontmatter + body) on a server
//! and lets clients reconcile their local copy against it on demand. The
//! pieces, leaf-first:
//!
//! 1. [`manifest`] hashes a tree into a path → (hash, size, mtime) map
//! 2. [`planner`] classifies every path from client / last-known / server manifests
//! 3. [`frontmatter`] and [`merge`] reconcile conflicting posts field by field and line by line
//! 4. [`version_store`] snapshots every mutation and serves merge bases
//! 5. [`engine`] ties it together behind a single write lock

#![warn(missing_docs)]

/// Site configuration docs
pub mod config;

/// Commit orchestration
pub mod engine;

/// Error docs
pub mod error;

/// Sandboxed content filesystem
pub mod fs;

/// Frontmatter parsing, serialization and normalization
pub mod frontmatter;

/// Manifest builder
pub mod manifest;

/// Three-way merge engines
pub mod merge;

/// Path normalization
pub mod path;

/// Sync planner
pub mod planner;

/// Snapshot history
pub mod version_store;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::SiteConfig;
pub use engine::{
    ChangeEvent, ChangeNotifier, ChangeSource, CommitOutcome, CommitRequest, ConflictReason,
    ConflictReport, NoopNotifier, PostOutcome, SyncEngine, UploadedFile,
};
pub use error::{FolioError, Result};
pub use manifest::{ManifestEntry, SnapshotId, SyncManifest};
pub use planner::{ChangeClassification, SyncPlan};
pub use version_store::{GitVersionStore, SnapshotInfo, VersionStore};
