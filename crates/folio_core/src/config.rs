//! Site configuration, read from `folio.toml` in the data directory.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FolioError, Result};
use crate::path::extension;

/// Per-site settings. Every field has a default, so a missing file or a
/// partial file is fine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Author written into new posts that don't name one.
    pub default_author: String,
    /// Extensions (lowercase, no dot) of files that carry front matter.
    pub metadata_extensions: Vec<String>,
    /// Committer name on history snapshots.
    pub snapshot_author_name: String,
    /// Committer email on history snapshots.
    pub snapshot_author_email: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            default_author: String::new(),
            metadata_extensions: vec!["md".to_string(), "markdown".to_string()],
            snapshot_author_name: "Folio".to_string(),
            snapshot_author_email: "noreply@folio.local".to_string(),
        }
    }
}

impl SiteConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No site config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(FolioError::storage(path, e)),
        };
        toml::from_str(&content)
            .map_err(|e| FolioError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Whether `path` is a metadata-bearing file.
    pub fn is_metadata_file(&self, path: &str) -> bool {
        extension(path).is_some_and(|ext| {
            self.metadata_extensions
                .iter()
                .any(|known| known.eq_ignore_ascii_case(&ext))
        })
    }
}
