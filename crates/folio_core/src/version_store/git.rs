//! Bare git repository as the snapshot history.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::DateTime;
use git2::{
    Commit, ErrorCode, ObjectType, Oid, Repository, Signature, Tree, TreeWalkMode,
    TreeWalkResult,
};
use tracing::{debug, info, warn};

use super::{SnapshotInfo, VersionStore};
use crate::config::SiteConfig;
use crate::error::{FolioError, Result};
use crate::fs::ContentFs;
use crate::manifest::{SnapshotId, build_manifest};

/// Snapshot history in a bare repository, created on first use.
pub struct GitVersionStore {
    repo_path: PathBuf,
    content: ContentFs,
    author_name: String,
    author_email: String,
    repo: Mutex<Option<Repository>>,
}

impl GitVersionStore {
    /// History for `content`, stored at `repo_path`.
    pub fn new(repo_path: impl Into<PathBuf>, content: ContentFs, config: &SiteConfig) -> Self {
        Self {
            repo_path: repo_path.into(),
            content,
            author_name: config.snapshot_author_name.clone(),
            author_email: config.snapshot_author_email.clone(),
            repo: Mutex::new(None),
        }
    }

    /// Where the repository lives.
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn with_repo<T>(&self, f: impl FnOnce(&Repository) -> Result<T>) -> Result<T> {
        let mut guard = self.repo.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let repo = match guard.take() {
            Some(repo) => repo,
            None => open_or_init(&self.repo_path)?,
        };
        let result = f(&repo);
        *guard = Some(repo);
        result
    }
}

fn open_or_init(path: &Path) -> Result<Repository> {
    if path.exists() {
        return Ok(Repository::open_bare(path)?);
    }
    info!("Initializing snapshot history at {}", path.display());
    Ok(Repository::init_bare(path)?)
}

fn head_commit(repo: &Repository) -> Result<Option<Commit<'_>>> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_commit()?)),
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Name of the branch HEAD points at, born or not.
fn head_branch(repo: &Repository) -> Result<String> {
    let head = repo.find_reference("HEAD")?;
    head.symbolic_target()
        .map(String::from)
        .ok_or_else(|| FolioError::Snapshot("HEAD is detached".to_string()))
}

fn find_snapshot<'r>(repo: &'r Repository, id: &SnapshotId) -> Result<Commit<'r>> {
    let not_found = || FolioError::SnapshotNotFound(id.to_string());
    let oid = Oid::from_str(id.as_str()).map_err(|_| not_found())?;
    match repo.find_commit(oid) {
        Ok(commit) => Ok(commit),
        Err(e) if e.code() == ErrorCode::NotFound => Err(not_found()),
        Err(e) => Err(e.into()),
    }
}

/// Every blob in `tree`, keyed by slash-separated path.
fn tree_blobs(tree: &Tree<'_>) -> Result<BTreeMap<String, Oid>> {
    let mut files = BTreeMap::new();
    tree.walk(TreeWalkMode::PreOrder, |root, entry| {
        if entry.kind() == Some(ObjectType::Blob)
            && let Some(name) = entry.name()
        {
            files.insert(format!("{root}{name}"), entry.id());
        }
        TreeWalkResult::Ok
    })?;
    Ok(files)
}

fn build_tree(repo: &Repository, files: &BTreeMap<String, Oid>) -> Result<Oid> {
    let entries: Vec<(Vec<&str>, Oid)> = files
        .iter()
        .map(|(path, oid)| (path.split('/').collect(), *oid))
        .collect();
    build_tree_recursive(repo, &entries, 0)
}

fn build_tree_recursive(
    repo: &Repository,
    entries: &[(Vec<&str>, Oid)],
    depth: usize,
) -> Result<Oid> {
    let mut builder = repo.treebuilder(None)?;
    let mut dirs: BTreeMap<&str, Vec<(Vec<&str>, Oid)>> = BTreeMap::new();

    for (components, oid) in entries {
        if depth + 1 == components.len() {
            builder.insert(components[depth], *oid, 0o100644)?;
        } else if depth < components.len() {
            dirs.entry(components[depth])
                .or_default()
                .push((components.clone(), *oid));
        }
    }

    for (dir_name, sub_entries) in &dirs {
        let sub_tree = build_tree_recursive(repo, sub_entries, depth + 1)?;
        builder.insert(dir_name, sub_tree, 0o040000)?;
    }

    Ok(builder.write()?)
}

impl VersionStore for GitVersionStore {
    fn snapshot(&self, changed_paths: &[String], message: &str) -> Result<SnapshotId> {
        self.with_repo(|repo| {
            let parent = head_commit(repo)?;
            let (mut files, paths) = match &parent {
                Some(commit) => (tree_blobs(&commit.tree()?)?, changed_paths.to_vec()),
                None => {
                    let build = build_manifest(self.content.root());
                    (BTreeMap::new(), build.manifest.paths().cloned().collect())
                }
            };

            for path in &paths {
                match self.content.read(path)? {
                    Some(bytes) => {
                        files.insert(path.clone(), repo.blob(&bytes)?);
                    }
                    None => {
                        files.remove(path);
                    }
                }
            }

            let tree = repo.find_tree(build_tree(repo, &files)?)?;
            let sig = Signature::now(&self.author_name, &self.author_email)?;
            let parents: Vec<&Commit<'_>> = parent.iter().collect();
            let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;

            info!(
                "Snapshot {} ({} changed, {} files): {}",
                oid,
                paths.len(),
                files.len(),
                message
            );
            Ok(SnapshotId(oid.to_string()))
        })
    }

    fn read_file_at(&self, path: &str, snapshot: &SnapshotId) -> Result<Option<Vec<u8>>> {
        self.with_repo(|repo| {
            let tree = find_snapshot(repo, snapshot)?.tree()?;
            let entry = match tree.get_path(Path::new(path)) {
                Ok(entry) => entry,
                Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            let object = entry.to_object(repo)?;
            Ok(object.as_blob().map(|blob| blob.content().to_vec()))
        })
    }

    fn head(&self) -> Result<Option<SnapshotId>> {
        self.with_repo(|repo| Ok(head_commit(repo)?.map(|c| SnapshotId(c.id().to_string()))))
    }

    fn rewind(&self, to: Option<&SnapshotId>) -> Result<()> {
        self.with_repo(|repo| {
            let branch = head_branch(repo)?;
            match to {
                Some(id) => {
                    let commit = find_snapshot(repo, id)?;
                    repo.reference(&branch, commit.id(), true, "folio: rewind")?;
                }
                None => match repo.find_reference(&branch) {
                    Ok(mut reference) => reference.delete()?,
                    Err(e) if e.code() == ErrorCode::NotFound => {}
                    Err(e) => return Err(e.into()),
                },
            }
            warn!("Snapshot history rewound to {:?}", to.map(SnapshotId::as_str));
            Ok(())
        })
    }

    fn history(&self, limit: usize) -> Result<Vec<SnapshotInfo>> {
        self.with_repo(|repo| {
            let Some(head) = head_commit(repo)? else {
                debug!("History requested before the first snapshot");
                return Ok(Vec::new());
            };

            let mut revwalk = repo.revwalk()?;
            revwalk.push(head.id())?;

            let mut entries = Vec::new();
            for oid in revwalk.take(limit) {
                let commit = repo.find_commit(oid?)?;
                entries.push(SnapshotInfo {
                    id: SnapshotId(commit.id().to_string()),
                    message: commit.message().unwrap_or("").trim_end().to_string(),
                    timestamp: DateTime::from_timestamp(commit.time().seconds(), 0)
                        .unwrap_or_default(),
                    file_count: tree_blobs(&commit.tree()?)?.len(),
                });
            }
            Ok(entries)
        })
    }
}
