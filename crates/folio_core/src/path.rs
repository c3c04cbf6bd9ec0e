//! Relative path handling for the synchronized tree.
//!
//! Every path that crosses the wire is a slash-separated, root-relative
//! string. Anything that could resolve outside the content root is rejected
//! here, before any filesystem call is made.

use std::path::Path;

use crate::error::{FolioError, Result};

/// Validate and normalize a client-supplied relative path.
///
/// Backslashes are treated as separators. The result contains no empty,
/// `.` or `..` segments and no absolute or drive prefix.
pub fn normalize_relative_path(raw: &str) -> Result<String> {
    if raw.is_empty() {
        return Err(FolioError::Validation("Path must not be empty".to_string()));
    }
    if raw.contains('\0') {
        return Err(FolioError::Validation(format!(
            "Path contains a NUL byte: {raw:?}"
        )));
    }

    let unified = raw.replace('\\', "/");
    if unified.starts_with('/') || has_drive_prefix(&unified) {
        return Err(FolioError::PathEscapesRoot(raw.to_string()));
    }

    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            ".." => return Err(FolioError::PathEscapesRoot(raw.to_string())),
            "" | "." => {
                return Err(FolioError::Validation(format!(
                    "Path is not normalized: {raw}"
                )));
            }
            s => segments.push(s),
        }
    }

    Ok(segments.join("/"))
}

/// `C:` / `c:foo` style volume prefixes.
fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Convert a path found under `root` into its slash-separated relative form.
pub fn to_relative(root: &Path, full_path: &Path) -> Option<String> {
    full_path
        .strip_prefix(root)
        .ok()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .filter(|p| !p.is_empty())
}

/// Lowercased extension of a relative path, if any.
pub fn extension(path: &str) -> Option<String> {
    let name = path.rsplit('/').next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Human title derived from a file name: `my-first_post.md` → `My First Post`.
pub fn path_to_title(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    };

    stem.split(['-', '_', ' '])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
