//! Line-based three-way body merge and the hybrid document merge that
//! combines it with the front matter merge.
//!
//! Conflicting regions never get inline markers. When both sides rewrote the
//! same region differently the server's text is kept and the result is
//! flagged, so the file on disk always stays valid.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use similar::{Algorithm, DiffTag, capture_diff_slices};

use crate::frontmatter::{self, ParsedDocument};

/// Outcome of a body merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyMerge {
    /// Merged text.
    pub content: String,
    /// Whether an overlapping region was resolved in the server's favor.
    pub conflicted: bool,
}

/// A contiguous change against the base: base lines `start..end` become `lines`.
#[derive(Debug, Clone)]
struct Hunk<'a> {
    start: usize,
    end: usize,
    lines: Vec<&'a str>,
}

impl Hunk<'_> {
    fn is_insertion(&self) -> bool {
        self.start == self.end
    }

    fn overlaps(&self, start: usize, end: usize) -> bool {
        let other_is_insertion = start == end;
        match (self.is_insertion(), other_is_insertion) {
            (true, true) => self.start == start,
            (true, false) => start < self.start && self.start < end,
            (false, true) => self.start < start && start < self.end,
            (false, false) => self.start < end && start < self.end,
        }
    }
}

fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

fn diff_hunks<'a>(base: &[&str], other: &[&'a str]) -> Vec<Hunk<'a>> {
    let mut hunks: Vec<Hunk<'a>> = Vec::new();
    for op in capture_diff_slices(Algorithm::Myers, base, other) {
        let (tag, old, new) = op.as_tag_tuple();
        if tag == DiffTag::Equal {
            continue;
        }
        match hunks.last_mut() {
            Some(last) if last.end == old.start => {
                last.end = old.end;
                last.lines.extend_from_slice(&other[new]);
            }
            _ => hunks.push(Hunk {
                start: old.start,
                end: old.end,
                lines: other[new].to_vec(),
            }),
        }
    }
    hunks
}

/// Apply one side's hunks to the base region `start..end`.
fn resolve(base: &[&str], start: usize, end: usize, hunks: &[Hunk<'_>]) -> String {
    let mut out = String::new();
    let mut cursor = start;
    for hunk in hunks {
        push_lines(&mut out, &base[cursor..hunk.start]);
        push_lines(&mut out, &hunk.lines);
        cursor = hunk.end;
    }
    push_lines(&mut out, &base[cursor..end]);
    out
}

fn push_lines(out: &mut String, lines: &[&str]) {
    for line in lines {
        out.push_str(line);
    }
}

/// Whether the next cluster should be seeded from the server's hunk.
/// Lower start first; on a tie an insertion goes before a replacement.
fn seed_from_server(server: Option<&Hunk<'_>>, client: Option<&Hunk<'_>>) -> bool {
    match (server, client) {
        (Some(s), Some(c)) => {
            s.start < c.start || (s.start == c.start && (s.is_insertion() || !c.is_insertion()))
        }
        (Some(_), None) => true,
        _ => false,
    }
}

/// Three-way merge of plain text, line by line.
pub fn merge_bodies(base: &str, server: &str, client: &str) -> BodyMerge {
    let clean = |content: &str| BodyMerge {
        content: content.to_string(),
        conflicted: false,
    };
    if server == client || base == client {
        return clean(server);
    }
    if base == server {
        return clean(client);
    }

    let base_lines = split_lines(base);
    let server_lines = split_lines(server);
    let client_lines = split_lines(client);
    let server_hunks = diff_hunks(&base_lines, &server_lines);
    let client_hunks = diff_hunks(&base_lines, &client_lines);

    let mut out = String::new();
    let mut conflicted = false;
    let mut pos = 0;
    let (mut i, mut j) = (0, 0);

    while i < server_hunks.len() || j < client_hunks.len() {
        let (first_server, first_client) = (i, j);
        let (mut start, mut end) =
            if seed_from_server(server_hunks.get(i), client_hunks.get(j)) {
                i += 1;
                (server_hunks[i - 1].start, server_hunks[i - 1].end)
            } else {
                j += 1;
                (client_hunks[j - 1].start, client_hunks[j - 1].end)
            };

        loop {
            let mut grew = false;
            while let Some(hunk) = server_hunks.get(i)
                && hunk.overlaps(start, end)
            {
                start = start.min(hunk.start);
                end = end.max(hunk.end);
                i += 1;
                grew = true;
            }
            while let Some(hunk) = client_hunks.get(j)
                && hunk.overlaps(start, end)
            {
                start = start.min(hunk.start);
                end = end.max(hunk.end);
                j += 1;
                grew = true;
            }
            if !grew {
                break;
            }
        }

        push_lines(&mut out, &base_lines[pos..start]);

        let server_part = &server_hunks[first_server..i];
        let client_part = &client_hunks[first_client..j];
        let server_text = resolve(&base_lines, start, end, server_part);
        if client_part.is_empty() {
            out.push_str(&server_text);
        } else {
            let client_text = resolve(&base_lines, start, end, client_part);
            if server_part.is_empty() || server_text == client_text {
                out.push_str(&client_text);
            } else {
                out.push_str(&server_text);
                conflicted = true;
            }
        }
        pos = end;
    }
    push_lines(&mut out, &base_lines[pos..]);

    BodyMerge {
        content: out,
        conflicted,
    }
}

/// Whether a merge completed cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    /// Every change was combined.
    Merged,
    /// At least one region or field fell back to the server's version.
    Conflicted,
}

/// Result of a hybrid document merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    /// Merged or conflicted.
    pub status: MergeStatus,
    /// Bytes to store.
    pub content: Vec<u8>,
    /// Front matter fields resolved in the server's favor.
    pub field_conflicts: BTreeSet<String>,
    /// Whether the body had an overlapping edit.
    pub body_conflicted: bool,
}

impl MergeResult {
    fn keep_server(server: &str) -> Self {
        MergeResult {
            status: MergeStatus::Conflicted,
            content: server.as_bytes().to_vec(),
            field_conflicts: BTreeSet::new(),
            body_conflicted: true,
        }
    }
}

/// Merge a metadata-bearing document: front matter field by field, body line
/// by line. Without a base nothing can be merged and the server copy is kept.
pub fn merge_document(path: &str, base: Option<&str>, server: &str, client: &str) -> MergeResult {
    if server == client {
        return MergeResult {
            status: MergeStatus::Merged,
            content: server.as_bytes().to_vec(),
            field_conflicts: BTreeSet::new(),
            body_conflicted: false,
        };
    }
    let Some(base) = base else {
        return MergeResult::keep_server(server);
    };

    let base_doc = frontmatter::parse_lenient(path, base);
    let server_doc = frontmatter::parse_lenient(path, server);
    let client_doc = frontmatter::parse_lenient(path, client);

    let fm = frontmatter::merge(
        &base_doc.frontmatter,
        &server_doc.frontmatter,
        &client_doc.frontmatter,
    );
    let body = merge_bodies(&base_doc.body, &server_doc.body, &client_doc.body);

    let merged = ParsedDocument {
        frontmatter: fm.merged,
        body: body.content,
        ..Default::default()
    };
    let status = if body.conflicted || !fm.field_conflicts.is_empty() {
        MergeStatus::Conflicted
    } else {
        MergeStatus::Merged
    };

    MergeResult {
        status,
        content: merged.render().into_bytes(),
        field_conflicts: fm.field_conflicts,
        body_conflicted: body.conflicted,
    }
}
