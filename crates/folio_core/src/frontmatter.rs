//! YAML front matter: parsing, serialization, three-way merge and
//! normalization of the recognized metadata fields.
//!
//! Only `title`, `created_at`, `modified_at`, `author`, `labels` and `draft`
//! are interpreted. Every other top-level key is kept as raw text and written
//! back exactly as it was read, so metadata this crate does not understand
//! survives any number of merges.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use indexmap::IndexMap;
use serde_yaml::Value;
use tracing::warn;

use crate::error::{FolioError, Result};
use crate::path::path_to_title;

const DELIMITER: &str = "---";

/// Field names this crate interprets, in serialization order.
pub const RECOGNIZED_FIELDS: [&str; 6] = [
    "title",
    "created_at",
    "modified_at",
    "author",
    "labels",
    "draft",
];

/// Decoded front matter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrontMatterDocument {
    /// Display title.
    pub title: Option<String>,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification time.
    pub modified_at: Option<DateTime<Utc>>,
    /// Author name.
    pub author: Option<String>,
    /// Label set, in display order.
    pub labels: Option<Vec<String>>,
    /// Draft flag.
    pub draft: Option<bool>,
    /// Unrecognized entries: key → raw text after the colon, in file order.
    pub extra: IndexMap<String, String>,
}

/// A metadata file split into front matter and body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDocument {
    /// Decoded front matter (empty when the file has none).
    pub frontmatter: FrontMatterDocument,
    /// Everything after the closing delimiter, byte for byte.
    pub body: String,
    /// Keys that appeared more than once; the last occurrence was kept.
    pub repeated_keys: Vec<String>,
}

impl FrontMatterDocument {
    /// Whether no field at all is set.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.created_at.is_none()
            && self.modified_at.is_none()
            && self.author.is_none()
            && self.labels.is_none()
            && self.draft.is_none()
            && self.extra.is_empty()
    }

    /// Serialize the block contents (without delimiters).
    pub fn to_yaml(&self) -> String {
        let mut lines: Vec<String> = Vec::new();

        if let Some(title) = &self.title {
            lines.push(format!("title: {}", yaml_string(title)));
        }
        if let Some(created_at) = &self.created_at {
            lines.push(format!("created_at: {}", yaml_timestamp(created_at)));
        }
        if let Some(modified_at) = &self.modified_at {
            lines.push(format!("modified_at: {}", yaml_timestamp(modified_at)));
        }
        if let Some(author) = &self.author {
            lines.push(format!("author: {}", yaml_string(author)));
        }
        if let Some(labels) = &self.labels {
            if labels.is_empty() {
                lines.push("labels: []".to_string());
            } else {
                lines.push("labels:".to_string());
                for label in labels {
                    lines.push(format!("  - {}", yaml_string(label)));
                }
            }
        }
        if let Some(draft) = self.draft {
            lines.push(format!("draft: {}", draft));
        }

        for (key, raw) in &self.extra {
            lines.push(format!("{}:{}", key, raw));
        }

        lines.join("\n")
    }

    /// Warnings for every unrecognized key.
    pub fn unrecognized_warnings(&self, path: &str) -> Vec<String> {
        self.extra
            .keys()
            .map(|key| format!("{}: unrecognized metadata field '{}' kept as-is", path, key.trim()))
            .collect()
    }

    /// Fill defaults for a file the server has never seen.
    pub fn normalize_new(&mut self, path: &str, now: DateTime<Utc>, default_author: &str) {
        self.created_at.get_or_insert(now);
        self.modified_at = Some(now);
        if self.author.is_none() && !default_author.is_empty() {
            self.author = Some(default_author.to_string());
        }
        if self.title.is_none() {
            self.title = Some(path_to_title(path));
        }
        self.labels.get_or_insert_with(Vec::new);
        self.draft.get_or_insert(false);
    }

    /// Refresh an existing file: bump `modified_at` and restore a dropped
    /// `created_at` from the server's copy.
    pub fn normalize_existing(
        &mut self,
        now: DateTime<Utc>,
        server: Option<&FrontMatterDocument>,
    ) {
        self.modified_at = Some(now);
        if self.created_at.is_none()
            && let Some(created_at) = server.and_then(|s| s.created_at)
        {
            self.created_at = Some(created_at);
        }
    }
}

impl ParsedDocument {
    /// Reassemble the file. Documents without front matter render as the
    /// bare body.
    pub fn render(&self) -> String {
        if self.frontmatter.is_empty() {
            return self.body.clone();
        }
        format!(
            "{DELIMITER}\n{}\n{DELIMITER}\n{}",
            self.frontmatter.to_yaml(),
            self.body
        )
    }
}

/// One top-level `key:` entry with the raw text that follows the colon.
struct RawEntry<'a> {
    key: &'a str,
    raw: String,
}

/// Split `text` into the front matter block lines and the body.
fn split_block(text: &str) -> Option<(Vec<&str>, &str)> {
    let mut offset = 0;
    let mut lines = text.split_inclusive('\n');

    let first = lines.next()?;
    if first.trim_end() != DELIMITER {
        return None;
    }
    offset += first.len();

    let mut block = Vec::new();
    for line in lines {
        offset += line.len();
        if line.trim_end() == DELIMITER {
            return Some((block, &text[offset..]));
        }
        block.push(line.strip_suffix('\n').unwrap_or(line).trim_end_matches('\r'));
    }
    // No closing delimiter: not front matter.
    None
}

fn starts_entry(line: &str) -> Option<(&str, &str)> {
    if line.starts_with([' ', '\t', '#', '-']) {
        return None;
    }
    let (key, rest) = line.split_once(':')?;
    if key.trim().is_empty() {
        return None;
    }
    Some((key, rest))
}

fn split_entries<'a>(block: &[&'a str]) -> Vec<RawEntry<'a>> {
    let mut entries: Vec<RawEntry<'a>> = Vec::new();
    for &line in block {
        match starts_entry(line) {
            Some((key, rest)) => entries.push(RawEntry {
                key,
                raw: rest.to_string(),
            }),
            None => match entries.last_mut() {
                Some(entry) => {
                    entry.raw.push('\n');
                    entry.raw.push_str(line);
                }
                None if line.trim().is_empty() => {}
                None => warn!("Dropping front matter line before the first key: {}", line),
            },
        }
    }
    entries
}

/// Parse a metadata file strictly: a recognized field that cannot be decoded
/// is an error.
pub fn parse(path: &str, text: &str) -> Result<ParsedDocument> {
    parse_with(path, text, true)
}

/// Parse a metadata file leniently: undecodable recognized fields are kept
/// as raw unrecognized entries instead of failing.
pub fn parse_lenient(path: &str, text: &str) -> ParsedDocument {
    match parse_with(path, text, false) {
        Ok(doc) => doc,
        // Lenient parsing never fails on field decoding; keep the text as body.
        Err(_) => ParsedDocument {
            body: text.to_string(),
            ..Default::default()
        },
    }
}

fn parse_with(path: &str, text: &str, strict: bool) -> Result<ParsedDocument> {
    let Some((block, body)) = split_block(text) else {
        return Ok(ParsedDocument {
            body: text.to_string(),
            ..Default::default()
        });
    };

    let mut fm = FrontMatterDocument::default();
    let mut seen = BTreeSet::new();
    let mut repeated_keys = Vec::new();
    for entry in split_entries(&block) {
        let name = entry.key.trim();
        if !seen.insert(name) {
            warn!("Metadata field '{}' repeated in {}; keeping the last value", name, path);
            repeated_keys.push(name.to_string());
        }
        if !RECOGNIZED_FIELDS.contains(&name) {
            fm.extra.insert(entry.key.to_string(), entry.raw);
            continue;
        }
        if let Err(message) = decode_field(&mut fm, name, &entry.raw) {
            if strict {
                return Err(FolioError::Frontmatter {
                    path: path.to_string(),
                    message: format!("field '{}': {}", name, message),
                });
            }
            warn!("Keeping undecodable field '{}' in {} as raw text: {}", name, path, message);
            fm.extra.insert(entry.key.to_string(), entry.raw);
        }
    }

    Ok(ParsedDocument {
        frontmatter: fm,
        body: body.to_string(),
        repeated_keys,
    })
}

fn decode_field(fm: &mut FrontMatterDocument, name: &str, raw: &str) -> Result<(), String> {
    let value: Value = serde_yaml::from_str(raw).map_err(|e| e.to_string())?;
    match name {
        "title" => fm.title = decode_string(&value)?,
        "author" => fm.author = decode_string(&value)?,
        "created_at" => fm.created_at = decode_timestamp(&value)?,
        "modified_at" => fm.modified_at = decode_timestamp(&value)?,
        "labels" => fm.labels = decode_labels(&value)?,
        "draft" => {
            fm.draft = match value {
                Value::Null => None,
                Value::Bool(b) => Some(b),
                other => return Err(format!("expected a boolean, found {:?}", other)),
            }
        }
        _ => {}
    }
    Ok(())
}

fn decode_string(value: &Value) -> Result<Option<String>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(format!("expected a string, found {:?}", other)),
    }
}

fn decode_labels(value: &Value) -> Result<Option<Vec<String>>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Sequence(seq) => seq
            .iter()
            .map(|item| match decode_string(item)? {
                Some(label) => Ok(label),
                None => Err("label must not be null".to_string()),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Value::String(s) => Ok(Some(
            s.split(',')
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect(),
        )),
        other => Err(format!("expected a list of labels, found {:?}", other)),
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD` and epoch millis.
fn decode_timestamp(value: &Value) -> Result<Option<DateTime<Utc>>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => {
            let millis = n
                .as_i64()
                .ok_or_else(|| format!("timestamp out of range: {}", n))?;
            Utc.timestamp_millis_opt(millis)
                .single()
                .map(Some)
                .ok_or_else(|| format!("invalid epoch millis: {}", millis))
        }
        Value::String(s) => parse_timestamp(s)
            .map(Some)
            .ok_or_else(|| format!("unrecognized timestamp: {:?}", s)),
        other => Err(format!("expected a timestamp, found {:?}", other)),
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
}

fn yaml_timestamp(value: &DateTime<Utc>) -> String {
    yaml_string(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Format a string for YAML, quoting when a plain scalar would be misread.
fn yaml_string(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value.contains([
            ':', '#', '[', ']', '{', '}', '|', '>', '&', '*', '!', '?', '\'', '"', '%', '@',
            '`', '\n',
        ])
        || value.starts_with([' ', '-'])
        || value.ends_with(' ')
        || is_yaml_keyword(value)
        || !reads_back_as_itself(value);

    if needs_quotes {
        format!(
            "\"{}\"",
            value
                .replace('\\', "\\\\")
                .replace('"', "\\\"")
                .replace('\n', "\\n")
        )
    } else {
        value.to_string()
    }
}

/// Whether `s` written as a plain scalar parses back to the same string.
/// Catches numbers in every YAML notation (`0x10`, `0o17`, `1e3`, `.inf`).
fn reads_back_as_itself(s: &str) -> bool {
    matches!(serde_yaml::from_str::<Value>(s), Ok(Value::String(parsed)) if parsed == s)
}

fn is_yaml_keyword(s: &str) -> bool {
    matches!(
        s.to_lowercase().as_str(),
        "true" | "false" | "null" | "yes" | "no" | "on" | "off" | "~"
    )
}

/// Outcome of a front matter three-way merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrontMatterMerge {
    /// Merged fields.
    pub merged: FrontMatterDocument,
    /// Fields both sides changed differently; the server value was kept.
    pub field_conflicts: BTreeSet<String>,
}

/// Three-way merge of decoded front matter.
///
/// `modified_at` never conflicts; the later of the two sides is kept and
/// callers overwrite it when they normalize.
pub fn merge(
    base: &FrontMatterDocument,
    server: &FrontMatterDocument,
    client: &FrontMatterDocument,
) -> FrontMatterMerge {
    let mut conflicts = BTreeSet::new();

    let merged = FrontMatterDocument {
        title: merge_scalar("title", &base.title, &server.title, &client.title, &mut conflicts),
        created_at: merge_scalar(
            "created_at",
            &base.created_at,
            &server.created_at,
            &client.created_at,
            &mut conflicts,
        ),
        modified_at: server.modified_at.max(client.modified_at),
        author: merge_scalar("author", &base.author, &server.author, &client.author, &mut conflicts),
        labels: merge_label_fields(&base.labels, &server.labels, &client.labels),
        draft: merge_scalar("draft", &base.draft, &server.draft, &client.draft, &mut conflicts),
        extra: merge_extra(&base.extra, &server.extra, &client.extra, &mut conflicts),
    };

    FrontMatterMerge {
        merged,
        field_conflicts: conflicts,
    }
}

fn merge_scalar<T: PartialEq + Clone>(
    name: &str,
    base: &Option<T>,
    server: &Option<T>,
    client: &Option<T>,
    conflicts: &mut BTreeSet<String>,
) -> Option<T> {
    let server_changed = server != base;
    let client_changed = client != base;
    match (server_changed, client_changed) {
        (false, _) => client.clone(),
        (true, false) => server.clone(),
        (true, true) => {
            if server != client {
                conflicts.insert(name.to_string());
            }
            server.clone()
        }
    }
}

fn merge_label_fields(
    base: &Option<Vec<String>>,
    server: &Option<Vec<String>>,
    client: &Option<Vec<String>>,
) -> Option<Vec<String>> {
    if base.is_none() && server.is_none() && client.is_none() {
        return None;
    }
    let empty = Vec::new();
    Some(merge_labels(
        base.as_ref().unwrap_or(&empty),
        server.as_ref().unwrap_or(&empty),
        client.as_ref().unwrap_or(&empty),
    ))
}

/// `(base − removed by either side) ∪ server additions ∪ client additions`,
/// ordered base first, then server additions, then client additions.
pub fn merge_labels(base: &[String], server: &[String], client: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = base
        .iter()
        .filter(|label| server.contains(label) && client.contains(label))
        .cloned()
        .collect();

    for label in server.iter().chain(client) {
        if !base.contains(label) && !merged.contains(label) {
            merged.push(label.clone());
        }
    }
    merged
}

fn merge_extra(
    base: &IndexMap<String, String>,
    server: &IndexMap<String, String>,
    client: &IndexMap<String, String>,
    conflicts: &mut BTreeSet<String>,
) -> IndexMap<String, String> {
    let mut merged = IndexMap::new();
    let keys = server
        .keys()
        .chain(client.keys().filter(|k| !server.contains_key(*k)));

    for key in keys {
        let value = merge_scalar(
            key.trim(),
            &base.get(key).cloned(),
            &server.get(key).cloned(),
            &client.get(key).cloned(),
            conflicts,
        );
        if let Some(value) = value {
            merged.insert(key.clone(), value);
        }
    }
    merged
}
