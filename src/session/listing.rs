use super::Session;
use super::command::BusyGuard;
use super::prompt::READY_PROMPT;
use crate::error::StorageResult;
use serde::Serialize;
use std::cmp::Ordering;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Directory,
    File,
}

/// One entry of a device directory listing.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Absolute device path, the listed directory joined with the name.
    pub path: String,
    /// Present only for files whose listing line carried a numeric size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl Session {
    /// Lists a device directory. Directories sort first, then names
    /// case-insensitively; callers may rely on that order.
    pub async fn list_directory(&self, path: &str) -> StorageResult<Vec<DirEntry>> {
        self.ensure_ready()?;
        let _guard = BusyGuard::acquire(self.busy_flag())?;
        let settle = Duration::from_millis(self.timing().list_settle_ms);
        let command = format!("storage list {path}");
        let response = self.exchange_settle(&command, settle).await?;
        let entries = parse_listing(&response, path);
        tracing::debug!(path, count = entries.len(), "Directory listed");
        Ok(entries)
    }
}

/// Parses a `storage list` response. Echo and prompt lines are dropped,
/// as is anything that carries neither entry tag.
pub(crate) fn parse_listing(response: &str, path: &str) -> Vec<DirEntry> {
    let mut entries = Vec::new();
    let mut dropped = 0usize;
    for line in response.lines().map(str::trim) {
        if line.is_empty() || line.contains("storage list") || line.contains(READY_PROMPT) {
            continue;
        }
        match classify_line(line, path) {
            Some(entry) => entries.push(entry),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        tracing::debug!(dropped, "Unrecognized listing lines dropped");
    }
    entries.sort_by(compare_entries);
    entries
}

fn classify_line(line: &str, dir: &str) -> Option<DirEntry> {
    if let Some(rest) = line.strip_prefix("[D]") {
        let name = rest.trim();
        if name.is_empty() {
            return None;
        }
        return Some(DirEntry {
            name: name.to_string(),
            kind: EntryKind::Directory,
            path: join_path(dir, name),
            size: None,
        });
    }
    if let Some(rest) = line.strip_prefix("[F]") {
        let mut parts = rest.trim().split_whitespace();
        let name = parts.next()?;
        let size = parts.next().and_then(|token| token.parse::<u64>().ok());
        return Some(DirEntry {
            name: name.to_string(),
            kind: EntryKind::File,
            path: join_path(dir, name),
            size,
        });
    }
    None
}

fn compare_entries(a: &DirEntry, b: &DirEntry) -> Ordering {
    match (a.kind, b.kind) {
        (EntryKind::Directory, EntryKind::File) => Ordering::Less,
        (EntryKind::File, EntryKind::Directory) => Ordering::Greater,
        _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    }
}

pub(crate) fn join_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}
