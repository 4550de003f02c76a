//! Filesystem nodes and listing entries.

use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::path::file_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

/// One node of the local tree. Directories keep their children's names
/// (ordered); files keep their content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsNode {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub children: BTreeSet<String>,
    pub created_at: u64,
    pub modified_at: u64,
}

impl FsNode {
    pub fn directory(path: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            path: path.into(),
            kind: NodeKind::Directory,
            content: String::new(),
            children: BTreeSet::new(),
            created_at: now,
            modified_at: now,
        }
    }

    pub fn file(path: impl Into<String>, content: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            path: path.into(),
            kind: NodeKind::File,
            content: content.into(),
            children: BTreeSet::new(),
            created_at: now,
            modified_at: now,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    pub fn touch(&mut self) {
        self.modified_at = now_millis();
    }

    pub fn entry(&self) -> DirEntry {
        DirEntry {
            name: file_name(&self.path).to_string(),
            path: self.path.clone(),
            kind: self.kind,
            size: self.content.len() as u64,
            modified_at: self.modified_at,
        }
    }
}

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified_at: u64,
}

/// Directories first, then by name.
pub fn sort_entries(entries: &mut [DirEntry]) {
    entries.sort_by(|a, b| {
        let rank = |e: &DirEntry| (e.kind != NodeKind::Directory) as u8;
        rank(a).cmp(&rank(b)).then_with(|| a.name.cmp(&b.name))
    });
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, kind: NodeKind) -> DirEntry {
        DirEntry {
            name: name.into(),
            path: format!("/{name}"),
            kind,
            size: 0,
            modified_at: 0,
        }
    }

    #[test]
    fn directories_sort_before_files() {
        let mut entries = vec![
            entry("b.txt", NodeKind::File),
            entry("zeta", NodeKind::Directory),
            entry("a.txt", NodeKind::File),
            entry("Alpha", NodeKind::Directory),
        ];
        sort_entries(&mut entries);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "zeta", "a.txt", "b.txt"]);
    }

    #[test]
    fn entry_wire_shape() {
        let node = FsNode::file("/users/alice/notes.txt", "hello");
        let v = serde_json::to_value(node.entry()).unwrap();
        assert_eq!(v["name"], "notes.txt");
        assert_eq!(v["type"], "file");
        assert_eq!(v["size"], 5);
    }
}
