//! Persistence for the local tree.
//!
//! The whole tree is stored as one serialized map. On-disk format:
//! ```text
//! [crc32: u32 LE][JSON map: path -> node]
//! ```
//! Saves go to a sibling temp file and are renamed into place, so a crash
//! leaves either the old or the new tree, never a torn one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use crc32fast::Hasher;
use tracing::debug;

use super::node::FsNode;
use crate::kernel::error::{KernelError, KernelResult};

/// Normalized path -> node.
pub type Tree = BTreeMap<String, FsNode>;

#[async_trait]
pub trait TreeStore: Send + Sync {
    /// Whether saved trees survive the session.
    fn is_persistent(&self) -> bool;

    fn describe(&self) -> String;

    /// `None` when nothing has been saved yet.
    async fn load(&self) -> KernelResult<Option<Tree>>;

    async fn save(&self, tree: &Tree) -> KernelResult<()>;
}

pub fn encode(tree: &Tree) -> KernelResult<Vec<u8>> {
    let json = serde_json::to_vec(tree)
        .map_err(|e| KernelError::StorageUnavailable(format!("tree not serializable: {e}")))?;
    let mut hasher = Hasher::new();
    hasher.update(&json);
    let mut buf = Vec::with_capacity(4 + json.len());
    buf.extend_from_slice(&hasher.finalize().to_le_bytes());
    buf.extend_from_slice(&json);
    Ok(buf)
}

pub fn decode(bytes: &[u8]) -> KernelResult<Tree> {
    if bytes.len() < 4 {
        return Err(KernelError::StorageUnavailable(format!(
            "store truncated ({} bytes)",
            bytes.len()
        )));
    }
    let (crc_bytes, json) = bytes.split_at(4);
    let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    let mut hasher = Hasher::new();
    hasher.update(json);
    let actual = hasher.finalize();
    if stored != actual {
        return Err(KernelError::StorageUnavailable(format!(
            "checksum mismatch: stored {stored:08x}, computed {actual:08x}"
        )));
    }
    serde_json::from_slice(json)
        .map_err(|e| KernelError::StorageUnavailable(format!("store unreadable: {e}")))
}

/// Tree persisted to a single file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Open (or prepare) the store at `path`. Fails if the location cannot
    /// be created or written.
    pub async fn open(path: &Path) -> KernelResult<Self> {
        let unavailable = |e: std::io::Error| {
            KernelError::StorageUnavailable(format!("{}: {e}", path.display()))
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await.map_err(unavailable)?;
        }
        // Check writability without touching existing content.
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(unavailable)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TreeStore for FileStore {
    fn is_persistent(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn load(&self) -> KernelResult<Option<Tree>> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            KernelError::StorageUnavailable(format!("{}: {e}", self.path.display()))
        })?;
        if bytes.is_empty() {
            return Ok(None);
        }
        decode(&bytes).map(Some)
    }

    async fn save(&self, tree: &Tree) -> KernelResult<()> {
        let bytes = encode(tree)?;
        let tmp = self.path.with_extension("tmp");
        let unavailable = |e: std::io::Error| {
            KernelError::StorageUnavailable(format!("{}: {e}", self.path.display()))
        };
        tokio::fs::write(&tmp, &bytes).await.map_err(unavailable)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(unavailable)?;
        debug!(path = %self.path.display(), nodes = tree.len(), "tree saved");
        Ok(())
    }
}

/// Session-scoped store: keeps the last saved tree in memory and loses it
/// when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Mutex<Option<Tree>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TreeStore for MemoryStore {
    fn is_persistent(&self) -> bool {
        false
    }

    fn describe(&self) -> String {
        "in-memory (session only)".into()
    }

    async fn load(&self) -> KernelResult<Option<Tree>> {
        Ok(self
            .snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn save(&self, tree: &Tree) -> KernelResult<()> {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = Some(tree.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_tree() -> Tree {
        let mut tree = Tree::new();
        let mut root = FsNode::directory("/");
        root.children.insert("readme.txt".into());
        tree.insert("/".into(), root);
        tree.insert("/readme.txt".into(), FsNode::file("/readme.txt", "hi"));
        tree
    }

    #[tokio::test]
    async fn file_store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("tree.bin");

        let store = FileStore::open(&path).await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        store.save(&sample_tree()).await.unwrap();

        let reopened = FileStore::open(&path).await.unwrap();
        let tree = reopened.load().await.unwrap().unwrap();
        assert_eq!(tree["/readme.txt"].content, "hi");
        assert!(tree["/"].children.contains("readme.txt"));
    }

    #[tokio::test]
    async fn corrupted_store_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tree.bin");
        let store = FileStore::open(&path).await.unwrap();
        store.save(&sample_tree()).await.unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, KernelError::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn unwritable_location_fails_to_open() {
        let dir = TempDir::new().unwrap();
        // A regular file where a directory is expected.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let err = FileStore::open(&blocker.join("tree.bin")).await.unwrap_err();
        assert!(matches!(err, KernelError::StorageUnavailable(_)));
    }

    #[test]
    fn truncated_bytes_rejected() {
        assert!(decode(&[1, 2]).is_err());
    }

    #[tokio::test]
    async fn memory_store_is_not_persistent() {
        let store = MemoryStore::new();
        assert!(!store.is_persistent());
        assert!(store.load().await.unwrap().is_none());
        store.save(&sample_tree()).await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap().len(), 2);
    }
}
