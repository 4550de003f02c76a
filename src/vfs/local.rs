//! Local backend: the whole tree in one map, saved after every mutation.
//!
//! Mutations are applied to a copy of the tree, saved, and only then
//! committed, so a failed save leaves the in-memory tree untouched. The
//! tree lock is held across the save to keep saves ordered.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::backend::{BackendKind, FsBackend};
use super::node::{sort_entries, DirEntry, FsNode};
use super::path::{file_name, parent_path};
use super::store::{Tree, TreeStore};
use crate::kernel::error::{KernelError, KernelResult, NotFoundKind};

pub struct LocalBackend {
    tree: Mutex<Tree>,
    store: Arc<dyn TreeStore>,
}

impl LocalBackend {
    /// Load the tree from `store`, starting with a bare root if empty.
    pub async fn open(store: Arc<dyn TreeStore>) -> KernelResult<Self> {
        let mut tree = store.load().await?.unwrap_or_default();
        if !tree.contains_key("/") {
            tree.insert("/".into(), FsNode::directory("/"));
        }
        debug!(store = %store.describe(), nodes = tree.len(), "local tree loaded");
        Ok(Self {
            tree: Mutex::new(tree),
            store,
        })
    }

    pub fn from_tree(tree: Tree, store: Arc<dyn TreeStore>) -> Self {
        Self {
            tree: Mutex::new(tree),
            store,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_persistent()
    }

    async fn mutate<F>(&self, apply: F) -> KernelResult<()>
    where
        F: FnOnce(&mut Tree) -> KernelResult<()>,
    {
        let mut tree = self.tree.lock().await;
        let mut next = tree.clone();
        apply(&mut next)?;
        self.store.save(&next).await?;
        *tree = next;
        Ok(())
    }
}

fn missing(path: &str) -> KernelError {
    KernelError::not_found(NotFoundKind::File, path)
}

/// The parent directory node of `path`, which must exist.
fn parent_dir<'a>(tree: &'a mut Tree, path: &str) -> KernelResult<&'a mut FsNode> {
    let parent = parent_path(path).ok_or_else(|| KernelError::Conflict("/ already exists".into()))?;
    let node = tree.get_mut(&parent).ok_or_else(|| missing(&parent))?;
    if !node.is_dir() {
        return Err(KernelError::Validation(format!("{parent} is not a directory")));
    }
    Ok(node)
}

#[async_trait]
impl FsBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        if self.store.is_persistent() {
            BackendKind::Local
        } else {
            BackendKind::Memory
        }
    }

    async fn read_file(&self, path: &str) -> KernelResult<String> {
        let tree = self.tree.lock().await;
        let node = tree.get(path).ok_or_else(|| missing(path))?;
        if node.is_dir() {
            return Err(KernelError::Validation(format!("{path} is a directory")));
        }
        Ok(node.content.clone())
    }

    async fn write_file(&self, path: &str, content: &str) -> KernelResult<()> {
        self.mutate(|tree| {
            if let Some(existing) = tree.get_mut(path) {
                if existing.is_dir() {
                    return Err(KernelError::Conflict(format!("{path} is a directory")));
                }
                existing.content = content.to_string();
                existing.touch();
                return Ok(());
            }
            let parent = parent_dir(tree, path)?;
            parent.children.insert(file_name(path).to_string());
            parent.touch();
            tree.insert(path.to_string(), FsNode::file(path, content));
            Ok(())
        })
        .await
    }

    async fn delete(&self, path: &str) -> KernelResult<()> {
        if path == "/" {
            return Err(KernelError::permission_denied("cannot delete /"));
        }
        self.mutate(|tree| {
            let node = tree.get(path).ok_or_else(|| missing(path))?;
            if node.is_dir() && !node.children.is_empty() {
                return Err(KernelError::Conflict(format!(
                    "{path} is not empty ({} entries)",
                    node.children.len()
                )));
            }
            tree.remove(path);
            let parent = parent_dir(tree, path)?;
            parent.children.remove(file_name(path));
            parent.touch();
            Ok(())
        })
        .await
    }

    async fn list_directory(&self, path: &str) -> KernelResult<Vec<DirEntry>> {
        let tree = self.tree.lock().await;
        let dir = tree.get(path).ok_or_else(|| missing(path))?;
        if !dir.is_dir() {
            return Err(KernelError::Validation(format!("{path} is not a directory")));
        }
        let mut entries: Vec<DirEntry> = dir
            .children
            .iter()
            .filter_map(|name| {
                let child = if path == "/" {
                    format!("/{name}")
                } else {
                    format!("{path}/{name}")
                };
                tree.get(&child).map(FsNode::entry)
            })
            .collect();
        sort_entries(&mut entries);
        Ok(entries)
    }

    async fn create_directory(&self, path: &str) -> KernelResult<()> {
        self.mutate(|tree| {
            if tree.contains_key(path) {
                return Err(KernelError::Conflict(format!("{path} already exists")));
            }
            let parent = parent_dir(tree, path)?;
            parent.children.insert(file_name(path).to_string());
            parent.touch();
            tree.insert(path.to_string(), FsNode::directory(path));
            Ok(())
        })
        .await
    }

    async fn exists(&self, path: &str) -> KernelResult<bool> {
        Ok(self.tree.lock().await.contains_key(path))
    }
}
