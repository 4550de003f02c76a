//! Backend seam of the virtual filesystem.
//!
//! Callers never see which backend is active; `VirtualFileSystem` gates
//! permissions and then forwards to whichever `FsBackend` it holds.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use super::node::DirEntry;
use crate::kernel::error::KernelResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Forwarded to the `filesystem` service.
    Remote,
    /// Local tree persisted on disk.
    Local,
    /// Local tree held for this session only.
    Memory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Remote => "remote",
            Self::Local => "local",
            Self::Memory => "memory",
        };
        f.write_str(s)
    }
}

/// All paths passed in are already normalized.
#[async_trait]
pub trait FsBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn read_file(&self, path: &str) -> KernelResult<String>;

    async fn write_file(&self, path: &str, content: &str) -> KernelResult<()>;

    /// Delete a file or an empty directory.
    async fn delete(&self, path: &str) -> KernelResult<()>;

    async fn list_directory(&self, path: &str) -> KernelResult<Vec<DirEntry>>;

    async fn create_directory(&self, path: &str) -> KernelResult<()>;

    async fn exists(&self, path: &str) -> KernelResult<bool>;
}
