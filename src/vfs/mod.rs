//! VirtualFileSystem: permission-gated, path-addressed storage.
//!
//! Every operation normalizes its path, derives the permission it needs
//! from the path and the current user, and checks it before the backend
//! is touched. The backend is swappable at runtime (remote → local
//! fallback); callers keep the same `Arc<VirtualFileSystem>` throughout.

pub mod backend;
pub mod bootstrap;
pub mod local;
pub mod node;
pub mod path;
pub mod remote;
pub mod store;

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::kernel::error::{KernelError, KernelResult};
use crate::security::{validate_username, SecurityContext, User};
use backend::{BackendKind, FsBackend};
use local::LocalBackend;
use node::DirEntry;
use path::{is_under, normalize_path};
use store::{FileStore, MemoryStore};

/// Which permission family an operation falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsOp {
    Read,
    Write,
    Delete,
}

impl FsOp {
    fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
        }
    }
}

/// Permission scope of `path` as seen by `user`.
pub fn scope_of(path: &str, user: &User) -> String {
    if is_under(path, &user.home_dir()) {
        return "user.home".into();
    }
    if path == "/users" {
        return "users".into();
    }
    if let Some(owner) = home_owner(path) {
        return format!("users.{owner}");
    }
    if is_under(path, "/apps") {
        return "apps".into();
    }
    if is_under(path, "/system") {
        return "system".into();
    }
    "root".into()
}

/// `<owner>` of `/users/<owner>/...`.
fn home_owner(path: &str) -> Option<&str> {
    path.strip_prefix("/users/")?.split('/').next()
}

/// `filesystem.<op>.<scope>`
pub fn permission_for(op: FsOp, path: &str, user: &User) -> String {
    format!("filesystem.{}.{}", op.as_str(), scope_of(path, user))
}

pub struct VirtualFileSystem {
    backend: RwLock<Arc<dyn FsBackend>>,
    security: Arc<SecurityContext>,
}

impl VirtualFileSystem {
    pub fn new(backend: Arc<dyn FsBackend>, security: Arc<SecurityContext>) -> Self {
        Self {
            backend: RwLock::new(backend),
            security,
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend().kind()
    }

    fn backend(&self) -> Arc<dyn FsBackend> {
        self.backend
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the active backend for the rest of the session.
    pub fn swap_backend(&self, backend: Arc<dyn FsBackend>) {
        let mut guard = self.backend.write().unwrap_or_else(PoisonError::into_inner);
        warn!(from = %guard.kind(), to = %backend.kind(), "filesystem backend swapped");
        *guard = backend;
    }

    /// Normalize `path` and check the permission `op` needs on it.
    fn authorize(&self, op: FsOp, path: &str) -> KernelResult<String> {
        let path = normalize_path(path);
        let user = self
            .security
            .current_user()
            .ok_or(KernelError::AuthenticationRequired)?;
        // A dotted owner would widen into extra permission segments.
        if let Some(owner) = home_owner(&path) {
            validate_username(owner)?;
        }
        self.security.require(&permission_for(op, &path, &user))?;
        debug!(op = op.as_str(), %path, "fs access granted");
        Ok(path)
    }

    pub async fn read_file(&self, path: &str) -> KernelResult<String> {
        let path = self.authorize(FsOp::Read, path)?;
        self.backend().read_file(&path).await
    }

    pub async fn write_file(&self, path: &str, content: &str) -> KernelResult<()> {
        let path = self.authorize(FsOp::Write, path)?;
        self.backend().write_file(&path, content).await
    }

    pub async fn delete_file(&self, path: &str) -> KernelResult<()> {
        let path = self.authorize(FsOp::Delete, path)?;
        self.backend().delete(&path).await
    }

    pub async fn list_directory(&self, path: &str) -> KernelResult<Vec<DirEntry>> {
        let path = self.authorize(FsOp::Read, path)?;
        self.backend().list_directory(&path).await
    }

    pub async fn create_directory(&self, path: &str) -> KernelResult<()> {
        let path = self.authorize(FsOp::Write, path)?;
        self.backend().create_directory(&path).await
    }

    pub async fn exists(&self, path: &str) -> KernelResult<bool> {
        let path = self.authorize(FsOp::Read, path)?;
        self.backend().exists(&path).await
    }

    /// Create the base layout on the active backend. Kernel-internal: runs
    /// without a permission check.
    pub async fn ensure_base_structure(&self, user: Option<&User>) -> KernelResult<()> {
        bootstrap::ensure_base_structure(self.backend().as_ref(), user).await
    }
}

/// Open the local backend over `store_path`, or over a session-only
/// in-memory store if that fails. The error is returned alongside so the
/// caller can surface it.
pub async fn open_local(store_path: &Path) -> (Arc<LocalBackend>, Option<KernelError>) {
    let persistent = async {
        let store = FileStore::open(store_path).await?;
        LocalBackend::open(Arc::new(store)).await
    };
    match persistent.await {
        Ok(backend) => (Arc::new(backend), None),
        Err(e) => {
            warn!(
                path = %store_path.display(),
                error = %e,
                "local storage unavailable, using in-memory filesystem for this session"
            );
            (memory_backend(), Some(e))
        }
    }
}

/// Empty session-only backend.
pub fn memory_backend() -> Arc<LocalBackend> {
    let tree = store::Tree::from([("/".to_string(), node::FsNode::directory("/"))]);
    Arc::new(LocalBackend::from_tree(tree, Arc::new(MemoryStore::new())))
}
