//! Remote backend: every call goes to the `filesystem` service.
//!
//! Server rejections are mapped back onto the local backend's error
//! classes, so callers see `NotFound`, `Conflict` and `PermissionDenied`
//! whichever backend is active. The response `code` decides when present;
//! otherwise the message is matched against the service's wording
//! ("not found", "does not exist", "not empty", "already exists",
//! "permission denied", "forbidden").

use std::sync::Arc;

use async_trait::async_trait;

use super::backend::{BackendKind, FsBackend};
use super::node::{sort_entries, DirEntry};
use super::path::{file_name, parent_path};
use crate::kernel::error::{KernelError, KernelResult, NotFoundKind};
use crate::service::protocol::{DirectoryListing, FileContent, FilesystemRequest};
use crate::service::{ServiceError, ServiceHub};

pub struct RemoteBackend {
    services: Arc<ServiceHub>,
}

impl RemoteBackend {
    pub fn new(services: Arc<ServiceHub>) -> Self {
        Self { services }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    NotFound,
    Conflict,
    Denied,
}

impl Rejection {
    fn classify(code: Option<&str>, message: &str) -> Option<Self> {
        match code {
            Some("notFound") => return Some(Self::NotFound),
            Some("conflict") => return Some(Self::Conflict),
            Some("permissionDenied") => return Some(Self::Denied),
            _ => {}
        }
        let message = message.to_ascii_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| message.contains(n));
        if has(&["not found", "does not exist"]) {
            Some(Self::NotFound)
        } else if has(&["not empty", "already exists"]) {
            Some(Self::Conflict)
        } else if has(&["permission denied", "forbidden"]) {
            Some(Self::Denied)
        } else {
            None
        }
    }
}

/// Map a filesystem-service rejection for `path` onto a kernel error class.
fn reclassify(err: KernelError, path: &str) -> KernelError {
    remap(&err, path).unwrap_or(err)
}

fn remap(err: &KernelError, path: &str) -> Option<KernelError> {
    let KernelError::Service(ServiceError::Rejected { code, message, .. }) = err else {
        return None;
    };
    let mapped = match Rejection::classify(code.as_deref(), message)? {
        Rejection::NotFound => KernelError::not_found(NotFoundKind::File, path),
        Rejection::Conflict => KernelError::Conflict(format!("{path}: {message}")),
        Rejection::Denied => KernelError::permission_denied(format!("{path}: {message}")),
    };
    Some(mapped)
}

#[async_trait]
impl FsBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn read_file(&self, path: &str) -> KernelResult<String> {
        let file: FileContent = self
            .services
            .filesystem
            .call(&FilesystemRequest::ReadFile { path: path.into() })
            .await
            .map_err(|e| reclassify(e, path))?;
        Ok(file.content)
    }

    async fn write_file(&self, path: &str, content: &str) -> KernelResult<()> {
        self.services
            .filesystem
            .call_unit(&FilesystemRequest::WriteFile {
                path: path.into(),
                content: content.into(),
            })
            .await
            .map_err(|e| reclassify(e, path))
    }

    async fn delete(&self, path: &str) -> KernelResult<()> {
        self.services
            .filesystem
            .call_unit(&FilesystemRequest::DeleteFile { path: path.into() })
            .await
            .map_err(|e| reclassify(e, path))
    }

    async fn list_directory(&self, path: &str) -> KernelResult<Vec<DirEntry>> {
        let mut entries: DirectoryListing = self
            .services
            .filesystem
            .call(&FilesystemRequest::ListDirectory { path: path.into() })
            .await
            .map_err(|e| reclassify(e, path))?;
        sort_entries(&mut entries);
        Ok(entries)
    }

    async fn create_directory(&self, path: &str) -> KernelResult<()> {
        self.services
            .filesystem
            .call_unit(&FilesystemRequest::CreateDirectory { path: path.into() })
            .await
            .map_err(|e| reclassify(e, path))
    }

    /// Looks the name up in the parent's listing; a missing parent means
    /// the path does not exist either.
    async fn exists(&self, path: &str) -> KernelResult<bool> {
        let Some(parent) = parent_path(path) else {
            return Ok(true);
        };
        match self.list_directory(&parent).await {
            Ok(entries) => Ok(entries.iter().any(|e| e.name == file_name(path))),
            Err(e) if e.is_not_found() => Ok(false),
            Err(KernelError::Service(ServiceError::Rejected { .. })) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
