//! Persisted session credential.
//!
//! Only the token is stored; identity and permissions are re-fetched with
//! `auth.validateToken` at boot.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{KernelError, KernelResult};

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> KernelResult<Option<String>>;
    async fn save(&self, token: &str) -> KernelResult<()>;
    async fn clear(&self) -> KernelResult<()>;
}

#[derive(Serialize, Deserialize)]
struct SessionFile {
    token: String,
}

/// Token kept in a small JSON file.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn unavailable(path: &Path, e: impl std::fmt::Display) -> KernelError {
    KernelError::StorageUnavailable(format!("session file {}: {e}", path.display()))
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> KernelResult<Option<String>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(unavailable(&self.path, e)),
        };
        match serde_json::from_slice::<SessionFile>(&raw) {
            Ok(file) if !file.token.is_empty() => Ok(Some(file.token)),
            Ok(_) => Ok(None),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "discarding unreadable session file");
                Ok(None)
            }
        }
    }

    async fn save(&self, token: &str) -> KernelResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| unavailable(&self.path, e))?;
        }
        let body = serde_json::to_vec(&SessionFile {
            token: token.to_string(),
        })
        .map_err(|e| unavailable(&self.path, e))?;
        tokio::fs::write(&self.path, body)
            .await
            .map_err(|e| unavailable(&self.path, e))
    }

    async fn clear(&self) -> KernelResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(unavailable(&self.path, e)),
        }
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    token: Mutex<Option<String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: &str) -> Self {
        Self {
            token: Mutex::new(Some(token.to_string())),
        }
    }

    pub fn token(&self) -> Option<String> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> KernelResult<Option<String>> {
        Ok(self.token())
    }

    async fn save(&self, token: &str) -> KernelResult<()> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
        Ok(())
    }

    async fn clear(&self) -> KernelResult<()> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
