//! Kernel-wide error types.

use std::fmt;

use thiserror::Error;

use super::state::{BootStage, KernelState};
use crate::sandbox::error::SandboxError;
use crate::service::ServiceError;

/// What a `NotFound` error failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Process,
    Window,
    File,
    App,
}

impl fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Process => "process",
            Self::Window => "window",
            Self::File => "file",
            Self::App => "app",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("authentication required")]
    AuthenticationRequired,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("{kind} not found: {target}")]
    NotFound { kind: NotFoundKind, target: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("launch cancelled: {0}")]
    Cancelled(String),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("sandbox: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("boot stage '{stage}' failed: {reason}")]
    Boot { stage: BootStage, reason: String },

    #[error("invalid kernel transition: {from} -> {to}")]
    InvalidTransition { from: KernelState, to: KernelState },

    #[error("kernel is not running (state: {0})")]
    NotRunning(KernelState),
}

impl KernelError {
    pub fn not_found(kind: NotFoundKind, target: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            target: target.into(),
        }
    }

    pub fn permission_denied(what: impl Into<String>) -> Self {
        Self::PermissionDenied(what.into())
    }

    /// Stable category name, used in event payloads and notifications.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthenticationRequired => "AuthenticationRequired",
            Self::PermissionDenied(_) => "PermissionDenied",
            Self::NotFound { .. } => "NotFound",
            Self::Conflict(_) => "Conflict",
            Self::Validation(_) => "ValidationError",
            Self::Cancelled(_) => "Cancelled",
            Self::Service(_) => "ServiceError",
            Self::StorageUnavailable(_) => "StorageUnavailable",
            Self::Sandbox(_) => "SandboxError",
            Self::Boot { .. } => "BootError",
            Self::InvalidTransition { .. } => "InvalidTransition",
            Self::NotRunning(_) => "NotRunning",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

pub type KernelResult<T> = Result<T, KernelError>;
