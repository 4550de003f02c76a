//! File browser: one directory listing per process.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::kernel::error::{KernelError, KernelResult, NotFoundKind};
use crate::process::builtin::BuiltinApp;
use crate::process::context::AppContext;
use crate::process::types::{Process, ProcessId};
use crate::vfs::node::DirEntry;
use crate::vfs::path::normalize_path;

#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub path: String,
    pub entries: Vec<DirEntry>,
}

#[derive(Default)]
pub struct Files {
    views: Mutex<BTreeMap<ProcessId, (Listing, AppContext)>>,
}

impl Files {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listing(&self, pid: ProcessId) -> Option<Listing> {
        self.views
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&pid)
            .map(|(listing, _)| listing.clone())
    }

    /// Navigate the view for `pid` to `path`.
    pub async fn open(&self, pid: ProcessId, path: &str) -> KernelResult<()> {
        let ctx = self
            .views
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&pid)
            .map(|(_, ctx)| ctx.clone())
            .ok_or_else(|| KernelError::not_found(NotFoundKind::Process, pid.to_string()))?;

        let listing = Self::list(&ctx, normalize_path(path)).await?;
        if let Some(view) = self
            .views
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&pid)
        {
            view.0 = listing;
        }
        Ok(())
    }

    async fn list(ctx: &AppContext, path: String) -> KernelResult<Listing> {
        match ctx.filesystem.list_directory(&path).await {
            Ok(entries) => {
                ctx.window.set_title(format!("{path} - {}", ctx.app.title));
                Ok(Listing { path, entries })
            }
            Err(e) => {
                ctx.ui.notify_error(&format!("Cannot open {path}"), &e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl BuiltinApp for Files {
    fn name(&self) -> &str {
        "files"
    }

    async fn start(&self, process: &Process, ctx: AppContext) -> KernelResult<()> {
        let path = ctx
            .app
            .params
            .get("path")
            .and_then(Value::as_str)
            .map(normalize_path)
            .unwrap_or_else(|| ctx.user.home_dir());

        // A directory the user cannot see leaves the browser open and empty.
        let listing = Self::list(&ctx, path.clone()).await.unwrap_or(Listing {
            path,
            entries: Vec::new(),
        });
        self.views
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(process.id, (listing, ctx));
        Ok(())
    }

    fn stop(&self, pid: ProcessId) {
        self.views
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&pid);
    }
}
