//! Text editor.
//!
//! Opens `params.filePath` if given. The editor applies its own path
//! policy on top of the filesystem permissions: non-admins may only open
//! files under their own home. A refused path is reported to the user and
//! the editor starts empty; the launch itself still succeeds.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::kernel::error::{KernelError, KernelResult, NotFoundKind};
use crate::process::builtin::BuiltinApp;
use crate::process::context::AppContext;
use crate::process::types::{Process, ProcessId};
use crate::vfs::path::{file_name, is_under, normalize_path};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub path: Option<String>,
    pub content: String,
    pub dirty: bool,
}

struct Session {
    document: Document,
    ctx: AppContext,
}

#[derive(Default)]
pub struct Editor {
    sessions: Mutex<BTreeMap<ProcessId, Session>>,
}

impl Editor {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, BTreeMap<ProcessId, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn document(&self, pid: ProcessId) -> Option<Document> {
        self.sessions().get(&pid).map(|s| s.document.clone())
    }

    pub fn edit(&self, pid: ProcessId, content: &str) -> KernelResult<()> {
        let mut sessions = self.sessions();
        let session = sessions
            .get_mut(&pid)
            .ok_or_else(|| KernelError::not_found(NotFoundKind::Process, pid.to_string()))?;
        session.document.content = content.to_string();
        session.document.dirty = true;
        Ok(())
    }

    /// Write the document back through the shared filesystem.
    pub async fn save(&self, pid: ProcessId) -> KernelResult<()> {
        let (path, content, ctx) = {
            let sessions = self.sessions();
            let session = sessions
                .get(&pid)
                .ok_or_else(|| KernelError::not_found(NotFoundKind::Process, pid.to_string()))?;
            let path = session
                .document
                .path
                .clone()
                .ok_or_else(|| KernelError::Validation("document has no file name".into()))?;
            (path, session.document.content.clone(), session.ctx.clone())
        };

        if let Err(e) = ctx.filesystem.write_file(&path, &content).await {
            ctx.ui.notify_error(&format!("Could not save {}", file_name(&path)), &e);
            return Err(e);
        }
        if let Some(session) = self.sessions().get_mut(&pid) {
            session.document.dirty = false;
        }
        info!(%pid, %path, "document saved");
        Ok(())
    }

    fn may_open(ctx: &AppContext, path: &str) -> bool {
        ctx.user.is_admin() || is_under(path, &ctx.user.home_dir())
    }

    async fn load(ctx: &AppContext, path: String) -> Document {
        if !Self::may_open(ctx, &path) {
            let err = KernelError::permission_denied(format!("{path} is outside your home directory"));
            ctx.ui.notify_error("Cannot open file", &err);
            return Document::default();
        }
        match ctx.filesystem.read_file(&path).await {
            Ok(content) => Document {
                path: Some(path),
                content,
                dirty: false,
            },
            Err(e) if e.is_not_found() => {
                debug!(%path, "new file");
                Document {
                    path: Some(path),
                    content: String::new(),
                    dirty: false,
                }
            }
            Err(e) => {
                ctx.ui.notify_error(&format!("Could not open {}", file_name(&path)), &e);
                Document::default()
            }
        }
    }
}

#[async_trait]
impl BuiltinApp for Editor {
    fn name(&self) -> &str {
        "editor"
    }

    async fn start(&self, process: &Process, ctx: AppContext) -> KernelResult<()> {
        let requested = ctx
            .app
            .params
            .get("filePath")
            .and_then(Value::as_str)
            .map(normalize_path);

        let document = match requested {
            Some(path) => Self::load(&ctx, path).await,
            None => Document::default(),
        };
        let title = match &document.path {
            Some(path) => format!("{} - {}", file_name(path), ctx.app.title),
            None => format!("Untitled - {}", ctx.app.title),
        };
        ctx.window.set_title(title);

        self.sessions().insert(process.id, Session { document, ctx });
        Ok(())
    }

    fn stop(&self, pid: ProcessId) {
        self.sessions().remove(&pid);
    }
}
