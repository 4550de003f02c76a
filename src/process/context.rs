//! The capability object handed to a booting application.
//!
//! An app sees exactly what is in `AppContext` and nothing else: its own
//! identity, the current user, a handle to its own window, and shared
//! references to the filesystem, notifier, and bus.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use super::types::{ProcessId, WindowId};
use super::window::{WindowCommand, WindowRequest};
use crate::events::EventBus;
use crate::sandbox::protocol::{ApiSurface, WindowInfo};
use crate::security::{User, ADMIN_ROLE};
use crate::ui::Notifier;
use crate::vfs::VirtualFileSystem;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub id: String,
    pub title: String,
    pub version: String,
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub username: String,
    pub name: String,
    pub roles: Vec<String>,
}

impl UserInfo {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == ADMIN_ROLE)
    }

    pub fn home_dir(&self) -> String {
        format!("/users/{}", self.username)
    }
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            name: user.display_name.clone(),
            roles: user.roles.iter().cloned().collect(),
        }
    }
}

/// An app's handle on its own window. Commands are queued for the
/// kernel's input loop; nothing is applied in place.
#[derive(Debug, Clone)]
pub struct WindowHandle {
    process_id: ProcessId,
    window_id: WindowId,
    initial_title: String,
    commands: mpsc::UnboundedSender<WindowRequest>,
}

impl WindowHandle {
    pub(crate) fn new(
        process_id: ProcessId,
        window_id: WindowId,
        initial_title: String,
        commands: mpsc::UnboundedSender<WindowRequest>,
    ) -> Self {
        Self {
            process_id,
            window_id,
            initial_title,
            commands,
        }
    }

    /// The window this app renders into.
    pub fn container(&self) -> WindowId {
        self.window_id
    }

    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    pub fn set_title(&self, title: impl Into<String>) {
        self.send(WindowCommand::SetTitle {
            title: title.into(),
        });
    }

    pub fn close(&self) {
        self.send(WindowCommand::Close);
    }

    pub fn send(&self, command: WindowCommand) {
        let request = WindowRequest {
            window_id: self.window_id,
            command,
        };
        if self.commands.send(request).is_err() {
            debug!(window = %self.window_id, "window command dropped: input loop gone");
        }
    }
}

#[derive(Clone)]
pub struct AppContext {
    pub app: AppInfo,
    pub user: UserInfo,
    pub window: WindowHandle,
    pub filesystem: Arc<VirtualFileSystem>,
    pub ui: Arc<Notifier>,
    pub events: Arc<EventBus>,
}

impl AppContext {
    /// Serializable view handed to sandboxed code.
    pub fn surface(&self) -> ApiSurface {
        ApiSurface {
            app: self.app.clone(),
            user: self.user.clone(),
            window: WindowInfo {
                id: self.window.container(),
                title: self.window.initial_title.clone(),
            },
        }
    }
}
