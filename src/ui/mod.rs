//! UI helpers shared by the kernel and applications: notifications,
//! dismissible banners, and the top-level surface.
//!
//! Nothing here renders. Every notification is published on
//! `ui:notification` and kept in a bounded history; front ends subscribe.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::events::{topics, EventBus};
use crate::kernel::error::KernelError;

const HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: u64,
    pub level: Level,
    pub title: String,
    pub message: String,
    /// Error category (`KernelError::kind`) when raised from an error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Banners stay until dismissed; toasts are fire-and-forget.
    pub banner: bool,
}

/// Top-level screen shown by the desktop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "surface", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Surface {
    Loading,
    Login,
    Desktop,
    /// Terminal boot failure; only a manual restart leaves it.
    FatalError { message: String },
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading => f.write_str("loading"),
            Self::Login => f.write_str("login"),
            Self::Desktop => f.write_str("desktop"),
            Self::FatalError { message } => write!(f, "fatalError ({message})"),
        }
    }
}

pub struct Notifier {
    next_id: AtomicU64,
    history: Mutex<VecDeque<Notification>>,
    banners: Mutex<Vec<Notification>>,
    events: Arc<EventBus>,
}

impl Notifier {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            history: Mutex::new(VecDeque::new()),
            banners: Mutex::new(Vec::new()),
            events,
        }
    }

    fn raise(&self, level: Level, title: &str, message: &str, kind: Option<&str>, banner: bool) -> u64 {
        let notification = Notification {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            level,
            title: title.to_string(),
            message: message.to_string(),
            kind: kind.map(str::to_string),
            banner,
        };
        match level {
            Level::Error | Level::Warning => warn!(title, message, kind, "notification"),
            Level::Info | Level::Success => info!(title, message, "notification"),
        }

        {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            if history.len() == HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(notification.clone());
        }
        if banner {
            self.banners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(notification.clone());
        }

        let id = notification.id;
        self.events.publish_json(topics::UI_NOTIFICATION, &notification);
        id
    }

    pub fn notify(&self, level: Level, title: &str, message: &str) -> u64 {
        self.raise(level, title, message, None, false)
    }

    /// Toast for a failed operation, tagged with the error's category.
    pub fn notify_error(&self, title: &str, error: &KernelError) -> u64 {
        self.raise(Level::Error, title, &error.to_string(), Some(error.kind()), false)
    }

    /// Non-fatal, dismissible banner.
    pub fn banner(&self, level: Level, title: &str, message: &str) -> u64 {
        self.raise(level, title, message, None, true)
    }

    pub fn dismiss(&self, id: u64) -> bool {
        let mut banners = self.banners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = banners.len();
        banners.retain(|b| b.id != id);
        before != banners.len()
    }

    pub fn banners(&self) -> Vec<Notification> {
        self.banners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Most recent notifications, oldest first.
    pub fn history(&self) -> Vec<Notification> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}
