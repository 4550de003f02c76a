//! Host ⇄ guest message protocol.
//!
//! The host never injects code or capability data into guest source. It
//! calls the guest's `dispatch` export with one JSON `HostEnvelope` and
//! gets back a JSON list of `GuestMessage`s. Requests that need an answer
//! carry a `requestId`; the answer arrives as a `reply` in a later
//! dispatch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::SandboxError;
use crate::process::context::{AppInfo, UserInfo};
use crate::process::types::WindowId;
use crate::ui::Level;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub id: WindowId,
    pub title: String,
}

/// What a sandboxed app is told about its environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSurface {
    pub app: AppInfo,
    pub user: UserInfo,
    pub window: WindowInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostEnvelope {
    pub surface: ApiSurface,
    pub message: HostMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HostMessage {
    /// First message of every boot.
    Initialize,
    Reply {
        request_id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl HostMessage {
    pub fn success(request_id: impl Into<String>, value: Value) -> Self {
        Self::Reply {
            request_id: request_id.into(),
            ok: true,
            value,
            error: None,
        }
    }

    pub fn failure(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Reply {
            request_id: request_id.into(),
            ok: false,
            value: Value::Null,
            error: Some(error.into()),
        }
    }
}

fn info_level() -> Level {
    Level::Info
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GuestMessage {
    SetTitle {
        title: String,
    },
    Close,
    Notify {
        #[serde(default = "info_level")]
        level: Level,
        title: String,
        #[serde(default)]
        message: String,
    },
    Publish {
        topic: String,
        #[serde(default)]
        payload: Value,
    },
    ReadFile {
        request_id: String,
        path: String,
    },
    WriteFile {
        request_id: String,
        path: String,
        content: String,
    },
    ListDirectory {
        request_id: String,
        path: String,
    },
    CreateDirectory {
        request_id: String,
        path: String,
    },
    DeleteFile {
        request_id: String,
        path: String,
    },
    Log {
        message: String,
    },
    /// Guest finished initializing.
    Ready,
}

/// Accepts a JSON array of messages or a single message object.
pub fn parse_guest_output(raw: &str) -> Result<Vec<GuestMessage>, SandboxError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| SandboxError::Protocol(format!("not JSON: {e}")))?;
    let items = match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        single => vec![single],
    };
    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item.clone())
                .map_err(|e| SandboxError::Protocol(format!("{e}: {item}")))
        })
        .collect()
}
