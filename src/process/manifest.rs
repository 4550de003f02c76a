//! Application manifests.
//!
//! A manifest arrives from the `apps` service as loose JSON; `parse`
//! deserializes and validates it once, and everything downstream works on
//! the checked struct.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kernel::error::{KernelError, KernelResult};
use crate::security::permission;

static APP_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").expect("static regex"));

const BUILTIN_PREFIX: &str = "builtin:";

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowOptions {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub x: Option<i32>,
    #[serde(default)]
    pub y: Option<i32>,
    #[serde(default = "default_true")]
    pub resizable: bool,
    #[serde(default)]
    pub maximized: bool,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            x: None,
            y: None,
            resizable: true,
            maximized: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub id: String,
    pub title: String,
    pub version: String,
    pub entry: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub window: WindowOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// How a manifest's `entry` is booted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPoint {
    /// Host-defined app looked up by name.
    Builtin(String),
    /// Asset file loaded into the sandbox.
    Sandboxed { file: String },
}

impl Manifest {
    /// Deserialize and validate.
    pub fn parse(value: Value) -> KernelResult<Self> {
        let manifest: Manifest = serde_json::from_value(value)
            .map_err(|e| KernelError::Validation(format!("malformed manifest: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> KernelResult<()> {
        let invalid = |msg: String| Err(KernelError::Validation(msg));
        if !APP_ID_RE.is_match(&self.id) {
            return invalid(format!("invalid app id '{}'", self.id));
        }
        if self.title.trim().is_empty() {
            return invalid(format!("app '{}' has an empty title", self.id));
        }
        if self.version.trim().is_empty() {
            return invalid(format!("app '{}' has an empty version", self.id));
        }
        match self.entry_point() {
            EntryPoint::Builtin(name) if name.is_empty() => {
                return invalid(format!("app '{}' has an empty entry", self.id));
            }
            EntryPoint::Sandboxed { file } if file.is_empty() || file.contains("..") => {
                return invalid(format!("app '{}' has an invalid entry '{}'", self.id, self.entry));
            }
            _ => {}
        }
        for p in &self.permissions {
            permission::validate(p)
                .map_err(|e| KernelError::Validation(format!("app '{}': {e}", self.id)))?;
        }
        if self.window.width == 0 || self.window.height == 0 {
            return invalid(format!("app '{}' has a zero-sized window", self.id));
        }
        Ok(())
    }

    /// `builtin:<name>` or a bare identifier is a builtin; anything that
    /// looks like a file name (`main.wasm`, `dist/app.wasm`) is sandboxed.
    pub fn entry_point(&self) -> EntryPoint {
        let entry = self.entry.trim();
        if let Some(name) = entry.strip_prefix(BUILTIN_PREFIX) {
            return EntryPoint::Builtin(name.to_string());
        }
        if entry.contains('/') || entry.contains('.') {
            let file = entry.trim_start_matches("./").trim_start_matches('/');
            return EntryPoint::Sandboxed {
                file: file.to_string(),
            };
        }
        EntryPoint::Builtin(entry.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> Value {
        json!({
            "id": "editor",
            "title": "Text Editor",
            "version": "1.0.0",
            "entry": "builtin:editor",
            "permissions": ["filesystem.read.user.home"]
        })
    }

    #[test]
    fn parses_with_defaults() {
        let m = Manifest::parse(base()).unwrap();
        assert_eq!(m.window, WindowOptions::default());
        assert_eq!(m.entry_point(), EntryPoint::Builtin("editor".into()));
        assert!(m.icon.is_none());
    }

    #[test]
    fn missing_required_field_rejected() {
        let mut v = base();
        v.as_object_mut().unwrap().remove("entry");
        assert!(matches!(
            Manifest::parse(v).unwrap_err(),
            KernelError::Validation(_)
        ));
    }

    #[test]
    fn bad_permission_rejected() {
        let mut v = base();
        v["permissions"] = json!(["filesystem..read"]);
        let err = Manifest::parse(v).unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn bad_id_rejected() {
        let mut v = base();
        v["id"] = json!("../evil");
        assert!(Manifest::parse(v).is_err());
    }

    #[test]
    fn entry_resolution() {
        let mut m = Manifest::parse(base()).unwrap();
        m.entry = "files".into();
        assert_eq!(m.entry_point(), EntryPoint::Builtin("files".into()));
        m.entry = "./main.wasm".into();
        assert_eq!(
            m.entry_point(),
            EntryPoint::Sandboxed {
                file: "main.wasm".into()
            }
        );
        m.entry = "dist/app.wasm".into();
        assert_eq!(
            m.entry_point(),
            EntryPoint::Sandboxed {
                file: "dist/app.wasm".into()
            }
        );
    }

    #[test]
    fn traversal_entry_rejected() {
        let mut v = base();
        v["entry"] = json!("../../etc/passwd");
        assert!(Manifest::parse(v).is_err());
    }

    #[test]
    fn zero_window_rejected() {
        let mut v = base();
        v["window"] = json!({"width": 0});
        assert!(Manifest::parse(v).is_err());
    }
}
