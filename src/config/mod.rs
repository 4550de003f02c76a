//! Kernel configuration.
//!
//! User-level config: `~/.webdesk/config.yaml`
//! Project-level config: `.webdesk/config.yaml` (overrides user keys)
//!
//! Resolution: defaults → user file → project file → `WEBDESK_API_URL`.
//! A file that fails to parse is skipped with a warning; `from_path` is
//! the strict variant used when a path is given explicitly.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::warn;

use crate::kernel::error::{KernelError, KernelResult};

pub const API_URL_ENV: &str = "WEBDESK_API_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesystemConfig {
    /// Use the backend's filesystem service; otherwise the local tree.
    pub remote: bool,
    /// Where the local tree is persisted.
    pub local_store: PathBuf,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            remote: true,
            local_store: data_dir().join("fs"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesktopConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub api_base_url: String,
    pub filesystem: FilesystemConfig,
    pub session_file: PathBuf,
    pub boot_timeout_ms: u64,
    pub ready_poll_ms: u64,
    pub language: String,
    pub desktop: DesktopConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080".into(),
            filesystem: FilesystemConfig::default(),
            session_file: data_dir().join("session.json"),
            boot_timeout_ms: 10_000,
            ready_poll_ms: 250,
            language: "en".into(),
            desktop: DesktopConfig::default(),
        }
    }
}

/// Path to `~/.webdesk/`, falling back to a relative `.webdesk` when no
/// home directory is known.
fn dirs_path() -> Option<PathBuf> {
    #[cfg(windows)]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|p| PathBuf::from(p).join(".webdesk"))
    }
    #[cfg(not(windows))]
    {
        std::env::var("HOME")
            .ok()
            .map(|p| PathBuf::from(p).join(".webdesk"))
    }
}

fn data_dir() -> PathBuf {
    dirs_path().unwrap_or_else(|| PathBuf::from(".webdesk"))
}

fn user_config_path() -> Option<PathBuf> {
    dirs_path().map(|p| p.join("config.yaml"))
}

fn project_config_path() -> PathBuf {
    PathBuf::from(".webdesk").join("config.yaml")
}

/// Overlay `patch` onto `base`, recursing into mappings.
fn merge(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Mapping(base), Value::Mapping(patch)) => {
            for (k, v) in patch {
                match base.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        base.insert(k, v);
                    }
                }
            }
        }
        (base, patch) => *base = patch,
    }
}

fn read_layer(path: &Path) -> Option<Value> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_yaml::from_str::<Value>(&content) {
        Ok(Value::Null) => None,
        Ok(v) => Some(v),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unparseable config file");
            None
        }
    }
}

impl KernelConfig {
    /// Load from the standard locations plus the environment.
    pub fn load() -> Self {
        let layers: Vec<PathBuf> = user_config_path()
            .into_iter()
            .chain(std::iter::once(project_config_path()))
            .collect();
        let mut config = Self::load_from(&layers);
        config.apply_env();
        config
    }

    /// Merge the given files in order; later files win key by key.
    pub fn load_from(paths: &[PathBuf]) -> Self {
        let mut merged = match serde_yaml::to_value(Self::default()) {
            Ok(v) => v,
            Err(_) => return Self::default(),
        };
        for path in paths {
            let Some(layer) = read_layer(path) else {
                continue;
            };
            let mut candidate = merged.clone();
            merge(&mut candidate, layer);
            match serde_yaml::from_value::<KernelConfig>(candidate.clone()) {
                Ok(_) => merged = candidate,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ignoring config file with invalid values")
                }
            }
        }
        serde_yaml::from_value(merged).unwrap_or_default()
    }

    /// Strict load of one file. Missing keys take defaults; anything
    /// unreadable or malformed is an error.
    pub fn from_path(path: &Path) -> KernelResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            KernelError::Validation(format!("cannot read config {}: {e}", path.display()))
        })?;
        let config: KernelConfig = serde_yaml::from_str(&content).map_err(|e| {
            KernelError::Validation(format!("malformed config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api_base_url = url;
            }
        }
    }

    pub fn validate(&self) -> KernelResult<()> {
        if self.api_base_url.trim().is_empty() {
            return Err(KernelError::Validation("api_base_url is empty".into()));
        }
        if self.boot_timeout_ms == 0 {
            return Err(KernelError::Validation("boot_timeout_ms must be positive".into()));
        }
        if self.ready_poll_ms == 0 {
            return Err(KernelError::Validation("ready_poll_ms must be positive".into()));
        }
        if self.desktop.width == 0 || self.desktop.height == 0 {
            return Err(KernelError::Validation("desktop dimensions must be positive".into()));
        }
        Ok(())
    }
}
