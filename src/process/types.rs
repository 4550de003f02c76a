//! Process records.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::manifest::{EntryPoint, Manifest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One window per process; the ids share a value space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(pub u64);

impl From<ProcessId> for WindowId {
    fn from(pid: ProcessId) -> Self {
        Self(pid.0)
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessStatus {
    Starting,
    Running,
    Terminating,
    Terminated,
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    pub id: ProcessId,
    pub app_id: String,
    pub window_id: WindowId,
    pub status: ProcessStatus,
    /// Milliseconds since the Unix epoch.
    pub start_time: u64,
    pub launch_params: Value,
    #[serde(skip)]
    pub manifest: Manifest,
}

impl Process {
    pub fn entry_point(&self) -> EntryPoint {
        self.manifest.entry_point()
    }
}
