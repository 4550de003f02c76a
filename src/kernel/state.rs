//! Kernel lifecycle state machine and boot stages.

use std::fmt;

use serde::Serialize;

/// Top-level kernel lifecycle.
///
/// ```text
/// uninitialized → initializing → running → shuttingDown → shutdown
///                      │             │
///                      └──→ error ←──┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum KernelState {
    Uninitialized,
    Initializing,
    Running,
    ShuttingDown,
    Shutdown,
    Error,
}

impl KernelState {
    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Shutdown may begin from any live state (including `error`), since
    /// shutting down has no failure path of its own.
    pub fn can_transition_to(self, next: KernelState) -> bool {
        use KernelState::*;
        matches!(
            (self, next),
            (Uninitialized, Initializing)
                | (Initializing, Running)
                | (Initializing, Error)
                | (Running, Error)
                | (Running, ShuttingDown)
                | (Error, ShuttingDown)
                | (Uninitialized, ShuttingDown)
                | (ShuttingDown, Shutdown)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, KernelState::Shutdown)
    }
}

impl fmt::Display for KernelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::ShuttingDown => "shuttingDown",
            Self::Shutdown => "shutdown",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Boot stages, in the order they must complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BootStage {
    LoadConfig,
    EventBus,
    Security,
    FileSystem,
    Processes,
    Services,
    SessionRestore,
    Surface,
    Storage,
}

impl BootStage {
    pub const ORDER: [BootStage; 9] = [
        BootStage::LoadConfig,
        BootStage::EventBus,
        BootStage::Security,
        BootStage::FileSystem,
        BootStage::Processes,
        BootStage::Services,
        BootStage::SessionRestore,
        BootStage::Surface,
        BootStage::Storage,
    ];
}

impl fmt::Display for BootStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LoadConfig => "load-config",
            Self::EventBus => "event-bus",
            Self::Security => "security",
            Self::FileSystem => "filesystem",
            Self::Processes => "processes",
            Self::Services => "services",
            Self::SessionRestore => "session-restore",
            Self::Surface => "surface",
            Self::Storage => "storage",
        };
        f.write_str(s)
    }
}
