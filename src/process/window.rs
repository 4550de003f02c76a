//! Window registry: an arena of window records keyed by id.
//!
//! Windows never carry behavior of their own. Every change goes through
//! `WindowRegistry::apply` with a `WindowCommand`, whether it comes from
//! the desktop (drag, buttons) or from an app's window handle.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::manifest::WindowOptions;
use super::types::{ProcessId, WindowId};
use crate::kernel::error::{KernelError, KernelResult, NotFoundKind};

const CASCADE_ORIGIN: i32 = 40;
const CASCADE_STEP: i32 = 24;
const CASCADE_SLOTS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Visibility {
    Normal,
    Minimized,
    Maximized,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Window {
    pub id: WindowId,
    pub process_id: ProcessId,
    pub title: String,
    pub geometry: Geometry,
    pub z_index: u64,
    pub visibility: Visibility,
    pub resizable: bool,
    /// Geometry to return to when leaving the maximized state.
    #[serde(skip)]
    saved_geometry: Option<Geometry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WindowCommand {
    Focus,
    Move { x: i32, y: i32 },
    Resize { width: u32, height: u32 },
    Minimize,
    Maximize,
    Restore,
    SetTitle { title: String },
    Close,
}

/// A command addressed to one window, as queued by window handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRequest {
    pub window_id: WindowId,
    pub command: WindowCommand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WindowOutcome {
    Updated(Window),
    /// The owning process should be terminated; the window is still open.
    CloseRequested(ProcessId),
}

pub struct WindowRegistry {
    windows: BTreeMap<WindowId, Window>,
    next_z: u64,
    opened: u64,
    desktop: (u32, u32),
}

impl WindowRegistry {
    pub fn new(desktop_width: u32, desktop_height: u32) -> Self {
        Self {
            windows: BTreeMap::new(),
            next_z: 1,
            opened: 0,
            desktop: (desktop_width, desktop_height),
        }
    }

    fn raise(&mut self) -> u64 {
        let z = self.next_z;
        self.next_z += 1;
        z
    }

    /// Create the window for `process_id`, on top of everything else.
    pub fn open(&mut self, process_id: ProcessId, title: &str, options: &WindowOptions) -> Window {
        let slot = (self.opened % CASCADE_SLOTS) as i32;
        self.opened += 1;
        let geometry = Geometry {
            x: options.x.unwrap_or(CASCADE_ORIGIN + CASCADE_STEP * slot),
            y: options.y.unwrap_or(CASCADE_ORIGIN + CASCADE_STEP * slot),
            width: options.width,
            height: options.height,
        };
        let mut window = Window {
            id: process_id.into(),
            process_id,
            title: title.to_string(),
            geometry,
            z_index: self.raise(),
            visibility: Visibility::Normal,
            resizable: options.resizable,
            saved_geometry: None,
        };
        if options.maximized {
            self.maximize(&mut window);
        }
        self.windows.insert(window.id, window.clone());
        window
    }

    pub fn close(&mut self, id: WindowId) -> Option<Window> {
        self.windows.remove(&id)
    }

    pub fn get(&self, id: WindowId) -> Option<&Window> {
        self.windows.get(&id)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Windows ordered bottom to top.
    pub fn stacking_order(&self) -> Vec<Window> {
        let mut all: Vec<Window> = self.windows.values().cloned().collect();
        all.sort_by_key(|w| w.z_index);
        all
    }

    /// Topmost window that is not minimized.
    pub fn focused(&self) -> Option<WindowId> {
        self.windows
            .values()
            .filter(|w| w.visibility != Visibility::Minimized)
            .max_by_key(|w| w.z_index)
            .map(|w| w.id)
    }

    fn maximize(&self, window: &mut Window) {
        if window.visibility != Visibility::Maximized {
            window.saved_geometry = Some(window.geometry);
        }
        window.geometry = Geometry {
            x: 0,
            y: 0,
            width: self.desktop.0,
            height: self.desktop.1,
        };
        window.visibility = Visibility::Maximized;
    }

    pub fn apply(&mut self, id: WindowId, command: WindowCommand) -> KernelResult<WindowOutcome> {
        let mut window = self
            .windows
            .get(&id)
            .cloned()
            .ok_or_else(|| KernelError::not_found(NotFoundKind::Window, id.to_string()))?;

        match command {
            WindowCommand::Close => return Ok(WindowOutcome::CloseRequested(window.process_id)),
            WindowCommand::Focus => {
                if window.visibility == Visibility::Minimized {
                    window.visibility = if window.saved_geometry.is_some() {
                        Visibility::Maximized
                    } else {
                        Visibility::Normal
                    };
                }
                window.z_index = self.raise();
            }
            WindowCommand::Move { x, y } => {
                if window.visibility == Visibility::Maximized {
                    window.visibility = Visibility::Normal;
                    if let Some(saved) = window.saved_geometry.take() {
                        window.geometry.width = saved.width;
                        window.geometry.height = saved.height;
                    }
                }
                window.geometry.x = x;
                window.geometry.y = y;
            }
            WindowCommand::Resize { width, height } => {
                if !window.resizable {
                    return Err(KernelError::Validation(format!("window {id} is not resizable")));
                }
                if width == 0 || height == 0 {
                    return Err(KernelError::Validation(format!(
                        "window {id}: size must be non-zero"
                    )));
                }
                window.geometry.width = width;
                window.geometry.height = height;
                window.visibility = Visibility::Normal;
                window.saved_geometry = None;
            }
            WindowCommand::Minimize => window.visibility = Visibility::Minimized,
            WindowCommand::Maximize => {
                self.maximize(&mut window);
                window.z_index = self.raise();
            }
            WindowCommand::Restore => {
                if let Some(saved) = window.saved_geometry.take() {
                    window.geometry = saved;
                }
                window.visibility = Visibility::Normal;
                window.z_index = self.raise();
            }
            WindowCommand::SetTitle { title } => window.title = title,
        }

        self.windows.insert(id, window.clone());
        Ok(WindowOutcome::Updated(window))
    }
}
