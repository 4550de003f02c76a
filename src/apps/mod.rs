//! Built-in applications shipped with the desktop.
//!
//! They run on exactly the same contract as sandboxed apps: an
//! `AppContext` and nothing else.

pub mod editor;
pub mod files;

use std::sync::Arc;

use crate::process::builtin::BuiltinRegistry;

pub use editor::Editor;
pub use files::Files;

pub fn default_builtins() -> BuiltinRegistry {
    BuiltinRegistry::new()
        .with(Arc::new(Editor::new()))
        .with(Arc::new(Files::new()))
}
