//! WebDesk: a desktop kernel.
//!
//! Boots an event bus, a security context, a permission-gated virtual
//! filesystem, and a process manager on top of a set of backend services,
//! then runs built-in and sandboxed applications, each in its own window.

pub mod apps;
pub mod config;
pub mod events;
pub mod kernel;
pub mod process;
pub mod sandbox;
pub mod security;
pub mod service;
pub mod testing;
pub mod ui;
pub mod vfs;
