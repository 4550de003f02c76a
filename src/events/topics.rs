//! Well-known event topics.

pub const AUTH_LOGIN: &str = "auth:login";
pub const AUTH_LOGOUT: &str = "auth:logout";

pub const SYSTEM_READY: &str = "system:ready";
pub const SYSTEM_ERROR: &str = "system:error";
pub const SYSTEM_SHUTDOWN: &str = "system:shutdown";

pub const APP_LAUNCHED: &str = "application:launched";
pub const APP_LAUNCH_FAILED: &str = "application:launchFailed";
pub const APP_TERMINATED: &str = "application:terminated";

pub const WINDOW_UPDATED: &str = "window:updated";

pub const UI_NOTIFICATION: &str = "ui:notification";

/// Prefix a sandboxed app may publish under: `app:<appId>:`.
pub fn app_scope(app_id: &str) -> String {
    format!("app:{app_id}:")
}
