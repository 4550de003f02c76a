//! Security: current user and permission queries.
//!
//! The context is fed exclusively by `auth:login` / `auth:logout` events
//! that the kernel publishes; applications only ever see read access.
//! Only the `admin` role bypasses the permission set.
//!
//! Usernames become one segment of filesystem permission strings
//! (`filesystem.read.users.<name>`), so they may not contain dots.

pub mod permission;

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::events::{topics, EventBus, Subscription};
use crate::kernel::error::{KernelError, KernelResult};

pub const ADMIN_ROLE: &str = "admin";

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex"));

/// A username must be a single permission segment.
pub fn validate_username(username: &str) -> KernelResult<()> {
    if USERNAME_RE.is_match(username) {
        Ok(())
    } else {
        Err(KernelError::Validation(format!("invalid username '{username}'")))
    }
}

/// An authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub username: String,
    #[serde(alias = "name")]
    pub display_name: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl User {
    pub fn new(username: &str, display_name: &str, roles: &[&str]) -> Self {
        Self {
            username: username.to_string(),
            display_name: display_name.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.contains(ADMIN_ROLE)
    }

    /// `/users/<username>`
    pub fn home_dir(&self) -> String {
        format!("/users/{}", self.username)
    }
}

/// Payload of `auth:login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginEvent {
    pub user: User,
    pub permissions: Vec<String>,
}

struct Principal {
    user: User,
    permissions: HashSet<String>,
}

#[derive(Default)]
pub struct SecurityContext {
    principal: RwLock<Option<Principal>>,
}

impl SecurityContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire the context to the bus. The returned subscriptions keep the
    /// handlers identifiable for teardown.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Vec<Subscription> {
        let on_login = Arc::clone(self);
        let login = bus.subscribe(topics::AUTH_LOGIN, move |event| {
            let payload: LoginEvent = serde_json::from_value(event.payload.clone())?;
            validate_username(&payload.user.username)?;
            on_login.login(payload.user, payload.permissions);
            Ok(())
        });

        let on_logout = Arc::clone(self);
        let logout = bus.subscribe(topics::AUTH_LOGOUT, move |_| {
            on_logout.logout();
            Ok(())
        });

        vec![login, logout]
    }

    pub fn login(&self, user: User, permissions: impl IntoIterator<Item = String>) {
        let permissions: HashSet<String> = permissions.into_iter().collect();
        info!(
            user = %user.username,
            admin = user.is_admin(),
            permissions = permissions.len(),
            "security context: login"
        );
        *self.principal.write().unwrap_or_else(PoisonError::into_inner) = Some(Principal {
            user,
            permissions,
        });
    }

    pub fn logout(&self) {
        let previous = self
            .principal
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(p) = previous {
            info!(user = %p.user.username, "security context: logout");
        }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        let guard = self.principal.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            None => false,
            Some(p) if p.user.is_admin() => true,
            Some(p) => permission::grants(&p.permissions, permission),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.principal
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|p| p.user.is_admin())
    }

    pub fn is_authenticated(&self) -> bool {
        self.principal
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn current_user(&self) -> Option<User> {
        self.principal
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|p| p.user.clone())
    }

    /// `Ok` if a user is present and holds `permission`.
    pub fn require(&self, permission: &str) -> KernelResult<()> {
        if !self.is_authenticated() {
            return Err(KernelError::AuthenticationRequired);
        }
        if self.has_permission(permission) {
            Ok(())
        } else {
            warn!(permission, "permission check failed");
            Err(KernelError::permission_denied(permission))
        }
    }
}
