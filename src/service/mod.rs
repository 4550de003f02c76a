//! Backend services: typed proxies over a shared transport.

pub mod protocol;
pub mod proxy;
pub mod transport;

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::security::SecurityContext;
use protocol::{AppsRequest, AuthRequest, FilesystemRequest, SystemRequest, UsersRequest};
use proxy::ServiceProxy;
use transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceName {
    Auth,
    Users,
    Filesystem,
    Apps,
    System,
}

impl ServiceName {
    pub const ALL: [ServiceName; 5] = [
        ServiceName::Auth,
        ServiceName::Users,
        ServiceName::Filesystem,
        ServiceName::Apps,
        ServiceName::System,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Users => "users",
            Self::Filesystem => "filesystem",
            Self::Apps => "apps",
            Self::System => "system",
        }
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from service calls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    #[error("{service}.{method}: transport failure: {detail}")]
    Transport {
        service: ServiceName,
        method: String,
        detail: String,
    },

    #[error("{service}.{method}: HTTP status {status}: {body}")]
    Status {
        service: ServiceName,
        method: String,
        status: u16,
        body: String,
    },

    #[error("{service}.{method}: malformed response: {detail}")]
    Malformed {
        service: ServiceName,
        method: String,
        detail: String,
    },

    #[error("{service}.{method}: {message}")]
    Rejected {
        service: ServiceName,
        method: String,
        message: String,
        /// Server-supplied error code, if any.
        code: Option<String>,
    },

    #[error("service '{0}' is disconnected")]
    Disconnected(ServiceName),

    #[error("timed out after {waited_ms}ms waiting for '{service}' to become ready")]
    Timeout { service: ServiceName, waited_ms: u64 },
}

/// Session credential shared by every proxy.
#[derive(Debug, Default)]
pub struct Credentials {
    token: RwLock<Option<String>>,
}

impl Credentials {
    pub fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, token: Option<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }
}

/// One proxy per backend service.
pub struct ServiceHub {
    pub auth: ServiceProxy<AuthRequest>,
    pub users: ServiceProxy<UsersRequest>,
    pub filesystem: ServiceProxy<FilesystemRequest>,
    pub apps: ServiceProxy<AppsRequest>,
    pub system: ServiceProxy<SystemRequest>,
    credentials: Arc<Credentials>,
}

impl ServiceHub {
    pub fn new(transport: Arc<dyn Transport>, security: Arc<SecurityContext>) -> Self {
        let credentials = Arc::new(Credentials::default());
        Self {
            auth: ServiceProxy::new(transport.clone(), security.clone(), credentials.clone()),
            users: ServiceProxy::new(transport.clone(), security.clone(), credentials.clone()),
            filesystem: ServiceProxy::new(
                transport.clone(),
                security.clone(),
                credentials.clone(),
            ),
            apps: ServiceProxy::new(transport.clone(), security.clone(), credentials.clone()),
            system: ServiceProxy::new(transport, security, credentials.clone()),
            credentials,
        }
    }

    pub fn connect_all(&self) {
        self.auth.connect();
        self.users.connect();
        self.filesystem.connect();
        self.apps.connect();
        self.system.connect();
    }

    pub fn disconnect_all(&self) {
        self.auth.disconnect();
        self.users.disconnect();
        self.filesystem.disconnect();
        self.apps.disconnect();
        self.system.disconnect();
    }

    pub fn is_connected(&self, service: ServiceName) -> bool {
        match service {
            ServiceName::Auth => self.auth.is_connected(),
            ServiceName::Users => self.users.is_connected(),
            ServiceName::Filesystem => self.filesystem.is_connected(),
            ServiceName::Apps => self.apps.is_connected(),
            ServiceName::System => self.system.is_connected(),
        }
    }

    pub fn token(&self) -> Option<String> {
        self.credentials.token()
    }

    pub fn set_token(&self, token: Option<String>) {
        self.credentials.set(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;

    #[test]
    fn connect_and_disconnect_all() {
        let hub = ServiceHub::new(
            Arc::new(ScriptedTransport::new()),
            Arc::new(SecurityContext::new()),
        );
        assert!(ServiceName::ALL.iter().all(|s| !hub.is_connected(*s)));
        hub.connect_all();
        assert!(ServiceName::ALL.iter().all(|s| hub.is_connected(*s)));
        hub.disconnect_all();
        assert!(ServiceName::ALL.iter().all(|s| !hub.is_connected(*s)));
    }

    #[test]
    fn token_is_shared() {
        let hub = ServiceHub::new(
            Arc::new(ScriptedTransport::new()),
            Arc::new(SecurityContext::new()),
        );
        hub.set_token(Some("abc".into()));
        assert_eq!(hub.token().as_deref(), Some("abc"));
        hub.set_token(None);
        assert!(hub.token().is_none());
    }

    #[test]
    fn display_names() {
        assert_eq!(ServiceName::Filesystem.to_string(), "filesystem");
        assert_eq!(
            serde_json::to_value(ServiceName::Apps).unwrap(),
            serde_json::json!("apps")
        );
    }
}
