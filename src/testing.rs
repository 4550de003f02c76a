//! Scripted collaborators for running the kernel without a backend or a
//! compiled guest. Used by unit tests and the integration suites.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::sandbox::error::SandboxError;
use crate::sandbox::protocol::{GuestMessage, HostEnvelope};
use crate::sandbox::runtime::{SandboxModule, SandboxRuntime};
use crate::service::protocol::RpcResponse;
use crate::service::transport::{RpcCall, Transport};
use crate::service::{ServiceError, ServiceName};

/// How a scripted route answers one call.
#[derive(Debug, Clone)]
pub enum RouteReply {
    /// `{success: true, data}`
    Ok(Value),
    /// `{success: false, message}`
    Fail(String),
    /// `{success: false, code, message}`
    FailWithCode(String, String),
    /// The request never got an answer.
    Transport(String),
    /// Wait, then answer.
    Delayed(Duration, Box<RouteReply>),
}

type Route = Arc<dyn Fn(&Value, usize) -> RouteReply + Send + Sync>;

/// Transport answering from per-method closures. A route gets the call's
/// params and how many times that method was called before.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<(ServiceName, String), Route>>,
    calls: Mutex<Vec<RpcCall>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, service: ServiceName, method: &str, route: F)
    where
        F: Fn(&Value, usize) -> RouteReply + Send + Sync + 'static,
    {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((service, method.to_string()), Arc::new(route));
    }

    /// Always succeed with `data`.
    pub fn ok(&self, service: ServiceName, method: &str, data: Value) {
        self.on(service, method, move |_, _| RouteReply::Ok(data.clone()));
    }

    pub fn calls(&self) -> Vec<RpcCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls_to(&self, service: ServiceName, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| c.service == service && c.method == method)
            .count()
    }

    /// A small backend: three users, the built-in apps plus one sandboxed
    /// `hello` app, and a ready system service.
    ///
    /// Users `alice` and `bob` (role `user`) and `admin` (role `admin`)
    /// all use the password `password`; tokens are `token-<username>`.
    pub fn with_defaults() -> Self {
        let t = Self::new();

        t.on(ServiceName::Auth, "login", |params, _| {
            let username = params["username"].as_str().unwrap_or_default();
            match (default_session(username), params["password"].as_str()) {
                (Some(session), Some("password")) => RouteReply::Ok(session),
                _ => RouteReply::Fail("invalid username or password".into()),
            }
        });
        t.on(ServiceName::Auth, "validateToken", |params, _| {
            let session = params["token"]
                .as_str()
                .and_then(|token| token.strip_prefix("token-"))
                .and_then(default_session);
            match session {
                Some(session) => RouteReply::Ok(session),
                None => RouteReply::Fail("invalid token".into()),
            }
        });
        t.ok(ServiceName::Auth, "logout", Value::Null);

        t.ok(
            ServiceName::System,
            "getSystemInfo",
            json!({"name": "WebDesk", "version": "1.0.0", "ready": true}),
        );
        t.on(ServiceName::System, "getLanguagePack", |params, _| {
            RouteReply::Ok(json!({
                "language": params["language"],
                "strings": {"desktop.welcome": "Welcome"}
            }))
        });
        t.ok(ServiceName::System, "logError", Value::Null);

        t.on(ServiceName::Apps, "getAppInfo", |params, _| {
            match params["appId"].as_str().and_then(default_manifest) {
                Some(manifest) => RouteReply::Ok(manifest),
                None => RouteReply::Fail("unknown application".into()),
            }
        });
        t.ok(
            ServiceName::Apps,
            "getAppAsset",
            json!({"content": [0, 97, 115, 109, 13, 0, 1, 0]}),
        );
        t.on(ServiceName::Apps, "listApps", |_, _| {
            let apps: Vec<Value> = ["editor", "files", "hello"]
                .into_iter()
                .filter_map(default_manifest)
                .collect();
            RouteReply::Ok(json!({ "apps": apps }))
        });

        t
    }
}

fn default_session(username: &str) -> Option<Value> {
    let user_perms = json!([
        "app.launch.*",
        "filesystem.read.user.*",
        "filesystem.write.user.*",
        "filesystem.delete.user.*",
        "filesystem.read.apps"
    ]);
    let (name, roles, permissions) = match username {
        "alice" => ("Alice", json!(["user"]), user_perms),
        "bob" => ("Bob", json!(["user"]), user_perms),
        "admin" => ("Administrator", json!(["admin"]), json!([])),
        _ => return None,
    };
    Some(json!({
        "token": format!("token-{username}"),
        "user": {"username": username, "displayName": name, "roles": roles},
        "permissions": permissions,
    }))
}

fn default_manifest(app_id: &str) -> Option<Value> {
    match app_id {
        "editor" => Some(json!({
            "id": "editor",
            "title": "Text Editor",
            "version": "1.2.0",
            "entry": "builtin:editor",
            "permissions": ["filesystem.read.user.home"],
            "window": {"width": 720, "height": 520}
        })),
        "files" => Some(json!({
            "id": "files",
            "title": "Files",
            "version": "1.0.0",
            "entry": "builtin:files",
            "permissions": ["filesystem.read.user.home"]
        })),
        "hello" => Some(json!({
            "id": "hello",
            "title": "Hello",
            "version": "0.1.0",
            "entry": "main.wasm"
        })),
        _ => None,
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, call: RpcCall) -> Result<RpcResponse, ServiceError> {
        let (route, ordinal) = {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            let ordinal = calls
                .iter()
                .filter(|c| c.service == call.service && c.method == call.method)
                .count();
            calls.push(call.clone());
            let route = self
                .routes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&(call.service, call.method.to_string()))
                .cloned();
            (route, ordinal)
        };

        let Some(route) = route else {
            return Ok(RpcResponse::fail(format!(
                "no scripted route for {}.{}",
                call.service, call.method
            )));
        };

        let mut reply = route(call.params(), ordinal);
        loop {
            match reply {
                RouteReply::Ok(data) => return Ok(RpcResponse::ok(data)),
                RouteReply::Fail(message) => return Ok(RpcResponse::fail(message)),
                RouteReply::FailWithCode(code, message) => {
                    return Ok(RpcResponse::fail_with_code(code, message))
                }
                RouteReply::Transport(detail) => {
                    return Err(ServiceError::Transport {
                        service: call.service,
                        method: call.method.to_string(),
                        detail,
                    })
                }
                RouteReply::Delayed(wait, next) => {
                    tokio::time::sleep(wait).await;
                    reply = *next;
                }
            }
        }
    }
}

type GuestScript = Arc<dyn Fn(&HostEnvelope) -> Vec<GuestMessage> + Send + Sync>;

/// Sandbox whose guest is a closure. Every envelope it receives is kept.
pub struct ScriptedSandbox {
    script: GuestScript,
    envelopes: Arc<Mutex<Vec<HostEnvelope>>>,
}

impl ScriptedSandbox {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&HostEnvelope) -> Vec<GuestMessage> + Send + Sync + 'static,
    {
        Self {
            script: Arc::new(script),
            envelopes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn envelopes(&self) -> Vec<HostEnvelope> {
        self.envelopes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SandboxRuntime for ScriptedSandbox {
    async fn load(&self, _app_id: &str, bytes: &[u8]) -> Result<Arc<dyn SandboxModule>, SandboxError> {
        if bytes.is_empty() {
            return Err(SandboxError::Compilation("empty module".into()));
        }
        Ok(Arc::new(ScriptedModule {
            script: self.script.clone(),
            envelopes: self.envelopes.clone(),
        }))
    }
}

struct ScriptedModule {
    script: GuestScript,
    envelopes: Arc<Mutex<Vec<HostEnvelope>>>,
}

#[async_trait]
impl SandboxModule for ScriptedModule {
    async fn dispatch(&self, envelope: &HostEnvelope) -> Result<Vec<GuestMessage>, SandboxError> {
        self.envelopes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(envelope.clone());
        Ok((self.script)(envelope))
    }
}
