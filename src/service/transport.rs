//! Transport seam between proxies and the backend.
//!
//! `HttpTransport` is the production path; tests plug in
//! `testing::ScriptedTransport`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::protocol::RpcResponse;
use super::{ServiceError, ServiceName};

/// One outbound RPC, fully built by the proxy.
#[derive(Debug, Clone)]
pub struct RpcCall {
    pub service: ServiceName,
    pub method: &'static str,
    pub request_id: String,
    /// `{"requestId", "method", "params"}`
    pub body: Value,
    pub token: Option<String>,
}

impl RpcCall {
    pub fn params(&self) -> &Value {
        self.body.get("params").unwrap_or(&Value::Null)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, call: RpcCall) -> Result<RpcResponse, ServiceError>;
}

/// JSON-over-HTTP transport: `POST {base}/api/{service}`.
#[derive(Debug)]
pub struct HttpTransport {
    http: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn endpoint(&self, service: ServiceName) -> String {
        format!("{}/api/{}", self.base_url, service)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, call: RpcCall) -> Result<RpcResponse, ServiceError> {
        let url = self.endpoint(call.service);
        debug!(%url, method = call.method, request_id = %call.request_id, "rpc");

        let mut request = self
            .http
            .post(&url)
            .header("x-request-id", &call.request_id)
            .json(&call.body);
        if let Some(token) = &call.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| ServiceError::Transport {
            service: call.service,
            method: call.method.to_string(),
            detail: e.to_string(),
        })?;

        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.text().await.unwrap_or_else(|_| "(no body)".into());
            return Err(ServiceError::Status {
                service: call.service,
                method: call.method.to_string(),
                status,
                body,
            });
        }

        response
            .json::<RpcResponse>()
            .await
            .map_err(|e| ServiceError::Malformed {
                service: call.service,
                method: call.method.to_string(),
                detail: e.to_string(),
            })
    }
}
