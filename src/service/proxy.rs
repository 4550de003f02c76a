//! ServiceProxy: typed RPC client for one backend service.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::protocol::ServiceRequest;
use super::transport::{RpcCall, Transport};
use super::{Credentials, ServiceError, ServiceName};
use crate::kernel::error::{KernelError, KernelResult};
use crate::security::SecurityContext;

/// Proxy for the service that owns request type `R`.
pub struct ServiceProxy<R> {
    transport: Arc<dyn Transport>,
    security: Arc<SecurityContext>,
    credentials: Arc<Credentials>,
    connected: AtomicBool,
    _request: PhantomData<fn(R)>,
}

impl<R: ServiceRequest> ServiceProxy<R> {
    pub fn new(
        transport: Arc<dyn Transport>,
        security: Arc<SecurityContext>,
        credentials: Arc<Credentials>,
    ) -> Self {
        Self {
            transport,
            security,
            credentials,
            connected: AtomicBool::new(false),
            _request: PhantomData,
        }
    }

    pub fn name(&self) -> ServiceName {
        R::SERVICE
    }

    pub fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
        debug!(service = %R::SERVICE, "connected");
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        debug!(service = %R::SERVICE, "disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Send `request` and deserialize the envelope's `data` into `T`.
    pub async fn call<T: DeserializeOwned>(&self, request: &R) -> KernelResult<T> {
        let data = self.call_value(request).await?;
        serde_json::from_value(data).map_err(|e| {
            ServiceError::Malformed {
                service: R::SERVICE,
                method: request.method().to_string(),
                detail: e.to_string(),
            }
            .into()
        })
    }

    /// Send `request`, ignoring whatever data comes back.
    pub async fn call_unit(&self, request: &R) -> KernelResult<()> {
        self.call_value(request).await.map(|_| ())
    }

    pub async fn call_value(&self, request: &R) -> KernelResult<Value> {
        let method = request.method();

        if !request.is_public() && !self.security.is_authenticated() {
            return Err(KernelError::AuthenticationRequired);
        }
        if !self.is_connected() {
            return Err(ServiceError::Disconnected(R::SERVICE).into());
        }

        let request_id = Uuid::new_v4().to_string();
        let mut body = serde_json::to_value(request).map_err(|e| ServiceError::Malformed {
            service: R::SERVICE,
            method: method.to_string(),
            detail: format!("request not serializable: {e}"),
        })?;
        if let Value::Object(map) = &mut body {
            map.insert("requestId".into(), Value::String(request_id.clone()));
        }

        let call = RpcCall {
            service: R::SERVICE,
            method,
            request_id,
            body,
            token: self.credentials.token(),
        };

        let response = self.transport.send(call).await?;
        if response.success {
            Ok(response.data)
        } else {
            let message = response
                .message
                .unwrap_or_else(|| "request failed without a message".into());
            warn!(service = %R::SERVICE, method, %message, code = ?response.code, "service rejected call");
            Err(ServiceError::Rejected {
                service: R::SERVICE,
                method: method.to_string(),
                message,
                code: response.code,
            }
            .into())
        }
    }
}
