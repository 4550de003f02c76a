//! Sandbox runtime: loads and runs application components.
//!
//! Apps are WebAssembly components exporting `dispatch(string) -> string`
//! (see `wit/app.wit`). Components are compiled once per launch and
//! instantiated per dispatch with a fresh Store, so no guest state
//! survives between calls except what the guest sends back to the host.
//! The WASI context is empty: no filesystem, env, or stdio.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use wasmtime::component::{Component, Linker, ResourceTable, Val};
use wasmtime::{Engine, Store};
use wasmtime_wasi::{WasiCtx, WasiCtxBuilder, WasiCtxView, WasiView};

use super::error::SandboxError;
use super::protocol::{parse_guest_output, GuestMessage, HostEnvelope};

const DISPATCH_EXPORT: &str = "dispatch";

/// Turns asset bytes into a runnable module.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    async fn load(&self, app_id: &str, bytes: &[u8]) -> Result<Arc<dyn SandboxModule>, SandboxError>;
}

/// One loaded application.
#[async_trait]
pub trait SandboxModule: Send + Sync {
    async fn dispatch(&self, envelope: &HostEnvelope) -> Result<Vec<GuestMessage>, SandboxError>;
}

/// Store data for guest execution.
struct GuestState {
    ctx: WasiCtx,
    table: ResourceTable,
}

impl WasiView for GuestState {
    fn ctx(&mut self) -> WasiCtxView<'_> {
        WasiCtxView {
            ctx: &mut self.ctx,
            table: &mut self.table,
        }
    }
}

impl GuestState {
    fn isolated() -> Self {
        Self {
            ctx: WasiCtxBuilder::new().build(),
            table: ResourceTable::new(),
        }
    }
}

/// wasmtime engine shared by every app.
pub struct WasmRuntime {
    engine: Engine,
}

impl WasmRuntime {
    pub fn new() -> Result<Self, SandboxError> {
        let mut config = wasmtime::Config::new();
        config.wasm_component_model(true);
        let engine =
            Engine::new(&config).map_err(|e| SandboxError::EngineCreation(e.to_string()))?;
        Ok(Self { engine })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Compile and check that the component exports `dispatch`.
    pub fn compile(&self, bytes: &[u8]) -> Result<Component, SandboxError> {
        let component = Component::new(&self.engine, bytes)
            .map_err(|e| SandboxError::Compilation(e.to_string()))?;
        let (mut store, linker) = make_store_and_linker(&self.engine)?;
        let instance = linker
            .instantiate(&mut store, &component)
            .map_err(|e| SandboxError::Instantiation(e.to_string()))?;
        if instance.get_func(&mut store, DISPATCH_EXPORT).is_none() {
            return Err(SandboxError::MissingExport(DISPATCH_EXPORT.into()));
        }
        Ok(component)
    }
}

#[async_trait]
impl SandboxRuntime for WasmRuntime {
    async fn load(&self, app_id: &str, bytes: &[u8]) -> Result<Arc<dyn SandboxModule>, SandboxError> {
        let engine = self.engine.clone();
        let bytes = bytes.to_vec();
        // Compilation is CPU-bound.
        let component = tokio::task::spawn_blocking(move || {
            WasmRuntime { engine }.compile(&bytes)
        })
        .await
        .map_err(|e| SandboxError::Execution(format!("compile task panicked: {e}")))??;

        debug!(app_id, "sandbox component compiled");
        Ok(Arc::new(WasmModule {
            engine: self.engine.clone(),
            component,
        }))
    }
}

pub struct WasmModule {
    engine: Engine,
    component: Component,
}

#[async_trait]
impl SandboxModule for WasmModule {
    async fn dispatch(&self, envelope: &HostEnvelope) -> Result<Vec<GuestMessage>, SandboxError> {
        let input = serde_json::to_string(envelope)
            .map_err(|e| SandboxError::Protocol(format!("envelope not serializable: {e}")))?;
        let engine = self.engine.clone();
        let component = self.component.clone();

        let output = tokio::task::spawn_blocking(move || execute_dispatch(&engine, &component, &input))
            .await
            .map_err(|e| SandboxError::Execution(format!("guest task panicked: {e}")))??;

        parse_guest_output(&output)
    }
}

fn make_store_and_linker(
    engine: &Engine,
) -> Result<(Store<GuestState>, Linker<GuestState>), SandboxError> {
    let store = Store::new(engine, GuestState::isolated());
    let mut linker = Linker::new(engine);
    wasmtime_wasi::p2::add_to_linker_sync(&mut linker)
        .map_err(|e| SandboxError::Instantiation(format!("WASI link failed: {e}")))?;
    Ok((store, linker))
}

/// Runs inside `spawn_blocking`: fresh Store, instantiate, call `dispatch`.
fn execute_dispatch(engine: &Engine, component: &Component, input: &str) -> Result<String, SandboxError> {
    let (mut store, linker) = make_store_and_linker(engine)?;
    let instance = linker
        .instantiate(&mut store, component)
        .map_err(|e| SandboxError::Instantiation(e.to_string()))?;

    let dispatch = instance
        .get_func(&mut store, DISPATCH_EXPORT)
        .ok_or_else(|| SandboxError::MissingExport(DISPATCH_EXPORT.into()))?;

    let args = [Val::String(input.into())];
    let mut results = [Val::Bool(false)];
    dispatch
        .call(&mut store, &args, &mut results)
        .map_err(|e| SandboxError::Execution(format!("dispatch call failed: {e}")))?;

    match &results[0] {
        Val::String(s) => Ok(s.to_string()),
        other => Err(SandboxError::Execution(format!(
            "expected string from dispatch, got: {other:?}"
        ))),
    }
}
