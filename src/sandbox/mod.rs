//! Application sandbox: untrusted apps as WebAssembly components.
//!
//! An app cannot reach host state it was not handed: missing WASI
//! capabilities mean the import does not exist, and everything else goes
//! through the typed message protocol.
//!
//! - `runtime.rs`: `SandboxRuntime`/`SandboxModule` seams, wasmtime impl
//! - `protocol.rs`: host/guest messages
//! - `bridge.rs`: boot exchange against an `AppContext`
//! - `error.rs`: `SandboxError`

pub mod bridge;
pub mod error;
pub mod protocol;
pub mod runtime;
