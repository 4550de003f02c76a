//! Host-defined applications, resolved by name.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::context::AppContext;
use super::types::{Process, ProcessId};
use crate::kernel::error::KernelResult;

#[async_trait]
pub trait BuiltinApp: Send + Sync {
    fn name(&self) -> &str;

    /// Boot the app for `process`. Returning an error fails the launch.
    async fn start(&self, process: &Process, ctx: AppContext) -> KernelResult<()>;

    /// Drop any per-process state once the process is gone.
    fn stop(&self, _process_id: ProcessId) {}
}

#[derive(Default, Clone)]
pub struct BuiltinRegistry {
    apps: BTreeMap<String, Arc<dyn BuiltinApp>>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, app: Arc<dyn BuiltinApp>) {
        self.apps.insert(app.name().to_string(), app);
    }

    pub fn with(mut self, app: Arc<dyn BuiltinApp>) -> Self {
        self.register(app);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn BuiltinApp>> {
        self.apps.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.apps.keys().map(String::as_str).collect()
    }
}
