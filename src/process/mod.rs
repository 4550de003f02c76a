//! ProcessManager: application processes and their windows.
//!
//! Launch path: launch permission → manifest → declared permissions →
//! `create_process` (id allocated before the first await, record inserted
//! as `starting`, window opened) → boot the entry point → promote to
//! `running` with a taskbar entry → `application:launched`.
//!
//! A `starting` process can be closed while its launch is suspended. The
//! launch re-checks the record after every await and gives up with
//! `Cancelled` if it is gone. Any launch failure removes whatever the
//! launch created and publishes `application:launchFailed`.

pub mod builtin;
pub mod context;
pub mod manifest;
pub mod taskbar;
pub mod types;
pub mod window;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::events::{topics, EventBus};
use crate::kernel::error::{KernelError, KernelResult, NotFoundKind};
use crate::sandbox::bridge;
use crate::sandbox::runtime::SandboxRuntime;
use crate::security::{permission, SecurityContext};
use crate::service::protocol::{AppAsset, AppsRequest};
use crate::service::ServiceHub;
use crate::ui::Notifier;
use crate::vfs::node::now_millis;
use crate::vfs::VirtualFileSystem;
use builtin::BuiltinRegistry;
use context::{AppContext, AppInfo, UserInfo, WindowHandle};
use manifest::{EntryPoint, Manifest};
use taskbar::{Taskbar, TaskbarEntry};
use types::{Process, ProcessId, ProcessStatus, WindowId};
use window::{Window, WindowOutcome, WindowRegistry, WindowRequest};

/// Collaborators the manager is constructed with.
pub struct ProcessDeps {
    pub security: Arc<SecurityContext>,
    pub services: Arc<ServiceHub>,
    pub filesystem: Arc<VirtualFileSystem>,
    pub events: Arc<EventBus>,
    pub ui: Arc<Notifier>,
    pub sandbox: Arc<dyn SandboxRuntime>,
    pub builtins: BuiltinRegistry,
    pub desktop: (u32, u32),
}

pub struct ProcessManager {
    next_pid: AtomicU64,
    processes: Mutex<BTreeMap<ProcessId, Process>>,
    windows: Mutex<WindowRegistry>,
    taskbar: Mutex<Taskbar>,
    window_tx: mpsc::UnboundedSender<WindowRequest>,
    window_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<WindowRequest>>,
    security: Arc<SecurityContext>,
    services: Arc<ServiceHub>,
    filesystem: Arc<VirtualFileSystem>,
    events: Arc<EventBus>,
    ui: Arc<Notifier>,
    sandbox: Arc<dyn SandboxRuntime>,
    builtins: BuiltinRegistry,
}

impl ProcessManager {
    pub fn new(deps: ProcessDeps) -> Self {
        let (window_tx, window_rx) = mpsc::unbounded_channel();
        Self {
            next_pid: AtomicU64::new(1),
            processes: Mutex::new(BTreeMap::new()),
            windows: Mutex::new(WindowRegistry::new(deps.desktop.0, deps.desktop.1)),
            taskbar: Mutex::new(Taskbar::default()),
            window_tx,
            window_rx: tokio::sync::Mutex::new(window_rx),
            security: deps.security,
            services: deps.services,
            filesystem: deps.filesystem,
            events: deps.events,
            ui: deps.ui,
            sandbox: deps.sandbox,
            builtins: deps.builtins,
        }
    }

    fn processes(&self) -> std::sync::MutexGuard<'_, BTreeMap<ProcessId, Process>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn windows(&self) -> std::sync::MutexGuard<'_, WindowRegistry> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn taskbar_guard(&self) -> std::sync::MutexGuard<'_, Taskbar> {
        self.taskbar.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── launch ──

    /// Launch `app_id` end to end. Failures are reported on the bus and as
    /// a notification, then returned.
    pub async fn launch_application(&self, app_id: &str, params: Value) -> KernelResult<ProcessId> {
        match self.try_launch(app_id, params).await {
            Ok(pid) => Ok(pid),
            Err(e) => {
                let reason = match e {
                    KernelError::Cancelled(_) => "cancelled",
                    _ => "error",
                };
                warn!(app_id, error = %e, reason, "launch failed");
                self.events.publish(
                    topics::APP_LAUNCH_FAILED,
                    json!({
                        "appId": app_id,
                        "reason": reason,
                        "kind": e.kind(),
                        "error": e.to_string(),
                    }),
                );
                self.ui.notify_error(&format!("Could not launch {app_id}"), &e);
                Err(e)
            }
        }
    }

    async fn try_launch(&self, app_id: &str, params: Value) -> KernelResult<ProcessId> {
        self.security.require(&permission::launch_permission(app_id))?;

        let raw = self
            .services
            .apps
            .call_value(&AppsRequest::GetAppInfo {
                app_id: app_id.to_string(),
            })
            .await?;
        let manifest = Manifest::parse(raw)?;
        if manifest.id != app_id {
            return Err(KernelError::Validation(format!(
                "manifest for '{app_id}' describes '{}'",
                manifest.id
            )));
        }
        for p in &manifest.permissions {
            self.security.require(p)?;
        }

        let pid = self.create_process(manifest, params).await?;
        self.register(pid)?;
        Ok(pid)
    }

    /// Allocate a process and window, then boot the entry point. The id is
    /// taken before any await, so overlapping launches never collide.
    pub async fn create_process(&self, manifest: Manifest, params: Value) -> KernelResult<ProcessId> {
        let pid = ProcessId(self.next_pid.fetch_add(1, Ordering::SeqCst));
        let window = self.windows().open(pid, &manifest.title, &manifest.window);
        let process = Process {
            id: pid,
            app_id: manifest.id.clone(),
            window_id: window.id,
            status: ProcessStatus::Starting,
            start_time: now_millis(),
            launch_params: params,
            manifest,
        };
        info!(%pid, app_id = %process.app_id, "process created");
        self.processes().insert(pid, process.clone());

        if let Err(e) = self.boot(&process).await {
            self.discard(pid, window.id);
            // A close during boot has already torn the record down, but a
            // builtin may have stored its state after that teardown.
            self.stop_builtin(&process);
            return Err(e);
        }
        Ok(pid)
    }

    async fn boot(&self, process: &Process) -> KernelResult<()> {
        let ctx = self.app_context(process)?;
        match process.entry_point() {
            EntryPoint::Builtin(name) => {
                let app = self
                    .builtins
                    .get(&name)
                    .ok_or_else(|| KernelError::not_found(NotFoundKind::App, format!("builtin:{name}")))?;
                app.start(process, ctx).await?;
            }
            EntryPoint::Sandboxed { file } => {
                let asset: AppAsset = self
                    .services
                    .apps
                    .call(&AppsRequest::GetAppAsset {
                        app_id: process.app_id.clone(),
                        file,
                    })
                    .await?;
                self.ensure_starting(process.id)?;

                let module = self.sandbox.load(&process.app_id, &asset.content).await?;
                self.ensure_starting(process.id)?;

                let pid = process.id;
                let outcome = bridge::boot_guest(module, &ctx, || self.is_starting(pid)).await?;
                if !outcome.ready {
                    debug!(%pid, rounds = outcome.rounds, "guest settled without signalling ready");
                }
            }
        }
        self.ensure_starting(process.id)
    }

    fn app_context(&self, process: &Process) -> KernelResult<AppContext> {
        let user = self
            .security
            .current_user()
            .ok_or(KernelError::AuthenticationRequired)?;
        Ok(AppContext {
            app: AppInfo {
                id: process.app_id.clone(),
                title: process.manifest.title.clone(),
                version: process.manifest.version.clone(),
                params: process.launch_params.clone(),
            },
            user: UserInfo::from(&user),
            window: WindowHandle::new(
                process.id,
                process.window_id,
                process.manifest.title.clone(),
                self.window_tx.clone(),
            ),
            filesystem: self.filesystem.clone(),
            ui: self.ui.clone(),
            events: self.events.clone(),
        })
    }

    fn is_starting(&self, pid: ProcessId) -> bool {
        self.processes()
            .get(&pid)
            .is_some_and(|p| p.status == ProcessStatus::Starting)
    }

    fn ensure_starting(&self, pid: ProcessId) -> KernelResult<()> {
        if self.is_starting(pid) {
            Ok(())
        } else {
            Err(KernelError::Cancelled(format!("process {pid} closed during launch")))
        }
    }

    /// Promote a booted process to `running` and give it a taskbar entry.
    fn register(&self, pid: ProcessId) -> KernelResult<()> {
        let (entry, window_id) = {
            let mut processes = self.processes();
            let process = processes
                .get_mut(&pid)
                .filter(|p| p.status == ProcessStatus::Starting)
                .ok_or_else(|| KernelError::Cancelled(format!("process {pid} closed during launch")))?;
            process.status = ProcessStatus::Running;
            let title = self
                .windows()
                .get(process.window_id)
                .map(|w| w.title.clone())
                .unwrap_or_else(|| process.manifest.title.clone());
            (
                TaskbarEntry {
                    process_id: pid,
                    app_id: process.app_id.clone(),
                    title,
                    icon: process.manifest.icon.clone(),
                },
                process.window_id,
            )
        };
        let app_id = entry.app_id.clone();
        self.taskbar_guard().add(entry);

        info!(%pid, %app_id, "process running");
        self.events.publish(
            topics::APP_LAUNCHED,
            json!({ "processId": pid, "appId": app_id, "windowId": window_id }),
        );
        Ok(())
    }

    /// Undo a launch that never reached `running`. No terminated event.
    fn discard(&self, pid: ProcessId, window_id: WindowId) {
        let removed = {
            let mut processes = self.processes();
            match processes.get(&pid) {
                Some(p) if p.status == ProcessStatus::Starting => processes.remove(&pid),
                _ => None,
            }
        };
        if removed.is_some() {
            self.windows().close(window_id);
            debug!(%pid, "discarded failed launch");
        }
    }

    fn stop_builtin(&self, process: &Process) {
        if let EntryPoint::Builtin(name) = process.entry_point() {
            if let Some(app) = self.builtins.get(&name) {
                app.stop(process.id);
            }
        }
    }

    // ── termination ──

    /// Tear down one process: window, taskbar entry, record, then exactly
    /// one `application:terminated`. Unknown ids are an error.
    pub fn terminate_process(&self, pid: ProcessId) -> KernelResult<()> {
        let mut process = self
            .processes()
            .remove(&pid)
            .ok_or_else(|| KernelError::not_found(NotFoundKind::Process, pid.to_string()))?;
        process.status = ProcessStatus::Terminating;

        self.windows().close(process.window_id);
        self.taskbar_guard().remove(pid);
        self.stop_builtin(&process);
        debug!(%pid, from = %process.status, "process torn down");

        info!(%pid, app_id = %process.app_id, "process terminated");
        self.events.publish(
            topics::APP_TERMINATED,
            json!({ "processId": pid, "appId": process.app_id }),
        );
        Ok(())
    }

    /// Terminate every process; returns how many were terminated.
    pub fn terminate_all(&self) -> usize {
        let ids: Vec<ProcessId> = self.processes().keys().copied().collect();
        ids.into_iter()
            .filter(|pid| self.terminate_process(*pid).is_ok())
            .count()
    }

    // ── windows ──

    /// Apply one window command. `Close` terminates the owning process.
    pub fn handle_window_request(&self, request: WindowRequest) -> KernelResult<()> {
        let outcome = self.windows().apply(request.window_id, request.command)?;
        match outcome {
            WindowOutcome::Updated(window) => {
                self.taskbar_guard().retitle(window.process_id, &window.title);
                self.events.publish_json(topics::WINDOW_UPDATED, &window);
                Ok(())
            }
            WindowOutcome::CloseRequested(pid) => self.terminate_process(pid),
        }
    }

    /// Queue a command as the desktop would.
    pub fn send_window_command(&self, window_id: WindowId, command: window::WindowCommand) {
        let _ = self.window_tx.send(WindowRequest { window_id, command });
    }

    /// Apply every queued window command without waiting.
    pub fn drain_window_requests(&self) -> usize {
        let Ok(mut rx) = self.window_rx.try_lock() else {
            return 0;
        };
        let mut applied = 0;
        while let Ok(request) = rx.try_recv() {
            if let Err(e) = self.handle_window_request(request) {
                debug!(error = %e, "window command ignored");
            }
            applied += 1;
        }
        applied
    }

    /// The single input loop: applies queued window commands in order.
    /// Runs until the task is aborted.
    pub async fn run_input_loop(self: Arc<Self>) {
        let mut rx = self.window_rx.lock().await;
        while let Some(request) = rx.recv().await {
            if let Err(e) = self.handle_window_request(request) {
                debug!(error = %e, "window command ignored");
            }
        }
    }

    // ── queries ──

    pub fn get(&self, pid: ProcessId) -> Option<Process> {
        self.processes().get(&pid).cloned()
    }

    pub fn list(&self) -> Vec<Process> {
        self.processes().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.processes().len()
    }

    pub fn window(&self, id: WindowId) -> Option<Window> {
        self.windows().get(id).cloned()
    }

    pub fn windows_in_stacking_order(&self) -> Vec<Window> {
        self.windows().stacking_order()
    }

    pub fn taskbar(&self) -> Vec<TaskbarEntry> {
        self.taskbar_guard().entries().to_vec()
    }
}
