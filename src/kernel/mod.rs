//! Kernel: boot orchestration and the top-level lifecycle.
//!
//! Boot runs a fixed sequence of stages, strictly in order:
//! configuration → event bus → security → filesystem → processes →
//! services → session restore → surface → storage.
//!
//! Any stage failure is terminal: the kernel moves to `error`, shows the
//! fatal surface, and stays there. There is no retry. A running kernel
//! takes the same path when it loses its window input loop or is failed
//! explicitly through [`Kernel::fail`].
//!
//! Once running, the kernel owns login/logout, launch requests, global
//! error capture (including panics, via [`panic_reporter`]), and shutdown. Subsystems are reached through the
//! explicit `KernelContext`, never through globals.

pub mod error;
pub mod session;
pub mod state;

use std::future::Future;
use std::panic::PanicHookInfo;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::apps;
use crate::config::KernelConfig;
use crate::events::{topics, EventBus, Subscription};
use crate::process::builtin::BuiltinRegistry;
use crate::process::types::ProcessId;
use crate::process::{ProcessDeps, ProcessManager};
use crate::sandbox::runtime::{SandboxRuntime, WasmRuntime};
use crate::security::{validate_username, LoginEvent, SecurityContext, User};
use crate::service::protocol::{AuthRequest, AuthSession, LanguagePack, SystemInfo, SystemRequest};
use crate::service::transport::{HttpTransport, Transport};
use crate::service::{ServiceError, ServiceHub, ServiceName};
use crate::ui::{Level, Notifier, Surface};
use crate::vfs::backend::BackendKind;
use crate::vfs::remote::RemoteBackend;
use crate::vfs::{self, VirtualFileSystem};
use error::{KernelError, KernelResult};
use session::{FileSessionStore, SessionStore};
use state::{BootStage, KernelState};

/// Everything a running kernel hands to its subsystems and apps.
#[derive(Clone)]
pub struct KernelContext {
    pub config: Arc<KernelConfig>,
    pub events: Arc<EventBus>,
    pub security: Arc<SecurityContext>,
    pub services: Arc<ServiceHub>,
    pub filesystem: Arc<VirtualFileSystem>,
    pub processes: Arc<ProcessManager>,
    pub ui: Arc<Notifier>,
}

/// Collaborators default to the real ones; tests swap in scripted
/// versions.
pub struct KernelBuilder {
    config: KernelConfig,
    transport: Option<Arc<dyn Transport>>,
    sandbox: Option<Arc<dyn SandboxRuntime>>,
    session_store: Option<Arc<dyn SessionStore>>,
    builtins: Option<BuiltinRegistry>,
}

impl KernelBuilder {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            transport: None,
            sandbox: None,
            session_store: None,
            builtins: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn sandbox(mut self, sandbox: Arc<dyn SandboxRuntime>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    pub fn builtins(mut self, builtins: BuiltinRegistry) -> Self {
        self.builtins = Some(builtins);
        self
    }

    pub fn build(self) -> KernelResult<Kernel> {
        let transport = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::new(self.config.api_base_url.clone())),
        };
        let sandbox = match self.sandbox {
            Some(s) => s,
            None => Arc::new(WasmRuntime::new()?),
        };
        let session_store = match self.session_store {
            Some(s) => s,
            None => Arc::new(FileSessionStore::new(self.config.session_file.clone())),
        };
        Ok(Kernel {
            config: Arc::new(self.config),
            transport,
            sandbox,
            session_store,
            builtins: self.builtins.unwrap_or_else(apps::default_builtins),
            state: Arc::new(RwLock::new(KernelState::Uninitialized)),
            surface: Arc::new(RwLock::new(Surface::Loading)),
            context: OnceLock::new(),
            completed: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            input_loop: Mutex::new(None),
            language: RwLock::new(None),
        })
    }
}

pub struct Kernel {
    config: Arc<KernelConfig>,
    transport: Arc<dyn Transport>,
    sandbox: Arc<dyn SandboxRuntime>,
    session_store: Arc<dyn SessionStore>,
    builtins: BuiltinRegistry,
    state: Arc<RwLock<KernelState>>,
    surface: Arc<RwLock<Surface>>,
    context: OnceLock<KernelContext>,
    completed: Mutex<Vec<BootStage>>,
    subscriptions: Mutex<Vec<Subscription>>,
    input_loop: Mutex<Option<AbortHandle>>,
    language: RwLock<Option<LanguagePack>>,
}

impl Kernel {
    pub fn builder(config: KernelConfig) -> KernelBuilder {
        KernelBuilder::new(config)
    }

    // ── accessors ──

    pub fn state(&self) -> KernelState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn surface(&self) -> Surface {
        self.surface
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Present once the boot has constructed every subsystem.
    pub fn context(&self) -> Option<&KernelContext> {
        self.context.get()
    }

    /// Stages that completed, in completion order.
    pub fn boot_stages(&self) -> Vec<BootStage> {
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn language_pack(&self) -> Option<LanguagePack> {
        self.language
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn transition(&self, next: KernelState) -> KernelResult<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.can_transition_to(next) {
            return Err(KernelError::InvalidTransition {
                from: *state,
                to: next,
            });
        }
        let from = *state;
        debug!(%from, to = %next, "kernel state");
        *state = next;
        Ok(())
    }

    fn set_surface(&self, surface: Surface) {
        info!(%surface, "surface");
        *self.surface.write().unwrap_or_else(PoisonError::into_inner) = surface;
    }

    fn fault_line(&self) -> FaultLine {
        FaultLine {
            state: self.state.clone(),
            surface: self.surface.clone(),
        }
    }

    fn running_context(&self) -> KernelResult<&KernelContext> {
        let state = self.state();
        if state != KernelState::Running {
            return Err(KernelError::NotRunning(state));
        }
        self.context.get().ok_or(KernelError::NotRunning(state))
    }

    // ── boot ──

    /// Run the boot sequence. On failure the kernel is left in `error`
    /// with the fatal surface showing, and the failing stage is returned.
    pub async fn boot(&self) -> KernelResult<()> {
        self.transition(KernelState::Initializing)?;
        self.set_surface(Surface::Loading);
        info!(api = %self.config.api_base_url, "kernel boot");

        match self.run_stages().await {
            Ok(ctx) => {
                self.transition(KernelState::Running)?;
                ctx.events.publish(
                    topics::SYSTEM_READY,
                    json!({ "authenticated": ctx.security.is_authenticated() }),
                );
                info!(stages = self.boot_stages().len(), "kernel running");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "kernel boot failed");
                self.transition(KernelState::Error)?;
                self.set_surface(Surface::FatalError {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn stage<T, F>(&self, stage: BootStage, work: F) -> KernelResult<T>
    where
        F: Future<Output = KernelResult<T>>,
    {
        debug!(%stage, "boot stage start");
        match work.await {
            Ok(value) => {
                self.completed
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(stage);
                info!(%stage, "boot stage complete");
                Ok(value)
            }
            Err(e) => Err(KernelError::Boot {
                stage,
                reason: e.to_string(),
            }),
        }
    }

    async fn run_stages(&self) -> KernelResult<&KernelContext> {
        self.stage(BootStage::LoadConfig, async { self.config.validate() })
            .await?;

        let (events, ui) = self
            .stage(BootStage::EventBus, async {
                let events = Arc::new(EventBus::new());
                let ui = Arc::new(Notifier::new(events.clone()));
                let subs = register_system_handlers(&events);
                self.subscriptions
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend(subs);
                Ok((events, ui))
            })
            .await?;

        let (security, services) = self
            .stage(BootStage::Security, async {
                let security = Arc::new(SecurityContext::new());
                let subs = security.attach(&events);
                self.subscriptions
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend(subs);
                let services = Arc::new(ServiceHub::new(self.transport.clone(), security.clone()));
                Ok((security, services))
            })
            .await?;

        let filesystem = self
            .stage(BootStage::FileSystem, async {
                let backend: Arc<dyn vfs::backend::FsBackend> = if self.config.filesystem.remote {
                    Arc::new(RemoteBackend::new(services.clone()))
                } else {
                    self.open_local_backend(&ui).await
                };
                info!(backend = %backend.kind(), "filesystem backend selected");
                Ok(Arc::new(VirtualFileSystem::new(backend, security.clone())))
            })
            .await?;

        let processes = self
            .stage(BootStage::Processes, async {
                let pm = Arc::new(ProcessManager::new(ProcessDeps {
                    security: security.clone(),
                    services: services.clone(),
                    filesystem: filesystem.clone(),
                    events: events.clone(),
                    ui: ui.clone(),
                    sandbox: self.sandbox.clone(),
                    builtins: self.builtins.clone(),
                    desktop: (self.config.desktop.width, self.config.desktop.height),
                }));
                let handle = tokio::spawn(pm.clone().run_input_loop());
                *self.input_loop.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(handle.abort_handle());
                tokio::spawn(supervise_input_loop(handle, self.fault_line(), events.clone()));
                Ok(pm)
            })
            .await?;

        let ctx = KernelContext {
            config: self.config.clone(),
            events,
            security,
            services,
            filesystem,
            processes,
            ui,
        };
        let ctx = self.context.get_or_init(|| ctx);

        self.stage(BootStage::Services, async {
            ctx.services.connect_all();
            let info = self.wait_until_ready(ctx).await?;
            info!(name = %info.name, version = %info.version, "backend ready");
            self.load_language_pack(ctx).await;
            Ok(())
        })
        .await?;

        self.stage(BootStage::SessionRestore, async {
            self.restore_session(ctx).await;
            Ok(())
        })
        .await?;

        self.stage(BootStage::Surface, async {
            let surface = if ctx.security.is_authenticated() {
                Surface::Desktop
            } else {
                Surface::Login
            };
            self.set_surface(surface);
            Ok(())
        })
        .await?;

        self.stage(BootStage::Storage, async {
            let user = ctx.security.current_user();
            self.prepare_storage(ctx, user.as_ref()).await
        })
        .await?;

        Ok(ctx)
    }

    async fn open_local_backend(&self, ui: &Notifier) -> Arc<dyn vfs::backend::FsBackend> {
        let (backend, degraded) = vfs::open_local(&self.config.filesystem.local_store).await;
        if let Some(e) = degraded {
            ui.banner(
                Level::Warning,
                "Storage unavailable",
                &format!("Files will not be saved after this session ({e})"),
            );
        }
        backend
    }

    /// Poll `system.getSystemInfo` until the backend reports ready. This is
    /// the only bounded wait in the boot.
    async fn wait_until_ready(&self, ctx: &KernelContext) -> KernelResult<SystemInfo> {
        let poll = Duration::from_millis(self.config.ready_poll_ms);
        let limit = Duration::from_millis(self.config.boot_timeout_ms);
        let wait = async {
            loop {
                match ctx.services.system.call::<SystemInfo>(&SystemRequest::GetSystemInfo).await {
                    Ok(info) if info.ready => return info,
                    Ok(_) => debug!("backend not ready yet"),
                    Err(e) => debug!(error = %e, "backend not reachable yet"),
                }
                tokio::time::sleep(poll).await;
            }
        };
        tokio::time::timeout(limit, wait).await.map_err(|_| {
            ServiceError::Timeout {
                service: ServiceName::System,
                waited_ms: self.config.boot_timeout_ms,
            }
            .into()
        })
    }

    async fn load_language_pack(&self, ctx: &KernelContext) {
        let request = SystemRequest::GetLanguagePack {
            language: self.config.language.clone(),
        };
        match ctx.services.system.call::<LanguagePack>(&request).await {
            Ok(pack) => {
                debug!(language = %pack.language, strings = pack.strings.len(), "language pack loaded");
                *self.language.write().unwrap_or_else(PoisonError::into_inner) = Some(pack);
            }
            Err(e) => warn!(language = %self.config.language, error = %e, "language pack unavailable"),
        }
    }

    /// Validate a persisted token. Any failure clears it and falls through
    /// to the login surface.
    async fn restore_session(&self, ctx: &KernelContext) {
        let token = match self.session_store.load().await {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!("no stored session");
                return;
            }
            Err(e) => {
                warn!(error = %e, "session store unreadable");
                return;
            }
        };

        let request = AuthRequest::ValidateToken { token };
        let restored = match ctx.services.auth.call::<AuthSession>(&request).await {
            Ok(session) => self.apply_session(ctx, session),
            Err(e) => Err(e),
        };
        match restored {
            Ok(user) => info!(user = %user.username, "session restored"),
            Err(e) => {
                info!(error = %e, "stored session rejected");
                ctx.services.set_token(None);
                if let Err(e) = self.session_store.clear().await {
                    warn!(error = %e, "could not clear stored session");
                }
            }
        }
    }

    /// Install an authenticated session: token on the service hub, then
    /// `auth:login` so the security context picks up the identity.
    fn apply_session(&self, ctx: &KernelContext, session: AuthSession) -> KernelResult<User> {
        validate_username(&session.user.username)?;
        ctx.services.set_token(Some(session.token));
        let event = LoginEvent {
            user: session.user.clone(),
            permissions: session.permissions,
        };
        ctx.events.publish_json(topics::AUTH_LOGIN, &event);
        if !ctx.security.is_authenticated() {
            return Err(KernelError::AuthenticationRequired);
        }
        Ok(session.user)
    }

    /// Base structure on the active backend. A remote backend that fails
    /// its health check is replaced by the local one for the rest of the session.
    async fn prepare_storage(&self, ctx: &KernelContext, user: Option<&User>) -> KernelResult<()> {
        if ctx.filesystem.backend_kind() != BackendKind::Remote {
            return ctx.filesystem.ensure_base_structure(user).await;
        }
        // The remote service only answers authenticated callers.
        if user.is_none() {
            return Ok(());
        }
        match ctx.filesystem.ensure_base_structure(user).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "remote filesystem failed its health check, switching to local storage");
                let local = self.open_local_backend(&ctx.ui).await;
                ctx.filesystem.swap_backend(local);
                ctx.ui.banner(
                    Level::Warning,
                    "Using local storage",
                    "The file service is unavailable; files are kept on this machine.",
                );
                ctx.filesystem.ensure_base_structure(user).await
            }
        }
    }

    // ── session ──

    pub async fn login(&self, username: &str, password: &str) -> KernelResult<User> {
        let ctx = self.running_context()?;
        let request = AuthRequest::Login {
            username: username.to_string(),
            password: password.to_string(),
        };
        let session: AuthSession = ctx.services.auth.call(&request).await?;
        let token = session.token.clone();
        let user = self.apply_session(ctx, session)?;

        if let Err(e) = self.session_store.save(&token).await {
            warn!(error = %e, "session not persisted");
        }
        self.set_surface(Surface::Desktop);

        if let Err(e) = self.prepare_storage(ctx, Some(&user)).await {
            warn!(user = %user.username, error = %e, "home directory not prepared");
            ctx.ui.notify_error("Home directory unavailable", &e);
        }
        info!(user = %user.username, "logged in");
        Ok(user)
    }

    pub async fn logout(&self) -> KernelResult<()> {
        let ctx = self.running_context()?;
        let Some(user) = ctx.security.current_user() else {
            return Ok(());
        };

        if let Some(token) = ctx.services.token() {
            if let Err(e) = ctx.services.auth.call_unit(&AuthRequest::Logout { token }).await {
                debug!(error = %e, "server logout failed");
            }
        }
        let terminated = ctx.processes.terminate_all();
        ctx.services.set_token(None);
        if let Err(e) = self.session_store.clear().await {
            warn!(error = %e, "could not clear stored session");
        }
        ctx.events.publish(
            topics::AUTH_LOGOUT,
            json!({ "username": user.username, "reason": "logout" }),
        );
        self.set_surface(Surface::Login);
        info!(user = %user.username, terminated, "logged out");
        Ok(())
    }

    // ── processes ──

    pub async fn launch(&self, app_id: &str, params: Value) -> KernelResult<ProcessId> {
        let ctx = self.running_context()?;
        ctx.processes.launch_application(app_id, params).await
    }

    // ── errors ──

    /// Take a running kernel to `error`: fatal surface, and `system:error`
    /// with `fatal: true`. Processes stay until shutdown, which is still
    /// available; nothing else is.
    pub fn fail(&self, reason: &str) -> KernelResult<()> {
        let ctx = self.running_context()?;
        if !self.fault_line().trip(&ctx.events, reason) {
            return Err(KernelError::NotRunning(self.state()));
        }
        Ok(())
    }

    /// A sender whose messages are raised through [`Kernel::report_error`]
    /// by a background task. The task ends once the kernel is dropped or
    /// every sender is gone.
    pub fn error_sink(self: &Arc<Self>) -> mpsc::UnboundedSender<CapturedError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<CapturedError>();
        let kernel = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(captured) = rx.recv().await {
                let Some(kernel) = kernel.upgrade() else {
                    break;
                };
                kernel.report_error(&captured.source, &captured.message).await;
            }
        });
        tx
    }

    /// Global error capture: a dismissible banner, `system:error`, and a
    /// best-effort copy to the backend's log.
    pub async fn report_error(&self, source: &str, message: &str) {
        error!(source, message, "unhandled error");
        let Some(ctx) = self.context.get() else {
            return;
        };
        ctx.ui.banner(Level::Error, source, message);
        ctx.events.publish(
            topics::SYSTEM_ERROR,
            json!({ "source": source, "message": message }),
        );
        if ctx.security.is_authenticated() && ctx.services.is_connected(ServiceName::System) {
            let request = SystemRequest::LogError {
                message: message.to_string(),
                context: json!({ "source": source }),
            };
            if let Err(e) = ctx.services.system.call_unit(&request).await {
                debug!(error = %e, "error report not delivered");
            }
        }
    }

    // ── shutdown ──

    /// Terminate every process, drop the in-memory identity, disconnect
    /// every service, and publish `system:shutdown`. Always completes; a
    /// second call is a no-op. The persisted session is kept.
    pub fn shutdown(&self, reason: &str) {
        if let Err(e) = self.transition(KernelState::ShuttingDown) {
            debug!(error = %e, "shutdown skipped");
            return;
        }
        info!(reason, "kernel shutting down");

        if let Some(ctx) = self.context.get() {
            let terminated = ctx.processes.terminate_all();
            if let Some(user) = ctx.security.current_user() {
                ctx.events.publish(
                    topics::AUTH_LOGOUT,
                    json!({ "username": user.username, "reason": "shutdown" }),
                );
            }
            ctx.services.set_token(None);
            ctx.services.disconnect_all();
            if let Some(handle) = self
                .input_loop
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
            {
                handle.abort();
            }
            ctx.events.publish(
                topics::SYSTEM_SHUTDOWN,
                json!({ "reason": reason, "terminated": terminated }),
            );
            let subs = std::mem::take(
                &mut *self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner),
            );
            for sub in subs {
                ctx.events.unsubscribe(&sub.topic, Some(sub.id));
            }
        }

        if let Err(e) = self.transition(KernelState::Shutdown) {
            warn!(error = %e, "unexpected state at end of shutdown");
        }
    }
}

/// An error raised outside any kernel call, queued for [`Kernel::report_error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedError {
    pub source: String,
    pub message: String,
}

/// Panic hook that logs the panic and queues it on an [`Kernel::error_sink`],
/// so it surfaces as a banner like any other unhandled error.
pub fn panic_reporter(
    sink: mpsc::UnboundedSender<CapturedError>,
) -> Box<dyn Fn(&PanicHookInfo<'_>) + Send + Sync + 'static> {
    Box::new(move |info: &PanicHookInfo<'_>| {
        error!(panic = %info, "unhandled panic");
        let captured = CapturedError {
            source: "panic".to_string(),
            message: info.to_string(),
        };
        // A closed sink means the kernel is gone; the log line stands alone.
        let _ = sink.send(captured);
    })
}

/// State and surface, shared with background tasks that may fail the kernel.
#[derive(Clone)]
struct FaultLine {
    state: Arc<RwLock<KernelState>>,
    surface: Arc<RwLock<Surface>>,
}

impl FaultLine {
    /// `running` → `error`. Returns false, changing nothing, in any other state.
    fn trip(&self, events: &EventBus, reason: &str) -> bool {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if *state != KernelState::Running {
                return false;
            }
            *state = KernelState::Error;
        }
        error!(reason, "kernel failed while running");
        *self.surface.write().unwrap_or_else(PoisonError::into_inner) = Surface::FatalError {
            message: reason.to_string(),
        };
        events.publish(
            topics::SYSTEM_ERROR,
            json!({ "source": "kernel", "message": reason, "fatal": true }),
        );
        true
    }
}

/// Windows stop responding once the input loop is gone, so losing it fails
/// the kernel. Aborting it at shutdown does not.
async fn supervise_input_loop(input_loop: JoinHandle<()>, fault: FaultLine, events: Arc<EventBus>) {
    let reason = match input_loop.await {
        Err(e) if e.is_cancelled() => return,
        Err(e) => format!("window input loop panicked: {e}"),
        Ok(()) => "window input loop stopped".to_string(),
    };
    fault.trip(&events, &reason);
}

/// Kernel-level listeners that only log.
fn register_system_handlers(events: &EventBus) -> Vec<Subscription> {
    vec![
        events.subscribe(topics::APP_LAUNCHED, |event| {
            debug!(payload = %event.payload, "application launched");
            Ok(())
        }),
        events.subscribe(topics::APP_TERMINATED, |event| {
            debug!(payload = %event.payload, "application terminated");
            Ok(())
        }),
        events.subscribe(topics::SYSTEM_ERROR, |event| {
            warn!(payload = %event.payload, "system error reported");
            Ok(())
        }),
    ]
}
