//! Boot, session, storage fallback, and shutdown behaviour of the kernel.

use std::path::Path;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use webdesk::config::KernelConfig;
use webdesk::events::topics;
use webdesk::kernel::error::KernelError;
use webdesk::kernel::session::{FileSessionStore, MemorySessionStore, SessionStore};
use webdesk::kernel::state::{BootStage, KernelState};
use webdesk::kernel::Kernel;
use webdesk::service::ServiceName;
use webdesk::testing::{RouteReply, ScriptedSandbox, ScriptedTransport};
use webdesk::ui::Surface;
use webdesk::vfs::backend::BackendKind;

fn config(store: &Path) -> KernelConfig {
    let mut config = KernelConfig::default();
    config.filesystem.remote = false;
    config.filesystem.local_store = store.to_path_buf();
    config.ready_poll_ms = 5;
    config.boot_timeout_ms = 500;
    config
}

fn kernel(config: KernelConfig, transport: Arc<ScriptedTransport>, sessions: Arc<dyn SessionStore>) -> Kernel {
    Kernel::builder(config)
        .transport(transport)
        .sandbox(Arc::new(ScriptedSandbox::new(|_| Vec::new())))
        .session_store(sessions)
        .build()
        .unwrap()
}

#[tokio::test]
async fn fresh_boot_shows_login() {
    let dir = tempfile::tempdir().unwrap();
    let k = kernel(
        config(&dir.path().join("fs")),
        Arc::new(ScriptedTransport::with_defaults()),
        Arc::new(MemorySessionStore::new()),
    );
    assert_eq!(k.state(), KernelState::Uninitialized);
    assert_eq!(k.surface(), Surface::Loading);

    k.boot().await.unwrap();
    assert_eq!(k.state(), KernelState::Running);
    assert_eq!(k.surface(), Surface::Login);
    assert_eq!(k.boot_stages(), BootStage::ORDER.to_vec());
    assert_eq!(k.language_pack().unwrap().language, "en");

    // Shared directories exist even before anyone logs in.
    let ctx = k.context().unwrap();
    assert_eq!(ctx.filesystem.backend_kind(), BackendKind::Local);
}

#[tokio::test]
async fn readiness_is_polled_until_ready() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::with_defaults());
    transport.on(ServiceName::System, "getSystemInfo", |_, ordinal| {
        RouteReply::Ok(json!({"name": "WebDesk", "version": "1", "ready": ordinal >= 2}))
    });
    let k = kernel(
        config(&dir.path().join("fs")),
        transport.clone(),
        Arc::new(MemorySessionStore::new()),
    );
    k.boot().await.unwrap();
    assert_eq!(transport.calls_to(ServiceName::System, "getSystemInfo"), 3);
}

#[tokio::test]
async fn missing_language_pack_does_not_fail_boot() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::with_defaults());
    transport.on(ServiceName::System, "getLanguagePack", |_, _| {
        RouteReply::Transport("connection refused".into())
    });
    let k = kernel(
        config(&dir.path().join("fs")),
        transport,
        Arc::new(MemorySessionStore::new()),
    );
    k.boot().await.unwrap();
    assert!(k.language_pack().is_none());
}

#[tokio::test]
async fn login_prepares_home_and_persists_token() {
    let dir = tempfile::tempdir().unwrap();
    let sessions = Arc::new(FileSessionStore::new(dir.path().join("session.json")));
    let k = kernel(
        config(&dir.path().join("fs")),
        Arc::new(ScriptedTransport::with_defaults()),
        sessions.clone(),
    );
    k.boot().await.unwrap();

    let user = k.login("alice", "password").await.unwrap();
    assert_eq!(user.display_name, "Alice");
    assert_eq!(sessions.load().await.unwrap().as_deref(), Some("token-alice"));

    let ctx = k.context().unwrap();
    let names: Vec<_> = ctx
        .filesystem
        .list_directory("/users/alice")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, ["Desktop", "Documents"]);
    assert!(ctx
        .filesystem
        .read_file("/users/alice/Desktop/Welcome.txt")
        .await
        .unwrap()
        .starts_with("Welcome"));
}

#[tokio::test]
async fn logout_terminates_processes_and_clears_identity() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::with_defaults());
    let k = kernel(
        config(&dir.path().join("fs")),
        transport.clone(),
        Arc::new(MemorySessionStore::with_token("token-bob")),
    );
    k.boot().await.unwrap();
    let ctx = k.context().unwrap();
    k.launch("files", json!({})).await.unwrap();
    k.launch("editor", json!({})).await.unwrap();
    assert_eq!(ctx.processes.count(), 2);

    k.logout().await.unwrap();
    assert_eq!(ctx.processes.count(), 0);
    assert!(!ctx.security.is_authenticated());
    assert!(!ctx.security.is_admin());
    assert!(ctx.services.token().is_none());
    assert_eq!(transport.calls_to(ServiceName::Auth, "logout"), 1);
    assert_eq!(k.surface(), Surface::Login);

    // Everything private is refused again.
    assert!(k.launch("files", json!({})).await.is_err());
}

#[tokio::test]
async fn session_survives_restart_with_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("fs");
    let session_file = dir.path().join("session.json");

    let first = kernel(
        config(&store),
        Arc::new(ScriptedTransport::with_defaults()),
        Arc::new(FileSessionStore::new(&session_file)),
    );
    first.boot().await.unwrap();
    first.login("alice", "password").await.unwrap();
    first
        .context()
        .unwrap()
        .filesystem
        .write_file("/users/alice/Documents/plan.txt", "ship it")
        .await
        .unwrap();
    first.shutdown("restart");
    assert_eq!(first.state(), KernelState::Shutdown);

    let second = kernel(
        config(&store),
        Arc::new(ScriptedTransport::with_defaults()),
        Arc::new(FileSessionStore::new(&session_file)),
    );
    second.boot().await.unwrap();
    assert_eq!(second.surface(), Surface::Desktop);
    assert_eq!(
        second
            .context()
            .unwrap()
            .filesystem
            .read_file("/users/alice/Documents/plan.txt")
            .await
            .unwrap(),
        "ship it"
    );
}

#[tokio::test]
async fn unusable_store_degrades_to_memory() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let k = kernel(
        config(&blocker.join("fs")),
        Arc::new(ScriptedTransport::with_defaults()),
        Arc::new(MemorySessionStore::with_token("token-alice")),
    );
    k.boot().await.unwrap();
    let ctx = k.context().unwrap();
    assert_eq!(ctx.filesystem.backend_kind(), BackendKind::Memory);
    assert!(ctx.ui.banners().iter().any(|b| b.title == "Storage unavailable"));

    // Still fully usable for the session.
    ctx.filesystem
        .write_file("/users/alice/Documents/tmp.txt", "x")
        .await
        .unwrap();
    assert_eq!(
        ctx.filesystem.read_file("/users/alice/Documents/tmp.txt").await.unwrap(),
        "x"
    );
}

#[tokio::test]
async fn failing_remote_filesystem_falls_back_to_local() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&dir.path().join("fs"));
    config.filesystem.remote = true;
    // The scripted backend has no filesystem routes at all.
    let k = kernel(
        config,
        Arc::new(ScriptedTransport::with_defaults()),
        Arc::new(MemorySessionStore::with_token("token-alice")),
    );
    k.boot().await.unwrap();

    let ctx = k.context().unwrap();
    assert_eq!(ctx.filesystem.backend_kind(), BackendKind::Local);
    assert!(ctx.ui.banners().iter().any(|b| b.title == "Using local storage"));
    assert!(ctx.filesystem.exists("/users/alice/Desktop").await.unwrap());
}

#[tokio::test]
async fn remote_filesystem_kept_when_healthy() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&dir.path().join("fs"));
    config.filesystem.remote = true;
    let transport = Arc::new(ScriptedTransport::with_defaults());
    transport.ok(
        ServiceName::Filesystem,
        "listDirectory",
        json!([
            {"name": "users", "type": "directory"},
            {"name": "apps", "type": "directory"},
            {"name": "system", "type": "directory"},
            {"name": "alice", "type": "directory"},
            {"name": "Desktop", "type": "directory"},
            {"name": "Documents", "type": "directory"},
            {"name": "Welcome.txt", "type": "file"}
        ]),
    );
    let k = kernel(config, transport.clone(), Arc::new(MemorySessionStore::with_token("token-alice")));
    k.boot().await.unwrap();
    assert_eq!(k.context().unwrap().filesystem.backend_kind(), BackendKind::Remote);
    assert_eq!(transport.calls_to(ServiceName::Filesystem, "createDirectory"), 0);
}

#[tokio::test]
async fn report_error_reaches_bus_and_backend() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::with_defaults());
    let k = kernel(
        config(&dir.path().join("fs")),
        transport.clone(),
        Arc::new(MemorySessionStore::with_token("token-alice")),
    );
    k.boot().await.unwrap();
    let ctx = k.context().unwrap();
    let seen: Arc<Mutex<Vec<Value>>> = Arc::default();
    let sink = seen.clone();
    ctx.events.subscribe(topics::SYSTEM_ERROR, move |event| {
        sink.lock().unwrap().push(event.payload.clone());
        Ok(())
    });

    k.report_error("files", "listing exploded").await;
    assert_eq!(seen.lock().unwrap()[0]["source"], "files");
    assert_eq!(transport.calls_to(ServiceName::System, "logError"), 1);

    let banner = ctx.ui.banners().pop().unwrap();
    assert!(ctx.ui.dismiss(banner.id));
    assert!(ctx.ui.banners().is_empty());
}

#[tokio::test]
async fn shutdown_publishes_final_event_once() {
    let dir = tempfile::tempdir().unwrap();
    let k = kernel(
        config(&dir.path().join("fs")),
        Arc::new(ScriptedTransport::with_defaults()),
        Arc::new(MemorySessionStore::with_token("token-alice")),
    );
    k.boot().await.unwrap();
    let ctx = k.context().unwrap();
    k.launch("editor", json!({})).await.unwrap();

    let seen: Arc<Mutex<Vec<Value>>> = Arc::default();
    let sink = seen.clone();
    ctx.events.subscribe(topics::SYSTEM_SHUTDOWN, move |event| {
        sink.lock().unwrap().push(event.payload.clone());
        Ok(())
    });

    k.shutdown("maintenance");
    k.shutdown("maintenance");
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["reason"], "maintenance");
    assert_eq!(seen[0]["terminated"], 1);
    assert!(ServiceName::ALL.iter().all(|s| !ctx.services.is_connected(*s)));
}

#[tokio::test]
async fn boot_failure_is_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::with_defaults());
    transport.on(ServiceName::System, "getSystemInfo", |_, _| {
        RouteReply::Transport("backend down".into())
    });
    let mut config = config(&dir.path().join("fs"));
    config.boot_timeout_ms = 50;
    let k = kernel(config, transport, Arc::new(MemorySessionStore::new()));

    assert!(k.boot().await.is_err());
    assert_eq!(k.state(), KernelState::Error);
    match k.surface() {
        Surface::FatalError { message } => assert!(message.contains("services")),
        other => panic!("expected fatal surface, got {other}"),
    }
    assert!(k.login("alice", "password").await.is_err());

    k.shutdown("operator");
    assert_eq!(k.state(), KernelState::Shutdown);
}

#[tokio::test]
async fn dotted_username_cannot_log_in() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::with_defaults());
    transport.ok(
        ServiceName::Auth,
        "login",
        json!({
            "token": "token-bob.smith",
            "user": {"username": "bob.smith", "displayName": "Bob", "roles": ["user"]},
            "permissions": ["filesystem.read.users.bob.*"]
        }),
    );
    let store = Arc::new(MemorySessionStore::new());
    let k = kernel(config(&dir.path().join("fs")), transport, store.clone());
    k.boot().await.unwrap();

    let err = k.login("bob.smith", "password").await.unwrap_err();
    assert!(matches!(err, KernelError::Validation(_)));
    let ctx = k.context().unwrap();
    assert!(!ctx.security.is_authenticated());
    assert_eq!(ctx.services.token(), None);
    assert_eq!(store.token(), None);
    assert_eq!(k.surface(), Surface::Login);
}
