//! End-to-end launch scenarios against a scripted backend.
//!
//! Each test boots a kernel on a local tree in a temp dir with alice's
//! session already stored, so the desktop is up before the first launch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use webdesk::apps::Editor;
use webdesk::config::KernelConfig;
use webdesk::events::{topics, EventBus};
use webdesk::kernel::error::KernelError;
use webdesk::kernel::session::MemorySessionStore;
use webdesk::kernel::Kernel;
use webdesk::process::builtin::BuiltinRegistry;
use webdesk::process::types::ProcessStatus;
use webdesk::process::window::WindowCommand;
use webdesk::sandbox::protocol::{GuestMessage, HostMessage};
use webdesk::service::ServiceName;
use webdesk::testing::{RouteReply, ScriptedSandbox, ScriptedTransport};

struct Desk {
    kernel: Kernel,
    transport: Arc<ScriptedTransport>,
    sandbox: Arc<ScriptedSandbox>,
    _dir: tempfile::TempDir,
}

async fn desk_with(transport: ScriptedTransport, sandbox: ScriptedSandbox) -> Desk {
    boot_desk(transport, sandbox, None, false).await
}

async fn boot_desk(
    transport: ScriptedTransport,
    sandbox: ScriptedSandbox,
    builtins: Option<BuiltinRegistry>,
    remote_files: bool,
) -> Desk {
    let dir = tempfile::tempdir().unwrap();
    let mut config = KernelConfig::default();
    config.filesystem.remote = remote_files;
    config.filesystem.local_store = dir.path().join("fs");
    config.ready_poll_ms = 5;
    config.boot_timeout_ms = 500;

    let transport = Arc::new(transport);
    let sandbox = Arc::new(sandbox);
    let mut builder = Kernel::builder(config)
        .transport(transport.clone())
        .sandbox(sandbox.clone())
        .session_store(Arc::new(MemorySessionStore::with_token("token-alice")));
    if let Some(builtins) = builtins {
        builder = builder.builtins(builtins);
    }
    let kernel = builder.build().unwrap();
    kernel.boot().await.unwrap();
    Desk {
        kernel,
        transport,
        sandbox,
        _dir: dir,
    }
}

/// Answer every remote listing with the base layout, so storage
/// finalization keeps the remote backend.
fn serve_base_layout(transport: &ScriptedTransport) {
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
}

async fn desk() -> Desk {
    desk_with(ScriptedTransport::with_defaults(), ScriptedSandbox::new(|_| Vec::new())).await
}

/// Collect every payload published on `topic`.
fn record(bus: &EventBus, topic: &str) -> Arc<Mutex<Vec<Value>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    bus.subscribe(topic, move |event| {
        sink.lock().unwrap().push(event.payload.clone());
        Ok(())
    });
    seen
}

/// Let the kernel's input loop apply queued window commands.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn editor_denies_another_users_file_but_keeps_running() {
    let desk = desk().await;
    let ctx = desk.kernel.context().unwrap();
    let notes = record(&ctx.events, topics::UI_NOTIFICATION);

    let pid = desk
        .kernel
        .launch("editor", json!({"filePath": "/users/bob/secret.txt"}))
        .await
        .unwrap();

    let process = ctx.processes.get(pid).unwrap();
    assert_eq!(process.status, ProcessStatus::Running);
    let notes = notes.lock().unwrap();
    assert!(notes.iter().any(|n| n["kind"] == "PermissionDenied"));

    settle().await;
    let window = ctx.processes.window(process.window_id).unwrap();
    assert_eq!(window.title, "Untitled - Text Editor");
}

#[tokio::test]
async fn overlapping_launches_get_distinct_ids() {
    let transport = ScriptedTransport::with_defaults();
    let manifest = json!({
        "id": "editor", "title": "Text Editor", "version": "1.2.0", "entry": "builtin:editor"
    });
    // The first fetch resolves after the second one.
    transport.on(ServiceName::Apps, "getAppInfo", move |_, ordinal| {
        let reply = RouteReply::Ok(manifest.clone());
        if ordinal == 0 {
            RouteReply::Delayed(Duration::from_millis(50), Box::new(reply))
        } else {
            reply
        }
    });
    let desk = desk_with(transport, ScriptedSandbox::new(|_| Vec::new())).await;

    let (first, second) = tokio::join!(
        desk.kernel.launch("editor", json!({})),
        desk.kernel.launch("editor", json!({})),
    );
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_ne!(first, second);
    // The second launch reached process creation first.
    assert!(second < first);

    let ctx = desk.kernel.context().unwrap();
    let ids: Vec<_> = ctx.processes.list().into_iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![second, first]);
    assert_eq!(ctx.processes.taskbar().len(), 2);
}

#[tokio::test]
async fn unknown_app_reports_launch_failure() {
    let desk = desk().await;
    let ctx = desk.kernel.context().unwrap();
    let failed = record(&ctx.events, topics::APP_LAUNCH_FAILED);

    let err = desk.kernel.launch("ghost", json!({})).await.unwrap_err();
    assert_eq!(err.kind(), "ServiceError");
    assert_eq!(ctx.processes.count(), 0);

    let failed = failed.lock().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["appId"], "ghost");
    assert_eq!(failed[0]["reason"], "error");
    assert!(ctx.ui.history().iter().any(|n| n.kind.as_deref() == Some("ServiceError")));
}

#[tokio::test]
async fn malformed_manifest_is_rejected_at_the_boundary() {
    let transport = ScriptedTransport::with_defaults();
    transport.ok(
        ServiceName::Apps,
        "getAppInfo",
        json!({"id": "broken", "title": "Broken", "version": "1", "entry": "builtin:editor",
               "permissions": ["not a permission"]}),
    );
    let desk = desk_with(transport, ScriptedSandbox::new(|_| Vec::new())).await;

    let err = desk.kernel.launch("broken", json!({})).await.unwrap_err();
    assert!(matches!(err, KernelError::Validation(_)));
    assert!(desk.kernel.context().unwrap().processes.list().is_empty());
}

#[tokio::test]
async fn sandboxed_app_boots_through_message_protocol() {
    let sandbox = ScriptedSandbox::new(|envelope| match &envelope.message {
        HostMessage::Initialize => {
            let home = format!("/users/{}", envelope.surface.user.username);
            vec![
                GuestMessage::SetTitle {
                    title: format!("Hello, {}", envelope.surface.user.name),
                },
                GuestMessage::Publish {
                    topic: "app:hello:started".into(),
                    payload: json!({}),
                },
                GuestMessage::Publish {
                    topic: topics::SYSTEM_SHUTDOWN.into(),
                    payload: json!({}),
                },
                GuestMessage::WriteFile {
                    request_id: "w1".into(),
                    path: format!("{home}/Desktop/hello.txt"),
                    content: "hi".into(),
                },
                GuestMessage::ReadFile {
                    request_id: "r1".into(),
                    path: "/users/bob/Desktop/Welcome.txt".into(),
                },
            ]
        }
        HostMessage::Reply { request_id, .. } if request_id == "r1" => vec![GuestMessage::Ready],
        HostMessage::Reply { .. } => Vec::new(),
    });
    let desk = desk_with(ScriptedTransport::with_defaults(), sandbox).await;
    let ctx = desk.kernel.context().unwrap();
    let started = record(&ctx.events, "app:hello:started");
    let shutdown = record(&ctx.events, topics::SYSTEM_SHUTDOWN);

    let pid = desk.kernel.launch("hello", json!({})).await.unwrap();
    assert_eq!(ctx.processes.get(pid).unwrap().status, ProcessStatus::Running);
    assert_eq!(desk.transport.calls_to(ServiceName::Apps, "getAppAsset"), 1);

    assert_eq!(
        ctx.filesystem.read_file("/users/alice/Desktop/hello.txt").await.unwrap(),
        "hi"
    );
    assert_eq!(started.lock().unwrap().len(), 1);
    assert!(shutdown.lock().unwrap().is_empty());

    let envelopes = desk.sandbox.envelopes();
    assert_eq!(envelopes[0].message, HostMessage::Initialize);
    assert_eq!(envelopes[0].surface.app.id, "hello");
    // Cross-home read is refused by the filesystem, and the guest is told so.
    let refused = envelopes.iter().find_map(|e| match &e.message {
        HostMessage::Reply {
            request_id, ok, ..
        } if request_id == "r1" => Some(*ok),
        _ => None,
    });
    assert_eq!(refused, Some(false));

    settle().await;
    let window = ctx.processes.window(ctx.processes.get(pid).unwrap().window_id).unwrap();
    assert_eq!(window.title, "Hello, Alice");
}

#[tokio::test]
async fn guest_that_never_settles_hits_round_limit() {
    let sandbox = ScriptedSandbox::new(|_| {
        vec![GuestMessage::CreateDirectory {
            request_id: "again".into(),
            path: "/users/alice/loop".into(),
        }]
    });
    let desk = desk_with(ScriptedTransport::with_defaults(), sandbox).await;
    let err = desk.kernel.launch("hello", json!({})).await.unwrap_err();
    assert_eq!(err.kind(), "SandboxError");
    let ctx = desk.kernel.context().unwrap();
    assert_eq!(ctx.processes.count(), 0);
    assert!(ctx.processes.windows_in_stacking_order().is_empty());
}

#[tokio::test]
async fn closing_window_mid_launch_cancels_it() {
    let transport = ScriptedTransport::with_defaults();
    transport.on(ServiceName::Apps, "getAppAsset", |_, _| {
        RouteReply::Delayed(
            Duration::from_millis(100),
            Box::new(RouteReply::Ok(json!({"content": [0, 97, 115, 109]}))),
        )
    });
    let desk = desk_with(transport, ScriptedSandbox::new(|_| vec![GuestMessage::Ready])).await;
    let ctx = desk.kernel.context().unwrap();
    let failed = record(&ctx.events, topics::APP_LAUNCH_FAILED);
    let launched = record(&ctx.events, topics::APP_LAUNCHED);
    let terminated = Arc::new(AtomicUsize::new(0));
    let counter = terminated.clone();
    ctx.events.subscribe(topics::APP_TERMINATED, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let close_while_starting = async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        let starting = ctx
            .processes
            .list()
            .into_iter()
            .find(|p| p.status == ProcessStatus::Starting)
            .expect("launch should be suspended on the asset fetch");
        ctx.processes.send_window_command(starting.window_id, WindowCommand::Close);
    };
    let (result, ()) = tokio::join!(desk.kernel.launch("hello", json!({})), close_while_starting);

    assert!(matches!(result.unwrap_err(), KernelError::Cancelled(_)));
    assert_eq!(ctx.processes.count(), 0);
    assert!(ctx.processes.taskbar().is_empty());
    assert!(launched.lock().unwrap().is_empty());
    let failed = failed.lock().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["reason"], "cancelled");
    // The close went through terminateProcess exactly once.
    assert_eq!(terminated.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn terminate_unknown_process_is_an_error() {
    let desk = desk().await;
    let ctx = desk.kernel.context().unwrap();
    let pid = desk.kernel.launch("files", json!({})).await.unwrap();
    ctx.processes.terminate_process(pid).unwrap();
    let err = ctx.processes.terminate_process(pid).unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn closing_editor_mid_read_leaves_no_session_behind() {
    let transport = ScriptedTransport::with_defaults();
    serve_base_layout(&transport);
    transport.on(ServiceName::Filesystem, "readFile", |_, _| {
        RouteReply::Delayed(
            Duration::from_millis(100),
            Box::new(RouteReply::Ok(json!({"content": "draft"}))),
        )
    });
    let editor = Arc::new(Editor::new());
    let desk = boot_desk(
        transport,
        ScriptedSandbox::new(|_| Vec::new()),
        Some(BuiltinRegistry::new().with(editor.clone())),
        true,
    )
    .await;
    let ctx = desk.kernel.context().unwrap();

    let close_while_reading = async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        let starting = ctx
            .processes
            .list()
            .into_iter()
            .find(|p| p.status == ProcessStatus::Starting)
            .expect("editor should be suspended on its file read");
        ctx.processes.send_window_command(starting.window_id, WindowCommand::Close);
        starting.id
    };
    let (result, pid) = tokio::join!(
        desk.kernel.launch("editor", json!({"filePath": "/users/alice/a.txt"})),
        close_while_reading,
    );

    assert!(matches!(result.unwrap_err(), KernelError::Cancelled(_)));
    assert_eq!(ctx.processes.count(), 0);
    assert!(editor.document(pid).is_none());
}

#[tokio::test]
async fn editor_on_remote_storage_starts_a_missing_file_empty() {
    let transport = ScriptedTransport::with_defaults();
    serve_base_layout(&transport);
    transport.on(ServiceName::Filesystem, "readFile", |_, _| {
        RouteReply::Fail("File not found".into())
    });
    let editor = Arc::new(Editor::new());
    let desk = boot_desk(
        transport,
        ScriptedSandbox::new(|_| Vec::new()),
        Some(BuiltinRegistry::new().with(editor.clone())),
        true,
    )
    .await;
    let ctx = desk.kernel.context().unwrap();
    let notes = record(&ctx.events, topics::UI_NOTIFICATION);

    let pid = desk
        .kernel
        .launch("editor", json!({"filePath": "/users/alice/new.txt"}))
        .await
        .unwrap();

    let document = editor.document(pid).unwrap();
    assert_eq!(document.path.as_deref(), Some("/users/alice/new.txt"));
    assert!(document.content.is_empty());
    assert!(notes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failed_launch_is_reported_once() {
    let desk = desk().await;
    let ctx = desk.kernel.context().unwrap();
    let notes = record(&ctx.events, topics::UI_NOTIFICATION);
    let errors = record(&ctx.events, topics::SYSTEM_ERROR);

    assert!(desk.kernel.launch("no-such-app", json!({})).await.is_err());

    let notes = notes.lock().unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0]["title"], "Could not launch no-such-app");
    assert!(errors.lock().unwrap().is_empty());
    assert!(ctx.ui.banners().is_empty());
    assert_eq!(desk.transport.calls_to(ServiceName::System, "logError"), 0);
}
