//! Panics anywhere in the process reach the desktop as error banners.
//!
//! Installs a process-wide panic hook, so it lives in its own test binary.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use webdesk::config::KernelConfig;
use webdesk::events::topics;
use webdesk::kernel::session::MemorySessionStore;
use webdesk::kernel::{panic_reporter, CapturedError, Kernel};
use webdesk::service::ServiceName;
use webdesk::testing::{ScriptedSandbox, ScriptedTransport};

#[tokio::test]
async fn panics_are_raised_as_banners() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = KernelConfig::default();
    config.filesystem.remote = false;
    config.filesystem.local_store = dir.path().join("fs");
    config.ready_poll_ms = 5;
    config.boot_timeout_ms = 500;

    let transport = Arc::new(ScriptedTransport::with_defaults());
    let kernel = Arc::new(
        Kernel::builder(config)
            .transport(transport.clone())
            .sandbox(Arc::new(ScriptedSandbox::new(|_| Vec::new())))
            .session_store(Arc::new(MemorySessionStore::with_token("token-alice")))
            .build()
            .unwrap(),
    );
    kernel.boot().await.unwrap();
    let ctx = kernel.context().unwrap();

    let reported: Arc<Mutex<Vec<Value>>> = Arc::default();
    let sink = reported.clone();
    ctx.events.subscribe(topics::SYSTEM_ERROR, move |event| {
        sink.lock().unwrap().push(event.payload.clone());
        Ok(())
    });

    let previous = std::panic::take_hook();
    std::panic::set_hook(panic_reporter(kernel.error_sink()));
    let crashed = tokio::spawn(async { panic!("widget exploded"); }).await;
    std::panic::set_hook(previous);
    assert!(crashed.unwrap_err().is_panic());

    for _ in 0..50 {
        if !reported.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let reported = reported.lock().unwrap().clone();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0]["source"], "panic");
    assert!(reported[0]["message"].as_str().unwrap().contains("widget exploded"));
    assert!(ctx
        .ui
        .banners()
        .iter()
        .any(|b| b.title == "panic" && b.message.contains("widget exploded")));
    assert_eq!(transport.calls_to(ServiceName::System, "logError"), 1);
}

#[tokio::test]
async fn sink_outliving_the_kernel_is_harmless() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = KernelConfig::default();
    config.filesystem.remote = false;
    config.filesystem.local_store = dir.path().join("fs");
    let kernel = Arc::new(
        Kernel::builder(config)
            .transport(Arc::new(ScriptedTransport::with_defaults()))
            .sandbox(Arc::new(ScriptedSandbox::new(|_| Vec::new())))
            .session_store(Arc::new(MemorySessionStore::new()))
            .build()
            .unwrap(),
    );
    let sink = kernel.error_sink();
    drop(kernel);

    let late = CapturedError {
        source: "panic".into(),
        message: "after teardown".into(),
    };
    // Either the drain task already ended or it drops the message; no panic.
    let _ = sink.send(late);
    tokio::task::yield_now().await;
}
