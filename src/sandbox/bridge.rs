//! Drives a sandboxed app's boot: posts `initialize`, carries out what the
//! guest asks for through its `AppContext`, and feeds the answers back.
//!
//! Every guest request goes through the same permission-gated filesystem
//! and scoped bus as built-in apps. The launch's liveness check runs after
//! every await so a window closed mid-boot stops the exchange.

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::error::SandboxError;
use super::protocol::{GuestMessage, HostEnvelope, HostMessage};
use super::runtime::SandboxModule;
use crate::events::topics;
use crate::kernel::error::{KernelError, KernelResult};
use crate::process::context::AppContext;

pub const MAX_ROUNDS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootOutcome {
    pub rounds: usize,
    pub ready: bool,
}

pub async fn boot_guest(
    module: Arc<dyn SandboxModule>,
    ctx: &AppContext,
    is_live: impl Fn() -> bool + Send + Sync,
) -> KernelResult<BootOutcome> {
    let surface = ctx.surface();
    let scope = topics::app_scope(&ctx.app.id);
    let mut pending = VecDeque::from([HostMessage::Initialize]);
    let mut outcome = BootOutcome {
        rounds: 0,
        ready: false,
    };

    while let Some(message) = pending.pop_front() {
        if outcome.rounds == MAX_ROUNDS {
            return Err(SandboxError::RoundLimit(MAX_ROUNDS).into());
        }
        outcome.rounds += 1;

        let envelope = HostEnvelope {
            surface: surface.clone(),
            message,
        };
        let replies = module.dispatch(&envelope).await?;
        ensure_live(&is_live, ctx)?;

        for guest in replies {
            if let Some(reply) = handle(guest, ctx, &scope, &mut outcome).await {
                pending.push_back(reply);
            }
            ensure_live(&is_live, ctx)?;
        }
    }

    debug!(app_id = %ctx.app.id, rounds = outcome.rounds, ready = outcome.ready, "guest settled");
    Ok(outcome)
}

fn ensure_live(is_live: &impl Fn() -> bool, ctx: &AppContext) -> KernelResult<()> {
    if is_live() {
        Ok(())
    } else {
        Err(KernelError::Cancelled(format!(
            "process {} closed while '{}' was booting",
            ctx.window.process_id(),
            ctx.app.id
        )))
    }
}

fn answer(request_id: String, result: KernelResult<Value>) -> HostMessage {
    match result {
        Ok(value) => HostMessage::success(request_id, value),
        Err(e) => HostMessage::failure(request_id, e.to_string()),
    }
}

/// Carry out one guest message; returns the reply to send, if any.
async fn handle(
    message: GuestMessage,
    ctx: &AppContext,
    scope: &str,
    outcome: &mut BootOutcome,
) -> Option<HostMessage> {
    let fs = &ctx.filesystem;
    match message {
        GuestMessage::SetTitle { title } => ctx.window.set_title(title),
        GuestMessage::Close => ctx.window.close(),
        GuestMessage::Notify {
            level,
            title,
            message,
        } => {
            ctx.ui.notify(level, &title, &message);
        }
        GuestMessage::Publish { topic, payload } => {
            if topic.starts_with(scope) {
                ctx.events.publish(&topic, payload);
            } else {
                let err = SandboxError::Capability(format!("topic '{topic}' is outside '{scope}'"));
                warn!(app_id = %ctx.app.id, error = %err, "guest publish refused");
            }
        }
        GuestMessage::Log { message } => info!(app_id = %ctx.app.id, "guest: {message}"),
        GuestMessage::Ready => outcome.ready = true,
        GuestMessage::ReadFile { request_id, path } => {
            let result = fs.read_file(&path).await.map(|content| json!({ "content": content }));
            return Some(answer(request_id, result));
        }
        GuestMessage::WriteFile {
            request_id,
            path,
            content,
        } => {
            let result = fs.write_file(&path, &content).await.map(|()| Value::Null);
            return Some(answer(request_id, result));
        }
        GuestMessage::ListDirectory { request_id, path } => {
            let result = fs.list_directory(&path).await.and_then(|entries| {
                serde_json::to_value(entries)
                    .map_err(|e| KernelError::Validation(format!("listing not serializable: {e}")))
            });
            return Some(answer(request_id, result));
        }
        GuestMessage::CreateDirectory { request_id, path } => {
            let result = fs.create_directory(&path).await.map(|()| Value::Null);
            return Some(answer(request_id, result));
        }
        GuestMessage::DeleteFile { request_id, path } => {
            let result = fs.delete_file(&path).await.map(|()| Value::Null);
            return Some(answer(request_id, result));
        }
    }
    None
}
