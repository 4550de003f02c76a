//! EventBus: named-topic publish/subscribe.
//!
//! Handlers for one topic run synchronously, in registration order, on the
//! publisher's task. A failing handler (error or panic) is logged and the
//! remaining handlers still run; the publisher never sees the failure.
//!
//! Every published event is also forwarded to a broadcast channel for
//! passive observers (CLI status line, tests). Best-effort delivery: a
//! lagging observer skips events.

pub mod topics;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// An event in flight. Exists only for the duration of a dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub topic: String,
    pub payload: Value,
}

type Handler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Returned by `subscribe`; pass `id` back to `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    pub id: SubscriptionId,
}

/// Outcome of a single `publish`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct EventBus {
    next_id: AtomicU64,
    topics: Mutex<HashMap<String, Vec<(SubscriptionId, Handler)>>>,
    observers: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (observers, _) = broadcast::channel(256);
        Self {
            next_id: AtomicU64::new(1),
            topics: Mutex::new(HashMap::new()),
            observers,
        }
    }

    /// Register `handler` for `topic`. Handlers fire in registration order.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        debug!(topic, ?id, "subscribed");
        Subscription {
            topic: topic.to_string(),
            id,
        }
    }

    /// Remove one handler, or every handler for `topic` when `id` is `None`.
    /// Returns how many handlers were removed.
    pub fn unsubscribe(&self, topic: &str, id: Option<SubscriptionId>) -> usize {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(handlers) = topics.get_mut(topic) else {
            return 0;
        };
        let removed = match id {
            Some(id) => {
                let before = handlers.len();
                handlers.retain(|(sid, _)| *sid != id);
                before - handlers.len()
            }
            None => handlers.len(),
        };
        if id.is_none() || handlers.is_empty() {
            topics.remove(topic);
        }
        removed
    }

    /// Invoke every current subscriber of `topic` with `payload`.
    pub fn publish(&self, topic: &str, payload: Value) -> PublishReport {
        // Snapshot so handlers may subscribe/publish re-entrantly.
        let handlers: Vec<Handler> = self
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map(|hs| hs.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        let event = Event {
            topic: topic.to_string(),
            payload,
        };

        let mut report = PublishReport::default();
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(topic, error = %e, "event handler failed");
                }
                Err(_) => {
                    report.failed += 1;
                    warn!(topic, "event handler panicked");
                }
            }
        }

        let _ = self.observers.send(event);
        report
    }

    /// Serialize `payload` and publish it. Serialization failures are logged.
    pub fn publish_json<T: Serialize>(&self, topic: &str, payload: &T) -> PublishReport {
        match serde_json::to_value(payload) {
            Ok(value) => self.publish(topic, value),
            Err(e) => {
                warn!(topic, error = %e, "event payload not serializable");
                PublishReport::default()
            }
        }
    }

    /// Passive stream of every published event.
    pub fn observe(&self) -> broadcast::Receiver<Event> {
        self.observers.subscribe()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, Vec::len)
    }
}
