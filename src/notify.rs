//! In-memory notification hub.
//!
//! Holds subscriber sinks keyed by agent name (push inbox) and by topic
//! name. Delivery is non-blocking: a saturated sink drops the event for
//! that subscriber and bumps its drop counter, so a slow subscriber never
//! delays the rest. Nothing here is persistent; a reconnecting subscriber
//! reconciles through the poll-changes path.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::models::Priority;

/// Per-subscriber sink capacity.
const SINK_CAPACITY: usize = 64;

/// Length of the subject preview carried in events.
const PREVIEW_LEN: usize = 80;

/// A new-message event. Small on purpose; subscribers fetch full bodies
/// through the mail service.
#[derive(Debug, Clone, Serialize)]
pub struct NotifyEvent {
    pub message_id: String,
    pub recipient: String,
    pub sender: String,
    pub subject_preview: String,
    pub priority: Priority,
    pub thread_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub timestamp: i64,
}

impl NotifyEvent {
    pub fn preview(subject: &str) -> String {
        subject.chars().take(PREVIEW_LEN).collect()
    }
}

struct Sink {
    id: u64,
    tx: mpsc::Sender<NotifyEvent>,
    dropped: Arc<AtomicU64>,
}

#[derive(Default)]
struct HubInner {
    by_agent: HashMap<String, Vec<Sink>>,
    by_topic: HashMap<String, Vec<Sink>>,
}

pub struct NotificationHub {
    inner: Arc<Mutex<HubInner>>,
    next_id: AtomicU64,
    total_dropped: Arc<AtomicU64>,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationHub {
    pub fn new() -> Self {
        NotificationHub {
            inner: Arc::new(Mutex::new(HubInner::default())),
            next_id: AtomicU64::new(1),
            total_dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a sink for one agent's push inbox. The returned handle
    /// unsubscribes on drop.
    pub fn subscribe_agent(&self, agent: &str) -> Subscription {
        self.subscribe(SubKey::Agent(agent.to_string()))
    }

    /// Register a sink for every event published to a topic.
    pub fn subscribe_topic(&self, topic: &str) -> Subscription {
        self.subscribe(SubKey::Topic(topic.to_string()))
    }

    fn subscribe(&self, key: SubKey) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SINK_CAPACITY);
        let dropped = Arc::new(AtomicU64::new(0));
        let sink = Sink {
            id,
            tx,
            dropped: Arc::clone(&dropped),
        };
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            match &key {
                SubKey::Agent(a) => inner.by_agent.entry(a.clone()).or_default().push(sink),
                SubKey::Topic(t) => inner.by_topic.entry(t.clone()).or_default().push(sink),
            }
        }
        Subscription {
            id,
            key,
            rx,
            dropped,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Fan an event out to the recipient's subscribers and, when the
    /// message came through a topic, to that topic's subscribers. Never
    /// blocks; saturated sinks drop and count.
    pub fn publish(&self, event: &NotifyEvent) {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sinks) = inner.by_agent.get(&event.recipient) {
            self.emit(sinks, event);
        }
        if let Some(topic) = &event.topic
            && let Some(sinks) = inner.by_topic.get(topic)
        {
            self.emit(sinks, event);
        }
    }

    fn emit(&self, sinks: &[Sink], event: &NotifyEvent) {
        for sink in sinks {
            if sink.tx.try_send(event.clone()).is_err() {
                sink.dropped.fetch_add(1, Ordering::Relaxed);
                self.total_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    subscriber = sink.id,
                    recipient = %event.recipient,
                    "push sink saturated, event dropped"
                );
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.by_agent.values().map(Vec::len).sum::<usize>()
            + inner.by_topic.values().map(Vec::len).sum::<usize>()
    }

    pub fn dropped_count(&self) -> u64 {
        self.total_dropped.load(Ordering::Relaxed)
    }
}

enum SubKey {
    Agent(String),
    Topic(String),
}

/// Live subscription handle. Receive with [`Subscription::recv`]; dropping
/// the handle unsubscribes and closes the sink.
pub struct Subscription {
    id: u64,
    key: SubKey,
    rx: mpsc::Receiver<NotifyEvent>,
    dropped: Arc<AtomicU64>,
    inner: Arc<Mutex<HubInner>>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<NotifyEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<NotifyEvent> {
        self.rx.try_recv().ok()
    }

    /// Events dropped for this subscriber because its sink was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let (map, key) = match &self.key {
            SubKey::Agent(a) => (&mut inner.by_agent, a.clone()),
            SubKey::Topic(t) => (&mut inner.by_topic, t.clone()),
        };
        if let Some(sinks) = map.get_mut(&key) {
            sinks.retain(|s| s.id != self.id);
            if sinks.is_empty() {
                map.remove(&key);
            }
        }
    }
}
