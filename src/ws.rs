//! WebSocket push: connection registry, message envelopes, and the
//! snapshot reader pool behind the periodic `agent_update` / `activity` /
//! `unread_count` frames. The route-side select loop lives in
//! `routes::stream`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::actor::{Actor, Pool, Reply, respond};
use crate::activity;
use crate::db::Db;
use crate::error::Result;
use crate::identity;
use crate::mail;

pub const AGENT_UPDATE_INTERVAL: Duration = Duration::from_secs(15);
pub const ACTIVITY_INTERVAL: Duration = Duration::from_secs(10);
pub const UNREAD_INTERVAL: Duration = Duration::from_secs(5);

/// Workers in the snapshot reader pool.
pub const SNAPSHOT_WORKERS: usize = 4;

/// Wire envelope: `{"type": ..., "payload": ...}`.
pub fn envelope(kind: &str, payload: serde_json::Value) -> String {
    serde_json::json!({"type": kind, "payload": payload}).to_string()
}

/// Live connection table. One entry per socket, bound to an agent at
/// handshake; registration is the only write path, so a plain lock does.
/// Clones share the table, so a handle can move into a socket task.
#[derive(Clone)]
pub struct WsHub {
    connections: Arc<Mutex<HashMap<u64, String>>>,
    next_id: Arc<AtomicU64>,
}

impl Default for WsHub {
    fn default() -> Self {
        Self::new()
    }
}

impl WsHub {
    pub fn new() -> Self {
        WsHub {
            connections: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn register(&self, agent: &str) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, agent.to_string());
        tracing::debug!(connection = id, %agent, "websocket connected");
        id
    }

    pub fn unregister(&self, id: u64) {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        tracing::debug!(connection = id, "websocket disconnected");
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

// --- Snapshot reader pool ---

pub enum SnapshotMsg {
    AgentUpdate(Reply<serde_json::Value>),
    Activity(Reply<serde_json::Value>),
    UnreadCount {
        agent: String,
        reply: Reply<serde_json::Value>,
    },
}

/// Read-only worker computing push snapshots, pooled so one slow query
/// never stalls every connected socket.
pub struct SnapshotActor {
    db: Db,
}

impl SnapshotActor {
    pub fn new(db: Db) -> Self {
        SnapshotActor { db }
    }

    fn agent_update(&self) -> Result<serde_json::Value> {
        let agents = identity::list_agents(&self.db, None)?;
        Ok(serde_json::json!({"agents": agents}))
    }

    fn activity(&self) -> Result<serde_json::Value> {
        let entries = activity::list_activities(&self.db, None, None, 50)?;
        Ok(serde_json::json!({"entries": entries}))
    }

    fn unread(&self, agent: &str) -> Result<serde_json::Value> {
        let unread = mail::unread_count(&self.db, agent)?;
        Ok(serde_json::json!({"agent": agent, "unread": unread}))
    }
}

#[async_trait]
impl Actor for SnapshotActor {
    type Msg = SnapshotMsg;

    async fn handle(&mut self, msg: SnapshotMsg) {
        match msg {
            SnapshotMsg::AgentUpdate(reply) => respond(reply, self.agent_update()),
            SnapshotMsg::Activity(reply) => respond(reply, self.activity()),
            SnapshotMsg::UnreadCount { agent, reply } => respond(reply, self.unread(&agent)),
        }
    }

    fn name(&self) -> &'static str {
        "snapshot"
    }
}

pub type SnapshotPool = Arc<Pool<SnapshotMsg>>;

/// Bind the reader pool at build time; the returned tasks are spawned at
/// liftoff alongside the other actors.
pub fn prepare_snapshot_pool(db: &Db) -> (SnapshotPool, Vec<crate::actor::ActorTask>) {
    Pool::prepare(SNAPSHOT_WORKERS, |_| SnapshotActor::new(db.clone()))
}

pub fn spawn_snapshot_pool(db: &Db) -> SnapshotPool {
    Pool::spawn(SNAPSHOT_WORKERS, |_| SnapshotActor::new(db.clone()))
}
