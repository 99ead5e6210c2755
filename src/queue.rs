//! Client-side store-and-forward queue.
//!
//! Write operations issued by clients that may be disconnected from the
//! daemon fall through three tiers: RPC to the running core, a direct
//! connection to the backing store on the same host, and finally an
//! append-only on-disk log. A later exclusive `drain` replays the log
//! through tier one in FIFO order; idempotency keys let the server reject
//! duplicates. Reads are never queued.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::activity::{self, ActivityActor};
use crate::actor;
use crate::db::{self, Db};
use crate::error::{Error, Result};
use crate::identity;
use crate::mail::MailActor;
use crate::models::{Priority, SendMail, StateAction};
use crate::notify::NotificationHub;

const DEFAULT_TTL_SECS: i64 = 24 * 60 * 60;

/// Operations whose intent is "apply this change". Everything else goes
/// straight to the server or fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "snake_case")]
pub enum QueueOp {
    Send {
        sender: String,
        recipients: Vec<String>,
        subject: String,
        body: String,
        #[serde(default)]
        priority: Priority,
        #[serde(default)]
        thread_id: Option<String>,
        #[serde(default)]
        deadline_at: Option<i64>,
    },
    UpdateState {
        agent: String,
        message_id: String,
        action: String,
        #[serde(default)]
        snooze_until: Option<i64>,
    },
    Ack {
        agent: String,
        message_id: String,
    },
    Heartbeat {
        agent: String,
        #[serde(default)]
        session_start: bool,
        #[serde(default)]
        session_id: Option<String>,
    },
    Activity {
        #[serde(default)]
        agent: Option<String>,
        kind: String,
        description: String,
    },
}

/// One line of the on-disk log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    #[serde(flatten)]
    pub op: QueueOp,
    pub idempotency_key: String,
    pub enqueued_at: i64,
    pub ttl_seconds: i64,
    pub attempts: i64,
}

impl QueueEntry {
    pub fn expired(&self, now: i64) -> bool {
        now >= self.enqueued_at + self.ttl_seconds
    }
}

/// How a submission was ultimately applied.
#[derive(Debug)]
pub enum Submission {
    Rpc(serde_json::Value),
    Direct(serde_json::Value),
    Queued { idempotency_key: String },
}

#[derive(Debug, Default, Serialize)]
pub struct DrainStats {
    pub replayed: usize,
    pub purged_expired: usize,
    pub remaining: usize,
}

#[derive(Debug, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub expired: usize,
    pub oldest_enqueued_at: Option<i64>,
    pub total_attempts: i64,
}

/// Fixed per-user queue location, overridable through `QUEUE_PATH`.
pub fn default_queue_path() -> PathBuf {
    if let Ok(path) = std::env::var("QUEUE_PATH") {
        return PathBuf::from(path);
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("local-agent-mail")
        .join("queue.jsonl")
}

pub struct QueueClient {
    api_base: String,
    db_path: Option<String>,
    queue_path: PathBuf,
    ttl_seconds: i64,
    http: reqwest::Client,
}

impl QueueClient {
    pub fn new(api_base: impl Into<String>, db_path: Option<String>) -> Self {
        QueueClient {
            api_base: api_base.into(),
            db_path,
            queue_path: default_queue_path(),
            ttl_seconds: std::env::var("QUEUE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_TTL_SECS),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_queue_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.queue_path = path.into();
        self
    }

    /// Apply a write, falling through the tiers. The idempotency key is
    /// minted here, on the first attempt, and rides along every retry.
    pub async fn submit(&self, op: QueueOp) -> Result<Submission> {
        let idempotency_key = uuid::Uuid::new_v4().to_string();

        match self.try_rpc(&op, &idempotency_key).await {
            Ok(value) => return Ok(Submission::Rpc(value)),
            Err(Error::Unavailable(reason)) => {
                tracing::debug!(%reason, "core unreachable, trying direct storage");
            }
            Err(definitive) => return Err(definitive),
        }

        if let Some(db_path) = &self.db_path
            && Path::new(db_path).exists()
        {
            match self.apply_direct(db_path, &op, &idempotency_key).await {
                Ok(value) => return Ok(Submission::Direct(value)),
                Err(e) => {
                    tracing::debug!(error = %e, "direct storage failed, queueing locally");
                }
            }
        }

        self.enqueue(op, &idempotency_key)?;
        Ok(Submission::Queued { idempotency_key })
    }

    /// Tier 1: the running core's JSON API. Transport failures and 5xx
    /// responses are retryable; 4xx responses are definitive.
    async fn try_rpc(&self, op: &QueueOp, idempotency_key: &str) -> Result<serde_json::Value> {
        let (path, mut body) = rpc_call(op);
        if let serde_json::Value::Object(map) = &mut body {
            map.insert(
                "idempotency_key".to_string(),
                serde_json::Value::String(idempotency_key.to_string()),
            );
        }
        let url = format!("{}{}", self.api_base, path);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;

        let status = response.status();
        let value: serde_json::Value = response.json().await.unwrap_or(serde_json::json!({}));
        if status.is_success() {
            Ok(value)
        } else if status.is_server_error() || status.as_u16() == 503 {
            Err(Error::Unavailable(format!("server returned {status}")))
        } else {
            let message = value
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("request rejected");
            Err(Error::invalid(format!("{status}: {message}")))
        }
    }

    /// Tier 2: open the store directly and run the operation through the
    /// same mail-actor code path the daemon uses.
    async fn apply_direct(
        &self,
        db_path: &str,
        op: &QueueOp,
        idempotency_key: &str,
    ) -> Result<serde_json::Value> {
        let db = Db::new(db_path);
        let value = match op {
            QueueOp::Send {
                sender,
                recipients,
                subject,
                body,
                priority,
                thread_id,
                deadline_at,
            } => {
                let mut mail = offline_mail_actor(&db);
                let receipt = mail.do_send(SendMail {
                    sender: sender.clone(),
                    recipients: recipients.clone(),
                    subject: subject.clone(),
                    body: body.clone(),
                    priority: *priority,
                    thread_id: thread_id.clone(),
                    parent_id: None,
                    deadline_at: *deadline_at,
                    metadata: None,
                    idempotency_key: Some(idempotency_key.to_string()),
                })?;
                serde_json::to_value(receipt).unwrap_or_default()
            }
            QueueOp::UpdateState {
                agent,
                message_id,
                action,
                snooze_until,
            } => {
                let mut mail = offline_mail_actor(&db);
                let action = StateAction::parse(action)?;
                let view = mail.do_update_state(agent, message_id, action, *snooze_until)?;
                serde_json::to_value(view).unwrap_or_default()
            }
            QueueOp::Ack { agent, message_id } => {
                let mut mail = offline_mail_actor(&db);
                let view = mail.do_ack(agent, message_id)?;
                serde_json::to_value(view).unwrap_or_default()
            }
            QueueOp::Heartbeat {
                agent,
                session_start,
                session_id,
            } => {
                let at = identity::heartbeat(&db, agent, *session_start, session_id.as_deref())?;
                serde_json::json!({"last_active_at": at})
            }
            QueueOp::Activity {
                agent,
                kind,
                description,
            } => {
                activity::append(&db, agent.as_deref(), kind, description, None, 10_000)?;
                serde_json::json!({"recorded": true})
            }
        };
        Ok(value)
    }

    /// Tier 3: append to the local log.
    fn enqueue(&self, op: QueueOp, idempotency_key: &str) -> Result<()> {
        if let Some(parent) = self.queue_path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::internal(e.to_string()))?;
        }
        let entry = QueueEntry {
            op,
            idempotency_key: idempotency_key.to_string(),
            enqueued_at: db::now(),
            ttl_seconds: self.ttl_seconds,
            attempts: 0,
        };
        let line = serde_json::to_string(&entry).map_err(|e| Error::internal(e.to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.queue_path)
            .map_err(|e| Error::internal(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| Error::internal(e.to_string()))?;
        tracing::info!(path = %self.queue_path.display(), "operation queued locally");
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<QueueEntry>> {
        read_entries(&self.queue_path)
    }

    pub fn stats(&self) -> Result<QueueStats> {
        let entries = read_entries(&self.queue_path)?;
        let now = db::now();
        let expired = entries.iter().filter(|e| e.expired(now)).count();
        Ok(QueueStats {
            pending: entries.len() - expired,
            expired,
            oldest_enqueued_at: entries.iter().map(|e| e.enqueued_at).min(),
            total_attempts: entries.iter().map(|e| e.attempts).sum(),
        })
    }

    /// Replay queued operations through tier one, oldest first. At most
    /// one drainer runs per queue file (advisory lock); expired entries
    /// are purged; the first replay failure stops the drain so order is
    /// preserved for the rest.
    pub async fn drain(&self) -> Result<DrainStats> {
        if !self.queue_path.exists() {
            return Ok(DrainStats::default());
        }
        let lock_path = self.queue_path.with_extension("lock");
        let lock_file = File::create(&lock_path).map_err(|e| Error::internal(e.to_string()))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| Error::Unavailable("another drain is in progress".to_string()))?;

        let entries = read_entries(&self.queue_path)?;
        let now = db::now();
        let mut stats = DrainStats::default();
        let mut remaining: Vec<QueueEntry> = Vec::new();
        let mut stopped = false;

        for mut entry in entries {
            if entry.expired(now) {
                stats.purged_expired += 1;
                continue;
            }
            if stopped {
                remaining.push(entry);
                continue;
            }
            match self.try_rpc(&entry.op, &entry.idempotency_key).await {
                Ok(_) => stats.replayed += 1,
                Err(Error::Unavailable(reason)) => {
                    tracing::warn!(%reason, "drain interrupted, keeping remaining entries");
                    entry.attempts += 1;
                    remaining.push(entry);
                    stopped = true;
                }
                Err(definitive) => {
                    // The server rejected the operation outright; keeping
                    // it would wedge the queue forever.
                    tracing::warn!(error = %definitive, "dropping rejected queue entry");
                    stats.purged_expired += 1;
                }
            }
        }

        stats.remaining = remaining.len();
        rewrite_queue(&self.queue_path, &remaining)?;
        fs2::FileExt::unlock(&lock_file).ok();
        fs::remove_file(&lock_path).ok();
        Ok(stats)
    }
}

fn offline_mail_actor(db: &Db) -> MailActor {
    let hub = Arc::new(NotificationHub::new());
    let activity = actor::spawn(ActivityActor::new(db.clone(), 10_000));
    MailActor::new(db.clone(), hub, activity, 300)
}

fn rpc_call(op: &QueueOp) -> (&'static str, serde_json::Value) {
    match op {
        QueueOp::Send {
            sender,
            recipients,
            subject,
            body,
            priority,
            thread_id,
            deadline_at,
        } => (
            "/api/v1/messages",
            serde_json::json!({
                "sender": sender,
                "recipients": recipients,
                "subject": subject,
                "body": body,
                "priority": priority,
                "thread_id": thread_id,
                "deadline_at": deadline_at,
            }),
        ),
        QueueOp::UpdateState {
            agent,
            message_id,
            action,
            snooze_until,
        } => (
            "/api/v1/messages/state",
            serde_json::json!({
                "agent": agent,
                "message_id": message_id,
                "action": action,
                "snooze_until": snooze_until,
            }),
        ),
        QueueOp::Ack { agent, message_id } => (
            "/api/v1/messages/ack",
            serde_json::json!({"agent": agent, "message_id": message_id}),
        ),
        QueueOp::Heartbeat {
            agent,
            session_start,
            session_id,
        } => (
            "/api/v1/agents/heartbeat",
            serde_json::json!({
                "agent": agent,
                "session_start": session_start,
                "session_id": session_id,
            }),
        ),
        QueueOp::Activity {
            agent,
            kind,
            description,
        } => (
            "/api/v1/activity",
            serde_json::json!({"agent": agent, "kind": kind, "description": description}),
        ),
    }
}

fn read_entries(path: &Path) -> Result<Vec<QueueEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).map_err(|e| Error::internal(e.to_string()))?;
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| Error::internal(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => tracing::warn!(error = %e, "skipping corrupt queue entry"),
        }
    }
    Ok(entries)
}

/// Rewrite the log crash-safely: write a temp file, then rename over.
fn rewrite_queue(path: &Path, entries: &[QueueEntry]) -> Result<()> {
    if entries.is_empty() {
        fs::remove_file(path).ok();
        return Ok(());
    }
    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp).map_err(|e| Error::internal(e.to_string()))?;
    for entry in entries {
        let line = serde_json::to_string(entry).map_err(|e| Error::internal(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| Error::internal(e.to_string()))?;
    }
    fs::rename(&tmp, path).map_err(|e| Error::internal(e.to_string()))?;
    Ok(())
}
