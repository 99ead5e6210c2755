//! Mail service: the single serialized owner of all message and
//! recipient-row writes, plus the read-path query functions that bypass
//! the actor entirely.
//!
//! Every mutation flows through [`MailActor`]'s mailbox, so conflicting
//! operations on one recipient row resolve in a total order. The
//! notification and activity emits happen after the transaction commits
//! but before the store lock is released, so a subscriber that reads the
//! store after receiving an event always observes the write.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};

use crate::actor::{Actor, Addr, Reply, respond};
use crate::activity::{self, ActivityMsg};
use crate::db::{self, Db};
use crate::error::{Error, Result};
use crate::identity::{self, resolve_agent_id};
use crate::models::*;
use crate::notify::{NotificationHub, NotifyEvent};
use std::sync::Arc;

/// Longest wait a long-poll may request (bounded by the hook-execution
/// timeout of the agent host).
pub const MAX_POLL_WAIT: Duration = Duration::from_secs(570);

/// Offset key used for messages that arrived outside any topic.
pub const DIRECT_OFFSET_KEY: &str = "inbox";

const SUBJECT_MAX: usize = 500;
const BODY_MAX: usize = 100_000;

// --- Actor messages ---

#[derive(Debug, Clone, Copy)]
pub enum ThreadOp {
    Archive,
    Delete,
    MarkUnread,
}

pub enum MailMsg {
    Send(SendMail, Reply<SendReceipt>),
    Publish {
        topic: String,
        req: PublishMail,
        reply: Reply<SendReceipt>,
    },
    ReplyThread {
        thread_id: String,
        req: ReplyToThread,
        reply: Reply<SendReceipt>,
    },
    UpdateState {
        agent: String,
        message_id: String,
        action: StateAction,
        snooze_until: Option<i64>,
        reply: Reply<RecipientStateView>,
    },
    Ack {
        agent: String,
        message_id: String,
        reply: Reply<RecipientStateView>,
    },
    ReadMessage {
        agent: String,
        message_id: String,
        reply: Reply<InboxMessage>,
    },
    ThreadOp {
        agent: String,
        thread_id: String,
        op: ThreadOp,
        reply: Reply<i64>,
    },
    Sweep,
}

// --- The actor ---

pub struct MailActor {
    db: Db,
    hub: Arc<NotificationHub>,
    activity: Addr<ActivityMsg>,
    dedup_window_secs: i64,
    /// Topic rows are immutable after creation, so a name cache never
    /// goes stale. Subscriber lists are always read fresh at publish.
    topic_cache: HashMap<String, (String, TopicKind)>,
}

#[async_trait]
impl Actor for MailActor {
    type Msg = MailMsg;

    async fn handle(&mut self, msg: MailMsg) {
        match msg {
            MailMsg::Send(req, reply) => respond(reply, self.do_send(req)),
            MailMsg::Publish { topic, req, reply } => respond(reply, self.do_publish(&topic, req)),
            MailMsg::ReplyThread {
                thread_id,
                req,
                reply,
            } => respond(reply, self.do_reply_thread(&thread_id, req)),
            MailMsg::UpdateState {
                agent,
                message_id,
                action,
                snooze_until,
                reply,
            } => respond(
                reply,
                self.do_update_state(&agent, &message_id, action, snooze_until),
            ),
            MailMsg::Ack {
                agent,
                message_id,
                reply,
            } => respond(reply, self.do_ack(&agent, &message_id)),
            MailMsg::ReadMessage {
                agent,
                message_id,
                reply,
            } => respond(reply, self.do_read_message(&agent, &message_id)),
            MailMsg::ThreadOp {
                agent,
                thread_id,
                op,
                reply,
            } => respond(reply, self.do_thread_op(&agent, &thread_id, op)),
            MailMsg::Sweep => self.do_sweep(),
        }
    }

    fn name(&self) -> &'static str {
        "mail"
    }
}

impl MailActor {
    pub fn new(
        db: Db,
        hub: Arc<NotificationHub>,
        activity: Addr<ActivityMsg>,
        dedup_window_secs: i64,
    ) -> Self {
        MailActor {
            db,
            hub,
            activity,
            dedup_window_secs,
            topic_cache: HashMap::new(),
        }
    }

    // --- Send ---

    pub(crate) fn do_send(&mut self, req: SendMail) -> Result<SendReceipt> {
        validate_content(&req.subject, &req.body)?;
        if req.recipients.is_empty() {
            return Err(Error::invalid("at least one recipient is required"));
        }

        let mut conn = self.db.conn();
        if let Some(receipt) =
            check_idempotency(&conn, req.idempotency_key.as_deref(), self.dedup_window_secs)?
        {
            return Ok(receipt);
        }

        let tx = conn.transaction()?;
        let sender_id = resolve_agent_id(&tx, &req.sender)?;

        // Resolve every recipient before writing anything; a miss fails
        // the whole send.
        let mut recipient_ids = Vec::new();
        let mut seen = HashSet::new();
        for name in &req.recipients {
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::invalid("recipient name must not be empty"));
            }
            let id = resolve_agent_id(&tx, name)?;
            if seen.insert(id.clone()) {
                recipient_ids.push((id, name.to_string()));
            }
        }

        let message_id = db::new_id();
        let thread_id = resolve_thread(&tx, &message_id, &req.thread_id, &req.parent_id)?;
        let now = db::now();
        insert_message(
            &tx,
            &message_id,
            &sender_id,
            None,
            &req.subject,
            &req.body,
            req.priority,
            &thread_id,
            req.parent_id.as_deref(),
            req.deadline_at,
            req.metadata.as_ref(),
            now,
        )?;

        for (agent_id, _) in &recipient_ids {
            insert_recipient(&tx, &message_id, agent_id, now)?;
        }
        record_idempotency(&tx, req.idempotency_key.as_deref(), &message_id, &thread_id, now)?;
        db::upsert_fts(&tx, &message_id);
        tx.commit()?;

        let events: Vec<NotifyEvent> = recipient_ids
            .iter()
            .map(|(_, name)| NotifyEvent {
                message_id: message_id.clone(),
                recipient: name.clone(),
                sender: req.sender.clone(),
                subject_preview: NotifyEvent::preview(&req.subject),
                priority: req.priority,
                thread_id: thread_id.clone(),
                topic: None,
                timestamp: now,
            })
            .collect();
        let delivered_to = events.len() as i64;
        self.emit(&events);
        activity::record(
            &self.activity,
            Some(&req.sender),
            activity::KIND_MESSAGE_SENT,
            format!("sent '{}' to {} recipient(s)", req.subject, delivered_to),
            Some(serde_json::json!({"message_id": message_id, "thread_id": thread_id})),
        );

        Ok(SendReceipt {
            message_id,
            thread_id,
            delivered_to,
        })
    }

    // --- Publish ---

    fn do_publish(&mut self, topic_name: &str, req: PublishMail) -> Result<SendReceipt> {
        validate_content(&req.subject, &req.body)?;
        let (topic_id, kind) = self.lookup_topic(topic_name)?;
        if kind == TopicKind::Direct {
            return Err(Error::invalid("cannot publish to a direct topic"));
        }

        let mut conn = self.db.conn();
        if let Some(receipt) =
            check_idempotency(&conn, req.idempotency_key.as_deref(), self.dedup_window_secs)?
        {
            return Ok(receipt);
        }

        let tx = conn.transaction()?;
        let sender_id = resolve_agent_id(&tx, &req.sender)?;

        // Subscriber lists are read fresh inside the publish transaction;
        // a subscription change either lands before or after this publish,
        // never halfway.
        let subscribers: Vec<(String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT a.id, a.name FROM subscriptions s
                 JOIN agents a ON a.id = s.agent_id
                 WHERE s.topic_id = ?1 AND a.deleted_at IS NULL
                 ORDER BY s.created_at, a.name",
            )?;
            let rows = stmt.query_map(params![&topic_id], |r| Ok((r.get(0)?, r.get(1)?)))?;
            rows.filter_map(|r| r.ok())
                .filter(|(id, _): &(String, String)| *id != sender_id)
                .collect()
        };

        let chosen: Vec<(String, String)> = match kind {
            TopicKind::Broadcast => subscribers,
            TopicKind::Queue => {
                if subscribers.is_empty() {
                    Vec::new()
                } else {
                    let cursor: i64 = tx.query_row(
                        "SELECT rr_cursor FROM topics WHERE id = ?1",
                        params![&topic_id],
                        |r| r.get(0),
                    )?;
                    let pick = subscribers[(cursor as usize) % subscribers.len()].clone();
                    tx.execute(
                        "UPDATE topics SET rr_cursor = ?1 WHERE id = ?2",
                        params![cursor + 1, &topic_id],
                    )?;
                    vec![pick]
                }
            }
            TopicKind::Direct => unreachable!(),
        };

        let message_id = db::new_id();
        let now = db::now();
        insert_message(
            &tx,
            &message_id,
            &sender_id,
            Some(&topic_id),
            &req.subject,
            &req.body,
            req.priority,
            &message_id,
            None,
            None,
            None,
            now,
        )?;
        for (agent_id, _) in &chosen {
            insert_recipient(&tx, &message_id, agent_id, now)?;
        }
        record_idempotency(&tx, req.idempotency_key.as_deref(), &message_id, &message_id, now)?;
        db::upsert_fts(&tx, &message_id);
        tx.commit()?;

        let events: Vec<NotifyEvent> = chosen
            .iter()
            .map(|(_, name)| NotifyEvent {
                message_id: message_id.clone(),
                recipient: name.clone(),
                sender: req.sender.clone(),
                subject_preview: NotifyEvent::preview(&req.subject),
                priority: req.priority,
                thread_id: message_id.clone(),
                topic: Some(topic_name.to_string()),
                timestamp: now,
            })
            .collect();
        let delivered_to = events.len() as i64;
        self.emit(&events);
        activity::record(
            &self.activity,
            Some(&req.sender),
            activity::KIND_MESSAGE_SENT,
            format!("published '{}' to {topic_name} ({delivered_to} delivered)", req.subject),
            Some(serde_json::json!({"message_id": message_id, "topic": topic_name})),
        );

        Ok(SendReceipt {
            message_id: message_id.clone(),
            thread_id: message_id,
            delivered_to,
        })
    }

    // --- Reply to thread ---

    fn do_reply_thread(&mut self, thread_id: &str, req: ReplyToThread) -> Result<SendReceipt> {
        let (participants, root_subject) = {
            let conn = self.db.conn();
            let participants = thread_participants(&conn, thread_id)?;
            if participants.is_empty() {
                return Err(Error::not_found(format!("thread '{thread_id}'")));
            }
            let root_subject: Option<String> = conn
                .query_row(
                    "SELECT subject FROM messages WHERE thread_id = ?1
                     ORDER BY created_at ASC, seq ASC LIMIT 1",
                    params![thread_id],
                    |r| r.get(0),
                )
                .optional()?;
            (participants, root_subject)
        };

        let recipients: Vec<String> = participants
            .into_iter()
            .filter(|name| name != &req.sender)
            .collect();
        if recipients.is_empty() {
            return Err(Error::invalid("thread has no other participants to reply to"));
        }

        let subject = req
            .subject
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| {
                let root = root_subject.unwrap_or_default();
                if root.starts_with("Re: ") {
                    root
                } else {
                    format!("Re: {root}")
                }
            });

        self.do_send(SendMail {
            sender: req.sender,
            recipients,
            subject,
            body: req.body,
            priority: req.priority,
            thread_id: Some(thread_id.to_string()),
            parent_id: None,
            deadline_at: None,
            metadata: None,
            idempotency_key: req.idempotency_key,
        })
    }

    // --- Recipient state ---

    pub(crate) fn do_update_state(
        &mut self,
        agent: &str,
        message_id: &str,
        action: StateAction,
        snooze_until: Option<i64>,
    ) -> Result<RecipientStateView> {
        let view = {
            let mut conn = self.db.conn();
            let tx = conn.transaction()?;
            let agent_id = resolve_agent_id(&tx, agent)?;
            let row = load_recipient(&tx, message_id, &agent_id)?;
            let now = db::now();

            match action {
                StateAction::Transition(event) => {
                    let next = row.state.transition(event)?;
                    tx.execute(
                        "UPDATE message_recipients SET state = ?1, updated_at = ?2
                         WHERE message_id = ?3 AND agent_id = ?4",
                        params![next.as_str(), now, message_id, &agent_id],
                    )?;
                }
                StateAction::Read => {
                    if row.state == RecipientState::Deleted {
                        return Err(Error::invalid("message is deleted"));
                    }
                    tx.execute(
                        "UPDATE message_recipients SET read_at = COALESCE(read_at, ?1), updated_at = ?1
                         WHERE message_id = ?2 AND agent_id = ?3",
                        params![now, message_id, &agent_id],
                    )?;
                }
                StateAction::MarkUnread => {
                    tx.execute(
                        "UPDATE message_recipients SET read_at = NULL, updated_at = ?1
                         WHERE message_id = ?2 AND agent_id = ?3",
                        params![now, message_id, &agent_id],
                    )?;
                }
                StateAction::Snooze => {
                    if row.state != RecipientState::Inbox {
                        return Err(Error::invalid("only inbox messages can be snoozed"));
                    }
                    let until = snooze_until
                        .ok_or_else(|| Error::invalid("snooze requires snooze_until"))?;
                    if until <= now {
                        return Err(Error::invalid("snooze_until must be in the future"));
                    }
                    tx.execute(
                        "UPDATE message_recipients SET snoozed_until = ?1, updated_at = ?2
                         WHERE message_id = ?3 AND agent_id = ?4",
                        params![until, now, message_id, &agent_id],
                    )?;
                }
                StateAction::Star | StateAction::Unstar => {
                    let flag = matches!(action, StateAction::Star) as i64;
                    tx.execute(
                        "UPDATE message_recipients SET starred = ?1, updated_at = ?2
                         WHERE message_id = ?3 AND agent_id = ?4",
                        params![flag, now, message_id, &agent_id],
                    )?;
                }
            }

            let view = load_recipient(&tx, message_id, &agent_id)?;
            tx.commit()?;
            view
        };

        activity::record(
            &self.activity,
            Some(agent),
            activity::KIND_STATE_CHANGED,
            format!("message {} is now {}", message_id, view.state.as_str()),
            None,
        );
        Ok(view)
    }

    pub(crate) fn do_ack(&mut self, agent: &str, message_id: &str) -> Result<RecipientStateView> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        let agent_id = resolve_agent_id(&tx, agent)?;
        let row = load_recipient(&tx, message_id, &agent_id)?;

        let deadline: Option<i64> = tx.query_row(
            "SELECT deadline_at FROM messages WHERE id = ?1",
            params![message_id],
            |r| r.get(0),
        )?;
        if deadline.is_none() {
            return Err(Error::invalid("message has no deadline to acknowledge"));
        }
        if row.acked_at.is_some() {
            return Ok(row);
        }
        let now = db::now();
        tx.execute(
            "UPDATE message_recipients SET acked_at = ?1, updated_at = ?1
             WHERE message_id = ?2 AND agent_id = ?3",
            params![now, message_id, &agent_id],
        )?;
        let view = load_recipient(&tx, message_id, &agent_id)?;
        tx.commit()?;
        Ok(view)
    }

    fn do_read_message(&mut self, agent: &str, message_id: &str) -> Result<InboxMessage> {
        let message = {
            let mut conn = self.db.conn();
            let tx = conn.transaction()?;
            let agent_id = resolve_agent_id(&tx, agent)?;
            let row = load_recipient(&tx, message_id, &agent_id)?;
            if row.state == RecipientState::Deleted {
                return Err(Error::not_found(format!("message '{message_id}'")));
            }
            tx.execute(
                "UPDATE message_recipients SET read_at = COALESCE(read_at, ?1), updated_at = ?1
                 WHERE message_id = ?2 AND agent_id = ?3",
                params![db::now(), message_id, &agent_id],
            )?;
            let message = load_message_for(&tx, message_id, &agent_id)?;
            tx.commit()?;
            message
        };
        activity::record(
            &self.activity,
            Some(agent),
            activity::KIND_MESSAGE_READ,
            format!("read '{}'", message.subject),
            None,
        );
        Ok(message)
    }

    fn do_thread_op(&mut self, agent: &str, thread_id: &str, op: ThreadOp) -> Result<i64> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        let agent_id = resolve_agent_id(&tx, agent)?;
        let now = db::now();
        let affected = match op {
            ThreadOp::Archive => tx.execute(
                "UPDATE message_recipients SET state = 'archived', updated_at = ?1
                 WHERE agent_id = ?2 AND state IN ('inbox', 'trash')
                   AND message_id IN (SELECT id FROM messages WHERE thread_id = ?3)",
                params![now, &agent_id, thread_id],
            )?,
            ThreadOp::Delete => tx.execute(
                "UPDATE message_recipients SET state = 'deleted', updated_at = ?1
                 WHERE agent_id = ?2 AND state != 'deleted'
                   AND message_id IN (SELECT id FROM messages WHERE thread_id = ?3)",
                params![now, &agent_id, thread_id],
            )?,
            ThreadOp::MarkUnread => tx.execute(
                "UPDATE message_recipients SET read_at = NULL, updated_at = ?1
                 WHERE agent_id = ?2 AND state != 'deleted'
                   AND message_id IN (SELECT id FROM messages WHERE thread_id = ?3)",
                params![now, &agent_id, thread_id],
            )?,
        };
        tx.commit()?;
        Ok(affected as i64)
    }

    // --- Snooze wake sweep + topic retention ---

    fn do_sweep(&mut self) {
        if let Err(e) = self.wake_snoozed() {
            tracing::warn!(error = %e, "snooze sweep failed");
        }
        if let Err(e) = self.purge_expired_topic_messages() {
            tracing::warn!(error = %e, "topic retention sweep failed");
        }
    }

    /// Wake snoozed rows whose time has come. Snooze never changed the
    /// state, so waking only clears the timestamp and re-notifies; the
    /// clear guarantees at most one wake per snooze.
    fn wake_snoozed(&mut self) -> Result<()> {
        let woken: Vec<NotifyEvent> = {
            let mut conn = self.db.conn();
            let tx = conn.transaction()?;
            let now = db::now();
            let due: Vec<(String, String)> = {
                let mut stmt = tx.prepare(
                    "SELECT message_id, agent_id FROM message_recipients
                     WHERE snoozed_until IS NOT NULL AND snoozed_until <= ?1 AND state = 'inbox'",
                )?;
                let rows = stmt.query_map(params![now], |r| Ok((r.get(0)?, r.get(1)?)))?;
                rows.filter_map(|r| r.ok()).collect()
            };
            let mut woken = Vec::new();
            for (message_id, agent_id) in &due {
                tx.execute(
                    "UPDATE message_recipients SET snoozed_until = NULL, updated_at = ?1
                     WHERE message_id = ?2 AND agent_id = ?3",
                    params![now, message_id, agent_id],
                )?;
                let detail: Option<(String, String, String, String, String)> = tx
                    .query_row(
                        "SELECT a.name, s.name, m.subject, m.thread_id, m.priority
                         FROM messages m
                         JOIN agents a ON a.id = ?1
                         JOIN agents s ON s.id = m.sender_id
                         WHERE m.id = ?2",
                        params![agent_id, message_id],
                        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
                    )
                    .optional()?;
                if let Some((recipient, sender, subject, thread_id, priority)) = detail {
                    woken.push(NotifyEvent {
                        message_id: message_id.clone(),
                        recipient,
                        sender,
                        subject_preview: NotifyEvent::preview(&subject),
                        priority: Priority::parse(&priority).unwrap_or_default(),
                        thread_id,
                        topic: None,
                        timestamp: now,
                    });
                }
            }
            tx.commit()?;
            woken
        };

        for event in woken {
            tracing::debug!(message_id = %event.message_id, recipient = %event.recipient, "snoozed message resurfaced");
            self.hub.publish(&event);
        }
        Ok(())
    }

    /// Topic retention: drop messages past a topic's max age or count, but
    /// only once every recipient row is a deleted tombstone.
    fn purge_expired_topic_messages(&mut self) -> Result<()> {
        let conn = self.db.conn();
        let topics: Vec<(String, Option<i64>, Option<i64>)> = {
            let mut stmt = conn.prepare(
                "SELECT id, max_messages, max_age_secs FROM topics
                 WHERE max_messages IS NOT NULL OR max_age_secs IS NOT NULL",
            )?;
            let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?;
            rows.filter_map(|r| r.ok()).collect()
        };
        for (topic_id, max_messages, max_age_secs) in topics {
            let mut purgeable: Vec<String> = Vec::new();
            if let Some(age) = max_age_secs {
                let cutoff = db::now() - age;
                let mut stmt = conn.prepare(
                    "SELECT m.id FROM messages m WHERE m.topic_id = ?1 AND m.created_at < ?2
                     AND NOT EXISTS (SELECT 1 FROM message_recipients r
                                     WHERE r.message_id = m.id AND r.state != 'deleted')",
                )?;
                let rows = stmt.query_map(params![&topic_id, cutoff], |r| r.get(0))?;
                purgeable.extend(rows.filter_map(|r| r.ok()));
            }
            if let Some(max) = max_messages {
                let mut stmt = conn.prepare(
                    "SELECT m.id FROM messages m WHERE m.topic_id = ?1
                     AND NOT EXISTS (SELECT 1 FROM message_recipients r
                                     WHERE r.message_id = m.id AND r.state != 'deleted')
                     ORDER BY m.seq DESC LIMIT -1 OFFSET ?2",
                )?;
                let rows = stmt.query_map(params![&topic_id, max], |r| r.get(0))?;
                purgeable.extend(rows.filter_map(|r| r.ok()));
            }
            purgeable.sort();
            purgeable.dedup();
            for id in &purgeable {
                db::delete_fts(&conn, id);
                conn.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
            }
            if !purgeable.is_empty() {
                tracing::info!(topic = %topic_id, purged = purgeable.len(), "topic retention purge");
            }
        }
        Ok(())
    }

    // --- Helpers ---

    fn lookup_topic(&mut self, name: &str) -> Result<(String, TopicKind)> {
        if let Some(hit) = self.topic_cache.get(name) {
            return Ok(hit.clone());
        }
        let conn = self.db.conn();
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT id, kind FROM topics WHERE name = ?1",
                params![name],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let (id, kind) = row.ok_or_else(|| Error::not_found(format!("topic '{name}'")))?;
        let kind = TopicKind::parse(&kind)?;
        self.topic_cache
            .insert(name.to_string(), (id.clone(), kind));
        Ok((id, kind))
    }

    fn emit(&self, events: &[NotifyEvent]) {
        for event in events {
            self.hub.publish(event);
        }
    }
}

// --- Shared write helpers (run inside the actor's transactions) ---

fn validate_content(subject: &str, body: &str) -> Result<()> {
    let subject = subject.trim();
    if subject.is_empty() || subject.len() > SUBJECT_MAX {
        return Err(Error::invalid(format!(
            "subject must be 1-{SUBJECT_MAX} characters"
        )));
    }
    if body.len() > BODY_MAX {
        return Err(Error::invalid(format!("body must be at most {BODY_MAX} characters")));
    }
    Ok(())
}

fn resolve_thread(
    conn: &Connection,
    message_id: &str,
    thread_id: &Option<String>,
    parent_id: &Option<String>,
) -> Result<String> {
    if let Some(t) = thread_id.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        return Ok(t.to_string());
    }
    if let Some(parent) = parent_id.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        let inherited: Option<String> = conn
            .query_row(
                "SELECT thread_id FROM messages WHERE id = ?1",
                params![parent],
                |r| r.get(0),
            )
            .optional()?;
        return inherited.ok_or_else(|| Error::not_found(format!("parent message '{parent}'")));
    }
    // Thread roots use their own id as the thread id.
    Ok(message_id.to_string())
}

#[allow(clippy::too_many_arguments)]
fn insert_message(
    conn: &Connection,
    id: &str,
    sender_id: &str,
    topic_id: Option<&str>,
    subject: &str,
    body: &str,
    priority: Priority,
    thread_id: &str,
    parent_id: Option<&str>,
    deadline_at: Option<i64>,
    metadata: Option<&serde_json::Value>,
    now: i64,
) -> Result<()> {
    let seq = db::next_seq(conn);
    conn.execute(
        "INSERT INTO messages (id, sender_id, topic_id, subject, body, priority, thread_id,
                               parent_id, deadline_at, metadata, created_at, seq)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            id,
            sender_id,
            topic_id,
            subject.trim(),
            body,
            priority.as_str(),
            thread_id,
            parent_id,
            deadline_at,
            metadata.map(|m| m.to_string()).unwrap_or_else(|| "{}".to_string()),
            now,
            seq
        ],
    )?;
    Ok(())
}

fn insert_recipient(conn: &Connection, message_id: &str, agent_id: &str, now: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO message_recipients (message_id, agent_id, state, updated_at)
         VALUES (?1, ?2, 'inbox', ?3)",
        params![message_id, agent_id, now],
    )?;
    Ok(())
}

fn check_idempotency(
    conn: &Connection,
    key: Option<&str>,
    window_secs: i64,
) -> Result<Option<SendReceipt>> {
    let Some(key) = key.filter(|k| !k.is_empty()) else {
        return Ok(None);
    };
    let row: Option<(String, String, i64)> = conn
        .query_row(
            "SELECT message_id, thread_id, created_at FROM idempotency WHERE key = ?1",
            params![key],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    match row {
        Some((message_id, thread_id, created_at)) if db::now() - created_at < window_secs => {
            let delivered_to: i64 = conn.query_row(
                "SELECT COUNT(*) FROM message_recipients WHERE message_id = ?1",
                params![&message_id],
                |r| r.get(0),
            )?;
            tracing::debug!(%key, %message_id, "duplicate send suppressed by idempotency key");
            Ok(Some(SendReceipt {
                message_id,
                thread_id,
                delivered_to,
            }))
        }
        Some(_) => {
            // Window expired; the key may be reused for a fresh send.
            conn.execute("DELETE FROM idempotency WHERE key = ?1", params![key])?;
            Ok(None)
        }
        None => Ok(None),
    }
}

fn record_idempotency(
    conn: &Connection,
    key: Option<&str>,
    message_id: &str,
    thread_id: &str,
    now: i64,
) -> Result<()> {
    if let Some(key) = key.filter(|k| !k.is_empty()) {
        conn.execute(
            "INSERT INTO idempotency (key, message_id, thread_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, message_id, thread_id, now],
        )?;
    }
    Ok(())
}

fn load_recipient(
    conn: &Connection,
    message_id: &str,
    agent_id: &str,
) -> Result<RecipientStateView> {
    let row: Option<(String, Option<i64>, Option<i64>, Option<i64>, i64)> = conn
        .query_row(
            "SELECT state, read_at, acked_at, snoozed_until, starred
             FROM message_recipients WHERE message_id = ?1 AND agent_id = ?2",
            params![message_id, agent_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()?;
    let (state, read_at, acked_at, snoozed_until, starred) =
        row.ok_or_else(|| Error::not_found(format!("message '{message_id}'")))?;
    Ok(RecipientStateView {
        message_id: message_id.to_string(),
        state: RecipientState::parse(&state)?,
        read_at,
        acked_at,
        snoozed_until,
        starred: starred != 0,
    })
}

/// All agents that ever sent or received a message in the thread.
fn thread_participants(conn: &Connection, thread_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT a.name FROM agents a
         WHERE a.deleted_at IS NULL AND a.id IN (
            SELECT sender_id FROM messages WHERE thread_id = ?1
            UNION
            SELECT r.agent_id FROM message_recipients r
            JOIN messages m ON m.id = r.message_id
            WHERE m.thread_id = ?1
         )
         ORDER BY a.name",
    )?;
    let rows = stmt.query_map(params![thread_id], |r| r.get(0))?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

// --- Read path (bypasses the actor) ---

const MESSAGE_COLS: &str = "m.id, s.name, t.name, m.subject, m.body, m.priority, m.thread_id,
    m.parent_id, m.deadline_at, m.metadata, m.created_at, m.seq,
    r.state, r.read_at, r.acked_at, r.snoozed_until, r.starred";

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<InboxMessage> {
    let metadata_str: String = row.get(9)?;
    let priority: String = row.get(5)?;
    let state: Option<String> = row.get(12)?;
    let starred: Option<i64> = row.get(16)?;
    Ok(InboxMessage {
        id: row.get(0)?,
        sender: row.get(1)?,
        topic: row.get(2)?,
        subject: row.get(3)?,
        body: row.get(4)?,
        priority: Priority::parse(&priority).unwrap_or_default(),
        thread_id: row.get(6)?,
        parent_id: row.get(7)?,
        deadline_at: row.get(8)?,
        metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::json!({})),
        created_at: row.get(10)?,
        seq: row.get(11)?,
        state: state
            .as_deref()
            .and_then(|s| RecipientState::parse(s).ok())
            .unwrap_or(RecipientState::Inbox),
        read_at: row.get(13)?,
        acked_at: row.get(14)?,
        snoozed_until: row.get(15)?,
        starred: starred.unwrap_or(0) != 0,
    })
}

fn load_message_for(conn: &Connection, message_id: &str, agent_id: &str) -> Result<InboxMessage> {
    conn.query_row(
        &format!(
            "SELECT {MESSAGE_COLS} FROM messages m
             JOIN agents s ON s.id = m.sender_id
             LEFT JOIN topics t ON t.id = m.topic_id
             JOIN message_recipients r ON r.message_id = m.id AND r.agent_id = ?2
             WHERE m.id = ?1"
        ),
        params![message_id, agent_id],
        message_from_row,
    )
    .optional()?
    .ok_or_else(|| Error::not_found(format!("message '{message_id}'")))
}

pub fn fetch_inbox(db: &Db, agent: &str, filter: &InboxFilter) -> Result<Vec<InboxMessage>> {
    let conn = db.conn();
    let agent_id = resolve_agent_id(&conn, agent)?;
    let now = db::now();

    let mut sql = format!(
        "SELECT {MESSAGE_COLS} FROM message_recipients r
         JOIN messages m ON m.id = r.message_id
         JOIN agents s ON s.id = m.sender_id
         LEFT JOIN topics t ON t.id = m.topic_id
         WHERE r.agent_id = ?1 AND r.state != 'deleted'"
    );
    let mut param_values: Vec<String> = vec![agent_id];
    let mut idx = 2;

    let states: Vec<RecipientState> = if filter.state_in.is_empty() {
        vec![RecipientState::Inbox]
    } else {
        filter
            .state_in
            .iter()
            .copied()
            .filter(|s| *s != RecipientState::Deleted)
            .collect()
    };
    // A filter naming only the deleted tombstone matches nothing.
    if states.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders: Vec<String> = states
        .iter()
        .enumerate()
        .map(|(i, _)| format!("?{}", idx + i))
        .collect();
    sql.push_str(&format!(" AND r.state IN ({})", placeholders.join(",")));
    for s in &states {
        param_values.push(s.as_str().to_string());
    }
    idx += states.len();

    // Snoozed rows stay hidden until the sweep wakes them.
    sql.push_str(&format!(
        " AND (r.snoozed_until IS NULL OR r.snoozed_until <= ?{idx})"
    ));
    param_values.push(now.to_string());
    idx += 1;

    if filter.unread_only {
        sql.push_str(" AND r.read_at IS NULL");
    }
    if filter.starred_only {
        sql.push_str(" AND r.starred = 1");
    }
    if let Some(topic) = &filter.topic {
        sql.push_str(&format!(" AND t.name = ?{idx}"));
        param_values.push(topic.clone());
        idx += 1;
    }
    if let Some(since) = filter.since_offset {
        sql.push_str(&format!(" AND m.seq > ?{idx}"));
        param_values.push(since.to_string());
        idx += 1;
    }

    let limit = filter.limit.unwrap_or(50).clamp(1, 500);
    let offset = filter.offset.unwrap_or(0).max(0);
    sql.push_str(&format!(" ORDER BY m.seq ASC LIMIT ?{idx} OFFSET ?{}", idx + 1));
    param_values.push(limit.to_string());
    param_values.push(offset.to_string());

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn rusqlite::types::ToSql> = param_values
        .iter()
        .map(|v| v as &dyn rusqlite::types::ToSql)
        .collect();
    let messages = stmt
        .query_map(params_refs.as_slice(), message_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(messages)
}

/// All thread messages the caller may see: those it received (and has not
/// deleted) plus those it sent.
pub fn read_thread(db: &Db, agent: &str, thread_id: &str) -> Result<Vec<InboxMessage>> {
    let conn = db.conn();
    let agent_id = resolve_agent_id(&conn, agent)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLS} FROM messages m
         JOIN agents s ON s.id = m.sender_id
         LEFT JOIN topics t ON t.id = m.topic_id
         LEFT JOIN message_recipients r ON r.message_id = m.id AND r.agent_id = ?2
         WHERE m.thread_id = ?1
           AND ((r.agent_id IS NOT NULL AND r.state != 'deleted') OR m.sender_id = ?2)
         ORDER BY m.created_at ASC, m.seq ASC"
    ))?;
    let messages: Vec<InboxMessage> = stmt
        .query_map(params![thread_id, &agent_id], message_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    if messages.is_empty() {
        return Err(Error::not_found(format!("thread '{thread_id}'")));
    }
    Ok(messages)
}

/// Inbox messages newer than the caller's per-topic offsets. The offset
/// key is the topic name, or [`DIRECT_OFFSET_KEY`] for direct mail.
pub fn poll_changes_snapshot(
    db: &Db,
    agent: &str,
    offsets: &HashMap<String, i64>,
) -> Result<PollChangesView> {
    let conn = db.conn();
    let agent_id = resolve_agent_id(&conn, agent)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLS} FROM message_recipients r
         JOIN messages m ON m.id = r.message_id
         JOIN agents s ON s.id = m.sender_id
         LEFT JOIN topics t ON t.id = m.topic_id
         WHERE r.agent_id = ?1 AND r.state = 'inbox'
         ORDER BY m.seq ASC"
    ))?;
    let all: Vec<InboxMessage> = stmt
        .query_map(params![&agent_id], message_from_row)?
        .filter_map(|r| r.ok())
        .collect();

    let mut new_offsets = offsets.clone();
    let mut messages = Vec::new();
    for msg in all {
        let key = msg.topic.clone().unwrap_or_else(|| DIRECT_OFFSET_KEY.to_string());
        let last_seen = offsets.get(&key).copied().unwrap_or(0);
        if msg.seq > last_seen {
            let entry = new_offsets.entry(key).or_insert(0);
            *entry = (*entry).max(msg.seq);
            messages.push(msg);
        }
    }
    Ok(PollChangesView {
        messages,
        new_offsets,
    })
}

/// Liveness plus inbox summary for one agent (long-poll clients hit this
/// between waits).
pub fn get_status(db: &Db, agent: &str) -> Result<AgentStatusView> {
    let agent_row = identity::get_agent(db, agent)?;
    let conn = db.conn();
    let (unread, latest_seq): (i64, i64) = conn.query_row(
        "SELECT COUNT(CASE WHEN r.read_at IS NULL THEN 1 END), COALESCE(MAX(m.seq), 0)
         FROM message_recipients r JOIN messages m ON m.id = r.message_id
         WHERE r.agent_id = ?1 AND r.state = 'inbox'",
        params![&agent_row.id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    Ok(AgentStatusView {
        agent: agent_row.name,
        status: agent_row.status,
        unread,
        latest_seq,
    })
}

pub fn unread_count(db: &Db, agent: &str) -> Result<i64> {
    let conn = db.conn();
    let agent_id = resolve_agent_id(&conn, agent)?;
    let count = conn.query_row(
        "SELECT COUNT(*) FROM message_recipients
         WHERE agent_id = ?1 AND state = 'inbox' AND read_at IS NULL",
        params![&agent_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

/// Full-text search over subject/body, post-filtered to messages visible
/// to the caller (a recipient row exists and is not deleted; trash is
/// included and reported as such). Falls back to LIKE when the FTS query
/// does not parse.
pub fn search(db: &Db, agent: &str, query: &str, limit: i64) -> Result<SearchView> {
    let query = query.trim();
    if query.is_empty() {
        return Err(Error::invalid("query must not be empty"));
    }
    if query.len() > 500 {
        return Err(Error::invalid("query too long (max 500 characters)"));
    }
    let conn = db.conn();
    let agent_id = resolve_agent_id(&conn, agent)?;
    let limit = limit.clamp(1, 200);

    let fts_result: std::result::Result<Vec<SearchHit>, rusqlite::Error> = (|| {
        // Quote each term so FTS5 syntax can never leak in; porter
        // stemming still applies inside the quotes.
        let fts_query: String = query
            .split_whitespace()
            .map(|word| {
                let clean: String = word
                    .chars()
                    .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || *c == '\'')
                    .collect();
                let escaped = clean.replace('"', "\"\"");
                format!("\"{escaped}\"")
            })
            .filter(|s| s != "\"\"")
            .collect::<Vec<_>>()
            .join(" ");

        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLS}, rank FROM messages_fts f
             JOIN messages m ON m.id = f.message_id
             JOIN agents s ON s.id = m.sender_id
             LEFT JOIN topics t ON t.id = m.topic_id
             JOIN message_recipients r ON r.message_id = m.id AND r.agent_id = ?2
             WHERE messages_fts MATCH ?1 AND r.state != 'deleted'
             ORDER BY rank LIMIT ?3"
        ))?;
        let hits = stmt
            .query_map(params![&fts_query, &agent_id, limit], |row| {
                Ok(SearchHit {
                    message: message_from_row(row)?,
                    rank: row.get(17)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(hits)
    })();

    let hits = match fts_result {
        Ok(hits) => hits,
        Err(_) => {
            let escaped = query
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            let like_pattern = format!("%{escaped}%");
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLS} FROM messages m
                 JOIN agents s ON s.id = m.sender_id
                 LEFT JOIN topics t ON t.id = m.topic_id
                 JOIN message_recipients r ON r.message_id = m.id AND r.agent_id = ?2
                 WHERE (m.subject LIKE ?1 ESCAPE '\\' OR m.body LIKE ?1 ESCAPE '\\')
                   AND r.state != 'deleted'
                 ORDER BY m.seq DESC LIMIT ?3"
            ))?;
            stmt.query_map(params![&like_pattern, &agent_id, limit], |row| {
                Ok(SearchHit {
                    message: message_from_row(row)?,
                    rank: 0.0,
                })
            })?
            .filter_map(|r| r.ok())
            .collect()
        }
    };

    let count = hits.len();
    Ok(SearchView {
        hits,
        count,
        query: query.to_string(),
    })
}

/// Aggregate counters for the dashboard, shared by both transports.
pub fn dashboard_stats(db: &Db) -> Result<DashboardStats> {
    let (agents, messages, unread, topics) = {
        let conn = db.conn();
        conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM agents WHERE deleted_at IS NULL),
                (SELECT COUNT(*) FROM messages),
                (SELECT COUNT(*) FROM message_recipients WHERE state = 'inbox' AND read_at IS NULL),
                (SELECT COUNT(*) FROM topics)",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )?
    };
    let activities_24h = crate::activity::count_since(db, db::now() - 24 * 3600);
    let mut recently_active = identity::list_agents(db, None)?;
    recently_active.retain(|a| a.last_active_at.is_some());
    recently_active.sort_by_key(|a| std::cmp::Reverse(a.last_active_at));
    recently_active.truncate(10);
    Ok(DashboardStats {
        agents,
        messages,
        unread,
        topics,
        activities_24h,
        recently_active,
    })
}

// --- Topics & subscriptions (owned by the routing layer, not the actor) ---

pub fn create_topic(db: &Db, name: &str, kind: TopicKind) -> Result<Topic> {
    let name = name.trim();
    if name.is_empty() || name.len() > 100 {
        return Err(Error::invalid("topic name must be 1-100 characters"));
    }
    let conn = db.conn();
    let exists: i64 = conn.query_row(
        "SELECT COUNT(*) FROM topics WHERE name = ?1",
        params![name],
        |r| r.get(0),
    )?;
    if exists > 0 {
        return Err(Error::AlreadyExists(format!("topic '{name}'")));
    }
    let id = db::new_id();
    let now = db::now();
    conn.execute(
        "INSERT INTO topics (id, name, kind, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![&id, name, kind.as_str(), now],
    )?;
    Ok(Topic {
        id,
        name: name.to_string(),
        kind,
        subscriber_count: 0,
        created_at: now,
    })
}

pub fn get_topic(db: &Db, name: &str) -> Result<Topic> {
    let conn = db.conn();
    conn.query_row(
        "SELECT t.id, t.name, t.kind, t.created_at,
                (SELECT COUNT(*) FROM subscriptions s WHERE s.topic_id = t.id)
         FROM topics t WHERE t.name = ?1",
        params![name],
        |r| {
            let kind: String = r.get(2)?;
            Ok(Topic {
                id: r.get(0)?,
                name: r.get(1)?,
                kind: TopicKind::parse(&kind).unwrap_or(TopicKind::Broadcast),
                created_at: r.get(3)?,
                subscriber_count: r.get(4)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| Error::not_found(format!("topic '{name}'")))
}

pub fn list_topics(db: &Db, agent: Option<&str>) -> Result<Vec<Topic>> {
    let conn = db.conn();
    let mut topics = Vec::new();
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<Topic> {
        let kind: String = r.get(2)?;
        Ok(Topic {
            id: r.get(0)?,
            name: r.get(1)?,
            kind: TopicKind::parse(&kind).unwrap_or(TopicKind::Broadcast),
            created_at: r.get(3)?,
            subscriber_count: r.get(4)?,
        })
    };
    match agent {
        Some(name) => {
            let agent_id = resolve_agent_id(&conn, name)?;
            let mut stmt = conn.prepare(
                "SELECT t.id, t.name, t.kind, t.created_at,
                        (SELECT COUNT(*) FROM subscriptions s2 WHERE s2.topic_id = t.id)
                 FROM topics t JOIN subscriptions s ON s.topic_id = t.id
                 WHERE s.agent_id = ?1 ORDER BY t.name",
            )?;
            let rows = stmt.query_map(params![&agent_id], map_row)?;
            for row in rows {
                topics.push(row?);
            }
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT t.id, t.name, t.kind, t.created_at,
                        (SELECT COUNT(*) FROM subscriptions s WHERE s.topic_id = t.id)
                 FROM topics t ORDER BY t.name",
            )?;
            let rows = stmt.query_map([], map_row)?;
            for row in rows {
                topics.push(row?);
            }
        }
    }
    Ok(topics)
}

/// Subscribe an agent, creating the topic on first use. Duplicate
/// subscriptions fail with AlreadyExists.
pub fn subscribe(db: &Db, topic_name: &str, agent: &str, kind: TopicKind) -> Result<Topic> {
    let topic_name = topic_name.trim();
    let (agent_id, existing) = {
        let conn = db.conn();
        let agent_id = resolve_agent_id(&conn, agent)?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM topics WHERE name = ?1",
                params![topic_name],
                |r| r.get(0),
            )
            .optional()?;
        (agent_id, existing)
    };

    let (topic_id, created) = match existing {
        Some(id) => (id, false),
        None => (create_topic(db, topic_name, kind)?.id, true),
    };

    {
        let conn = db.conn();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO subscriptions (topic_id, agent_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![&topic_id, &agent_id, db::now()],
        )?;
        if inserted == 0 {
            return Err(Error::AlreadyExists(format!(
                "subscription of '{agent}' to '{topic_name}'"
            )));
        }
    }

    let topic = get_topic(db, topic_name)?;
    if created {
        tracing::info!(topic = %topic.name, kind = topic.kind.as_str(), "topic created");
    }
    Ok(topic)
}

pub fn unsubscribe(db: &Db, topic_name: &str, agent: &str) -> Result<bool> {
    let conn = db.conn();
    let agent_id = resolve_agent_id(&conn, agent)?;
    let topic = conn
        .query_row(
            "SELECT id FROM topics WHERE name = ?1",
            params![topic_name],
            |r| r.get::<_, String>(0),
        )
        .optional()?
        .ok_or_else(|| Error::not_found(format!("topic '{topic_name}'")))?;
    let removed = conn.execute(
        "DELETE FROM subscriptions WHERE topic_id = ?1 AND agent_id = ?2",
        params![&topic, &agent_id],
    )?;
    if removed == 0 {
        return Err(Error::not_found(format!(
            "subscription of '{agent}' to '{topic_name}'"
        )));
    }
    Ok(true)
}

// --- Service facade (shared by both transports) ---

/// Handle bundling the mail actor address with the read path. REST routes
/// and the gRPC services both talk to this.
#[derive(Clone)]
pub struct MailService {
    addr: Addr<MailMsg>,
    db: Db,
    hub: Arc<NotificationHub>,
}

impl MailService {
    pub fn new(addr: Addr<MailMsg>, db: Db, hub: Arc<NotificationHub>) -> Self {
        MailService { addr, db, hub }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    pub fn sweep_addr(&self) -> Addr<MailMsg> {
        self.addr.clone()
    }

    pub async fn send(&self, req: SendMail) -> Result<SendReceipt> {
        self.addr.ask(|reply| MailMsg::Send(req, reply)).await
    }

    pub async fn publish(&self, topic: String, req: PublishMail) -> Result<SendReceipt> {
        self.addr
            .ask(|reply| MailMsg::Publish { topic, req, reply })
            .await
    }

    pub async fn reply_to_thread(&self, thread_id: String, req: ReplyToThread) -> Result<SendReceipt> {
        self.addr
            .ask(|reply| MailMsg::ReplyThread {
                thread_id,
                req,
                reply,
            })
            .await
    }

    pub async fn update_state(
        &self,
        agent: String,
        message_id: String,
        action: StateAction,
        snooze_until: Option<i64>,
    ) -> Result<RecipientStateView> {
        self.addr
            .ask(|reply| MailMsg::UpdateState {
                agent,
                message_id,
                action,
                snooze_until,
                reply,
            })
            .await
    }

    pub async fn ack(&self, agent: String, message_id: String) -> Result<RecipientStateView> {
        self.addr
            .ask(|reply| MailMsg::Ack {
                agent,
                message_id,
                reply,
            })
            .await
    }

    pub async fn read_message(&self, agent: String, message_id: String) -> Result<InboxMessage> {
        self.addr
            .ask(|reply| MailMsg::ReadMessage {
                agent,
                message_id,
                reply,
            })
            .await
    }

    pub async fn thread_op(&self, agent: String, thread_id: String, op: ThreadOp) -> Result<i64> {
        self.addr
            .ask(|reply| MailMsg::ThreadOp {
                agent,
                thread_id,
                op,
                reply,
            })
            .await
    }

    /// Long-poll: subscribe to the hub first, then snapshot, then wait out
    /// the deadline on an empty snapshot. Client disconnect cancels the
    /// wait by dropping this future.
    pub async fn poll_changes(
        &self,
        agent: &str,
        offsets: &HashMap<String, i64>,
        wait: Option<Duration>,
    ) -> Result<PollChangesView> {
        let mut sub = self.hub.subscribe_agent(agent);
        let first = poll_changes_snapshot(&self.db, agent, offsets)?;
        let wait = match wait.filter(|w| !w.is_zero()) {
            Some(w) => w.min(MAX_POLL_WAIT),
            None => return Ok(first),
        };
        if !first.messages.is_empty() {
            return Ok(first);
        }

        let deadline = tokio::time::Instant::now() + wait;
        loop {
            tokio::select! {
                event = sub.recv() => {
                    if event.is_none() {
                        return Ok(first);
                    }
                    let view = poll_changes_snapshot(&self.db, agent, offsets)?;
                    if !view.messages.is_empty() {
                        return Ok(view);
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Ok(first);
                }
            }
        }
    }
}
