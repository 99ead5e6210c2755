//! Activity feed: an append-only log of observable events for the
//! dashboard. Appends go through a dedicated actor (tell-only, so a burst
//! of activity never slows the operation that caused it); reads query the
//! store directly. Retention is a row cap with oldest-first eviction.

use async_trait::async_trait;
use rusqlite::params;

use crate::actor::{Actor, Addr};
use crate::db::{self, Db};
use crate::error::Result;
use crate::models::ActivityEntry;

pub const KIND_MESSAGE_SENT: &str = "message_sent";
pub const KIND_MESSAGE_READ: &str = "message_read";
pub const KIND_STATE_CHANGED: &str = "state_changed";
pub const KIND_SESSION_STARTED: &str = "session_started";
pub const KIND_SESSION_COMPLETED: &str = "session_completed";
pub const KIND_HEARTBEAT: &str = "heartbeat";
pub const KIND_AGENT_REGISTERED: &str = "agent_registered";
pub const KIND_TOPIC_CREATED: &str = "topic_created";

pub enum ActivityMsg {
    Record {
        agent: Option<String>,
        kind: String,
        description: String,
        metadata: Option<serde_json::Value>,
    },
}

pub struct ActivityActor {
    db: Db,
    max_rows: i64,
}

impl ActivityActor {
    pub fn new(db: Db, max_rows: i64) -> Self {
        ActivityActor { db, max_rows }
    }

    fn record(
        &self,
        agent: Option<&str>,
        kind: &str,
        description: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<()> {
        append(&self.db, agent, kind, description, metadata, self.max_rows)
    }
}

/// Append one activity row and evict past the cap. The actor funnels
/// through here; the client queue's direct-storage tier calls it too.
pub fn append(
    db: &Db,
    agent: Option<&str>,
    kind: &str,
    description: &str,
    metadata: Option<&serde_json::Value>,
    max_rows: i64,
) -> Result<()> {
    let conn = db.conn();
    conn.execute(
        "INSERT INTO activities (agent_name, kind, description, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            agent,
            kind,
            description,
            metadata.map(|m| m.to_string()).unwrap_or_else(|| "{}".to_string()),
            db::now()
        ],
    )?;
    conn.execute(
        "DELETE FROM activities WHERE id IN (
            SELECT id FROM activities ORDER BY id DESC LIMIT -1 OFFSET ?1
         )",
        params![max_rows],
    )?;
    Ok(())
}

#[async_trait]
impl Actor for ActivityActor {
    type Msg = ActivityMsg;

    async fn handle(&mut self, msg: ActivityMsg) {
        let ActivityMsg::Record {
            agent,
            kind,
            description,
            metadata,
        } = msg;
        // Feed failures never propagate to the operation that emitted them.
        if let Err(e) = self.record(agent.as_deref(), &kind, &description, metadata.as_ref()) {
            tracing::warn!(%kind, error = %e, "failed to record activity");
        }
    }

    fn name(&self) -> &'static str {
        "activity"
    }
}

/// Convenience for emitting a record from anywhere holding the address.
pub fn record(
    activity: &Addr<ActivityMsg>,
    agent: Option<&str>,
    kind: impl Into<String>,
    description: impl Into<String>,
    metadata: Option<serde_json::Value>,
) {
    activity.tell(ActivityMsg::Record {
        agent: agent.map(String::from),
        kind: kind.into(),
        description: description.into(),
        metadata,
    });
}

pub fn list_activities(
    db: &Db,
    agent: Option<&str>,
    kind: Option<&str>,
    limit: i64,
) -> Result<Vec<ActivityEntry>> {
    let conn = db.conn();
    let limit = limit.clamp(1, 500);

    let mut sql = String::from(
        "SELECT id, agent_name, kind, description, metadata, created_at FROM activities WHERE 1=1",
    );
    let mut param_values: Vec<String> = vec![];
    let mut idx = 1;

    if let Some(agent_val) = agent {
        sql.push_str(&format!(" AND agent_name = ?{idx}"));
        param_values.push(agent_val.to_string());
        idx += 1;
    }
    if let Some(kind_val) = kind {
        sql.push_str(&format!(" AND kind = ?{idx}"));
        param_values.push(kind_val.to_string());
        idx += 1;
    }
    sql.push_str(&format!(" ORDER BY id DESC LIMIT ?{idx}"));
    param_values.push(limit.to_string());

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn rusqlite::types::ToSql> = param_values
        .iter()
        .map(|v| v as &dyn rusqlite::types::ToSql)
        .collect();

    let entries = stmt
        .query_map(params_refs.as_slice(), |row| {
            let metadata_str: String = row.get(4)?;
            Ok(ActivityEntry {
                id: row.get(0)?,
                agent: row.get(1)?,
                kind: row.get(2)?,
                description: row.get(3)?,
                metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::json!({})),
                created_at: row.get(5)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(entries)
}

/// Activity rows newer than the given cutoff (dashboard "last 24h" tile).
pub fn count_since(db: &Db, since: i64) -> i64 {
    let conn = db.conn();
    conn.query_row(
        "SELECT COUNT(*) FROM activities WHERE created_at >= ?1",
        params![since],
        |r| r.get(0),
    )
    .unwrap_or(0)
}
