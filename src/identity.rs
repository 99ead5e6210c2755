//! Identity registry: agent rows, session identities, heartbeats.
//!
//! Owns every mutation of `agents` and `session_identities`. Serialization
//! happens at the storage connection; these functions never call into other
//! components.

use rand::Rng;
use rusqlite::{Connection, OptionalExtension, params};

use crate::db::{self, Db};
use crate::error::{Error, Result};
use crate::models::{Agent, AgentStatus, SessionIdentity};

/// Heartbeat age below which an agent counts as busy/active.
const ACTIVE_WITHIN_SECS: i64 = 5 * 60;
/// Heartbeat age below which an agent counts as idle; older is offline.
const IDLE_WITHIN_SECS: i64 = 30 * 60;

/// Name-generation retries before falling back to a random suffix.
const NAME_ATTEMPTS: usize = 16;

const ADJECTIVES: &[&str] = &[
    "amber", "bold", "brisk", "calm", "clever", "copper", "crisp", "deft", "eager", "fleet",
    "gentle", "glad", "golden", "hardy", "keen", "lively", "lucid", "mellow", "nimble", "noble",
    "patient", "plucky", "proud", "quick", "quiet", "rapid", "sage", "sharp", "silver", "sly",
    "steady", "stout", "swift", "tidy", "vivid", "wry",
];

const NOUNS: &[&str] = &[
    "badger", "beacon", "birch", "comet", "condor", "cove", "crane", "delta", "ember", "falcon",
    "fern", "finch", "fjord", "gale", "glacier", "harbor", "heron", "juniper", "lark", "lynx",
    "maple", "marten", "meadow", "otter", "owl", "pike", "quartz", "raven", "reef", "ridge",
    "sparrow", "spruce", "summit", "tern", "thicket", "wren",
];

/// Compute liveness from heartbeat age and session presence.
pub fn status_for(last_active_at: Option<i64>, has_session: bool, now: i64) -> AgentStatus {
    match last_active_at {
        None => AgentStatus::Offline,
        Some(t) => {
            let age = now - t;
            if age < ACTIVE_WITHIN_SECS {
                if has_session {
                    AgentStatus::Busy
                } else {
                    AgentStatus::Active
                }
            } else if age < IDLE_WITHIN_SECS {
                AgentStatus::Idle
            } else {
                AgentStatus::Offline
            }
        }
    }
}

fn agent_from_row(row: &rusqlite::Row<'_>, now: i64) -> rusqlite::Result<Agent> {
    let last_active_at: Option<i64> = row.get(4)?;
    let current_session_id: Option<String> = row.get(3)?;
    Ok(Agent {
        id: row.get(0)?,
        name: row.get(1)?,
        project_key: row.get(2)?,
        status: status_for(last_active_at, current_session_id.is_some(), now),
        current_session_id,
        created_at: row.get(5)?,
        last_active_at,
    })
}

const AGENT_COLS: &str = "id, name, project_key, current_session_id, last_active_at, created_at";

/// Generate a memorable adjective-noun name not yet taken. Collisions are
/// retried; once the attempts run out a short random suffix is appended.
pub fn generate_name(conn: &Connection) -> String {
    let mut rng = rand::thread_rng();
    for _ in 0..NAME_ATTEMPTS {
        let name = format!(
            "{}-{}",
            ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())],
            NOUNS[rng.gen_range(0..NOUNS.len())]
        );
        if !name_taken(conn, &name) {
            return name;
        }
    }
    let base = format!(
        "{}-{}",
        ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())],
        NOUNS[rng.gen_range(0..NOUNS.len())]
    );
    format!("{}-{:04x}", base, rng.r#gen::<u16>())
}

fn name_taken(conn: &Connection, name: &str) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM agents WHERE name = ?1",
        params![name],
        |r| r.get::<_, i64>(0),
    )
    .map(|c| c > 0)
    .unwrap_or(true)
}

/// Resolve an agent name to its id. Never creates; misses are NotFound.
pub fn resolve_agent_id(conn: &Connection, name: &str) -> Result<String> {
    conn.query_row(
        "SELECT id FROM agents WHERE name = ?1 AND deleted_at IS NULL",
        params![name],
        |r| r.get(0),
    )
    .optional()?
    .ok_or_else(|| Error::not_found(format!("agent '{name}'")))
}

pub fn get_agent(db: &Db, name: &str) -> Result<Agent> {
    let conn = db.conn();
    conn.query_row(
        &format!("SELECT {AGENT_COLS} FROM agents WHERE name = ?1 AND deleted_at IS NULL"),
        params![name],
        |row| agent_from_row(row, db::now()),
    )
    .optional()?
    .ok_or_else(|| Error::not_found(format!("agent '{name}'")))
}

pub fn list_agents(db: &Db, project_key: Option<&str>) -> Result<Vec<Agent>> {
    let conn = db.conn();
    let now = db::now();
    let mut agents = Vec::new();
    match project_key {
        Some(key) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {AGENT_COLS} FROM agents
                 WHERE deleted_at IS NULL AND project_key = ?1 ORDER BY name"
            ))?;
            let rows = stmt.query_map(params![key], |row| agent_from_row(row, now))?;
            for row in rows {
                agents.push(row?);
            }
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {AGENT_COLS} FROM agents WHERE deleted_at IS NULL ORDER BY name"
            ))?;
            let rows = stmt.query_map([], |row| agent_from_row(row, now))?;
            for row in rows {
                agents.push(row?);
            }
        }
    }
    Ok(agents)
}

/// Explicit registration. A requested name that is already taken fails with
/// AlreadyExists; no name means one is generated.
pub fn register_agent(db: &Db, name: Option<&str>, project_key: Option<&str>) -> Result<Agent> {
    let conn = db.conn();
    let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(requested) => {
            validate_name(requested)?;
            if name_taken(&conn, requested) {
                return Err(Error::AlreadyExists(format!("agent '{requested}'")));
            }
            requested.to_string()
        }
        None => generate_name(&conn),
    };
    let now = db::now();
    let id = db::new_id();
    conn.execute(
        "INSERT INTO agents (id, name, project_key, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![&id, &name, project_key, now],
    )?;
    Ok(Agent {
        id,
        name,
        project_key: project_key.map(String::from),
        current_session_id: None,
        created_at: now,
        last_active_at: None,
        status: AgentStatus::Offline,
    })
}

fn validate_name(name: &str) -> Result<()> {
    if name.len() > 100 {
        return Err(Error::invalid("agent name must be 1-100 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(Error::invalid(
            "agent name may only contain alphanumerics, '-', '_' and '.'",
        ));
    }
    Ok(())
}

pub fn update_agent(
    db: &Db,
    name: &str,
    new_name: Option<&str>,
    project_key: Option<&str>,
) -> Result<Agent> {
    {
        let conn = db.conn();
        let id = resolve_agent_id(&conn, name)?;
        if let Some(new_name) = new_name.map(str::trim).filter(|n| !n.is_empty()) {
            validate_name(new_name)?;
            if new_name != name && name_taken(&conn, new_name) {
                return Err(Error::AlreadyExists(format!("agent '{new_name}'")));
            }
            conn.execute(
                "UPDATE agents SET name = ?1 WHERE id = ?2",
                params![new_name, &id],
            )?;
        }
        if let Some(key) = project_key {
            conn.execute(
                "UPDATE agents SET project_key = ?1 WHERE id = ?2",
                params![key, &id],
            )?;
        }
    }
    get_agent(db, new_name.unwrap_or(name))
}

/// Delete an agent. Rows still referenced by messages are soft-deleted so
/// message history keeps resolving; unreferenced rows go away entirely.
pub fn delete_agent(db: &Db, name: &str) -> Result<bool> {
    let conn = db.conn();
    let id = resolve_agent_id(&conn, name)?;
    let referenced: i64 = conn.query_row(
        "SELECT (SELECT COUNT(*) FROM messages WHERE sender_id = ?1)
              + (SELECT COUNT(*) FROM message_recipients WHERE agent_id = ?1)",
        params![&id],
        |r| r.get(0),
    )?;
    if referenced > 0 {
        conn.execute(
            "UPDATE agents SET deleted_at = ?1, current_session_id = NULL WHERE id = ?2",
            params![db::now(), &id],
        )?;
    } else {
        conn.execute("DELETE FROM session_identities WHERE agent_id = ?1", params![&id])?;
        conn.execute("DELETE FROM subscriptions WHERE agent_id = ?1", params![&id])?;
        conn.execute("DELETE FROM agents WHERE id = ?1", params![&id])?;
    }
    Ok(true)
}

/// Record a liveness signal. `session_start` also binds the current session.
pub fn heartbeat(
    db: &Db,
    agent: &str,
    session_start: bool,
    session_id: Option<&str>,
) -> Result<i64> {
    let conn = db.conn();
    let id = resolve_agent_id(&conn, agent)?;
    let now = db::now();
    if session_start {
        conn.execute(
            "UPDATE agents SET last_active_at = ?1, current_session_id = ?2 WHERE id = ?3",
            params![now, session_id, &id],
        )?;
    } else {
        conn.execute(
            "UPDATE agents SET last_active_at = ?1 WHERE id = ?2",
            params![now, &id],
        )?;
    }
    Ok(now)
}

/// Resolve a session to its agent, creating the binding (and the agent)
/// on first contact.
pub fn ensure_identity(
    db: &Db,
    session_id: &str,
    project_key: Option<&str>,
    preferred_name: Option<&str>,
) -> Result<Agent> {
    if session_id.trim().is_empty() {
        return Err(Error::invalid("session_id must not be empty"));
    }
    let existing: Option<String> = {
        let conn = db.conn();
        conn.query_row(
            "SELECT a.name FROM session_identities s JOIN agents a ON a.id = s.agent_id
             WHERE s.session_id = ?1",
            params![session_id],
            |r| r.get(0),
        )
        .optional()?
    };
    if let Some(name) = existing {
        return get_agent(db, &name);
    }

    let name = {
        let conn = db.conn();
        let name = match preferred_name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(wanted) if !name_taken(&conn, wanted) => {
                validate_name(wanted)?;
                wanted.to_string()
            }
            _ => generate_name(&conn),
        };
        let id = db::new_id();
        let now = db::now();
        conn.execute(
            "INSERT INTO agents (id, name, project_key, created_at, last_active_at, current_session_id)
             VALUES (?1, ?2, ?3, ?4, ?4, ?5)",
            params![&id, &name, project_key, now, session_id],
        )?;
        conn.execute(
            "INSERT INTO session_identities (session_id, agent_id, project_key, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![session_id, &id, project_key, now],
        )?;
        name
    };
    get_agent(db, &name)
}

/// Persist a session snapshot for later restoration (compaction signal).
pub fn save_identity(
    db: &Db,
    session_id: &str,
    cwd: Option<&str>,
    git_branch: Option<&str>,
    state: Option<&serde_json::Value>,
) -> Result<()> {
    let conn = db.conn();
    let state_json = state.map(|v| v.to_string());
    let updated = conn.execute(
        "UPDATE session_identities SET
            cwd = COALESCE(?1, cwd),
            git_branch = COALESCE(?2, git_branch),
            state = COALESCE(?3, state),
            updated_at = ?4
         WHERE session_id = ?5",
        params![cwd, git_branch, state_json, db::now(), session_id],
    )?;
    if updated == 0 {
        return Err(Error::not_found(format!("session '{session_id}'")));
    }
    Ok(())
}

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionIdentity> {
    Ok(SessionIdentity {
        session_id: row.get(0)?,
        agent: row.get(1)?,
        project_key: row.get(2)?,
        git_branch: row.get(3)?,
        cwd: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

const SESSION_COLS: &str =
    "s.session_id, a.name, s.project_key, s.git_branch, s.cwd, s.created_at, s.updated_at";

pub fn list_sessions(db: &Db, agent: Option<&str>) -> Result<Vec<SessionIdentity>> {
    let conn = db.conn();
    let mut sessions = Vec::new();
    match agent {
        Some(name) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLS} FROM session_identities s
                 JOIN agents a ON a.id = s.agent_id
                 WHERE a.name = ?1 ORDER BY s.updated_at DESC"
            ))?;
            let rows = stmt.query_map(params![name], session_from_row)?;
            for row in rows {
                sessions.push(row?);
            }
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLS} FROM session_identities s
                 JOIN agents a ON a.id = s.agent_id
                 ORDER BY s.updated_at DESC"
            ))?;
            let rows = stmt.query_map([], session_from_row)?;
            for row in rows {
                sessions.push(row?);
            }
        }
    }
    Ok(sessions)
}

pub fn get_session(db: &Db, session_id: &str) -> Result<SessionIdentity> {
    let conn = db.conn();
    conn.query_row(
        &format!(
            "SELECT {SESSION_COLS} FROM session_identities s
             JOIN agents a ON a.id = s.agent_id
             WHERE s.session_id = ?1"
        ),
        params![session_id],
        session_from_row,
    )
    .optional()?
    .ok_or_else(|| Error::not_found(format!("session '{session_id}'")))
}

/// Bind a session to an agent and mark it live.
pub fn start_session(db: &Db, session_id: &str, agent: &str) -> Result<SessionIdentity> {
    {
        let conn = db.conn();
        let agent_id = resolve_agent_id(&conn, agent)?;
        let now = db::now();
        conn.execute(
            "INSERT INTO session_identities (session_id, agent_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(session_id) DO UPDATE SET agent_id = ?2, updated_at = ?3",
            params![session_id, &agent_id, now],
        )?;
        conn.execute(
            "UPDATE agents SET current_session_id = ?1, last_active_at = ?2 WHERE id = ?3",
            params![session_id, now, &agent_id],
        )?;
    }
    get_session(db, session_id)
}

/// Mark a session finished; the agent drops back to sessionless liveness.
pub fn complete_session(db: &Db, session_id: &str) -> Result<SessionIdentity> {
    {
        let conn = db.conn();
        let agent_id: Option<String> = conn
            .query_row(
                "SELECT agent_id FROM session_identities WHERE session_id = ?1",
                params![session_id],
                |r| r.get(0),
            )
            .optional()?;
        let agent_id =
            agent_id.ok_or_else(|| Error::not_found(format!("session '{session_id}'")))?;
        let now = db::now();
        conn.execute(
            "UPDATE session_identities SET updated_at = ?1 WHERE session_id = ?2",
            params![now, session_id],
        )?;
        conn.execute(
            "UPDATE agents SET current_session_id = NULL, last_active_at = ?1
             WHERE id = ?2 AND current_session_id = ?3",
            params![now, &agent_id, session_id],
        )?;
    }
    get_session(db, session_id)
}
