use rusqlite::{Connection, params};
use std::sync::{Arc, Mutex, MutexGuard};

/// Current time as integer epoch seconds, the storage timestamp format.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Handle to the shared store. Cheap to clone; background tasks and actors
/// hold their own clone.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub fn new(path: &str) -> Self {
        let conn = Connection::open(path).expect("Failed to open database");
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .expect("Failed to set pragmas");
        let db = Db {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate();
        db
    }

    /// Lock the connection, recovering from a poisoned mutex (a panicked
    /// handler must not take the whole store down with it).
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn migrate(&self) {
        let conn = self.conn();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                project_key TEXT,
                current_session_id TEXT,
                created_at INTEGER NOT NULL,
                last_active_at INTEGER,
                deleted_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS session_identities (
                session_id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL REFERENCES agents(id),
                project_key TEXT,
                git_branch TEXT,
                cwd TEXT,
                state TEXT DEFAULT '{}',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS topics (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL DEFAULT 'broadcast',
                rr_cursor INTEGER NOT NULL DEFAULT 0,
                max_messages INTEGER,
                max_age_secs INTEGER,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS subscriptions (
                topic_id TEXT NOT NULL REFERENCES topics(id) ON DELETE CASCADE,
                agent_id TEXT NOT NULL REFERENCES agents(id),
                created_at INTEGER NOT NULL,
                PRIMARY KEY (topic_id, agent_id)
            );
            CREATE INDEX IF NOT EXISTS idx_subscriptions_agent ON subscriptions(agent_id);

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                sender_id TEXT NOT NULL REFERENCES agents(id),
                topic_id TEXT REFERENCES topics(id),
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                priority TEXT NOT NULL DEFAULT 'normal',
                thread_id TEXT NOT NULL,
                parent_id TEXT,
                deadline_at INTEGER,
                metadata TEXT DEFAULT '{}',
                created_at INTEGER NOT NULL,
                seq INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_messages_seq ON messages(seq);
            CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_id);

            CREATE TABLE IF NOT EXISTS message_recipients (
                message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                agent_id TEXT NOT NULL REFERENCES agents(id),
                state TEXT NOT NULL DEFAULT 'inbox',
                read_at INTEGER,
                acked_at INTEGER,
                snoozed_until INTEGER,
                starred INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (message_id, agent_id)
            );
            CREATE INDEX IF NOT EXISTS idx_recipients_agent_state ON message_recipients(agent_id, state);
            CREATE INDEX IF NOT EXISTS idx_recipients_snooze ON message_recipients(snoozed_until)
                WHERE snoozed_until IS NOT NULL;

            CREATE TABLE IF NOT EXISTS activities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_name TEXT,
                kind TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                metadata TEXT DEFAULT '{}',
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_activities_created ON activities(created_at);

            CREATE TABLE IF NOT EXISTS idempotency (
                key TEXT PRIMARY KEY,
                message_id TEXT NOT NULL,
                thread_id TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );",
        )
        .expect("Failed to run migrations");

        // FTS5 full-text index over message subject and body
        conn.execute_batch(
            "CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
                message_id UNINDEXED,
                subject,
                body,
                tokenize='porter unicode61'
            );",
        )
        .expect("Failed to create FTS5 table");

        // Seed the default broadcast topic
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM topics WHERE name = 'general'",
                [],
                |r| r.get(0),
            )
            .unwrap_or(0);
        if count == 0 {
            conn.execute(
                "INSERT INTO topics (id, name, kind, created_at) VALUES (?1, 'general', 'broadcast', ?2)",
                params![new_id(), now()],
            )
            .ok();
        }
    }
}

/// Insert or refresh a message in the FTS index (call inside the insert tx).
pub fn upsert_fts(conn: &Connection, message_id: &str) {
    conn.execute("DELETE FROM messages_fts WHERE message_id = ?1", [message_id])
        .ok();
    conn.execute(
        "INSERT INTO messages_fts (message_id, subject, body)
         SELECT id, subject, body FROM messages WHERE id = ?1",
        [message_id],
    )
    .ok();
}

/// Remove a message from the FTS index (call when the row is purged).
pub fn delete_fts(conn: &Connection, message_id: &str) {
    conn.execute("DELETE FROM messages_fts WHERE message_id = ?1", [message_id])
        .ok();
}

/// Next value of the global monotonic message sequence.
pub fn next_seq(conn: &Connection) -> i64 {
    conn.query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM messages", [], |r| {
        r.get(0)
    })
    .unwrap_or(1)
}
