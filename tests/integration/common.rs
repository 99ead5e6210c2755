use rocket::http::{ContentType, Status};
use rocket::local::blocking::Client;

/// Wrapper around Client that auto-deletes the temp DB on drop.
/// Uses Option<Client> so the SQLite connection is released (WAL mode
/// holds the file) before the files are removed.
pub struct TestClient {
    client: Option<Client>,
    pub db_path: String,
}

impl Drop for TestClient {
    fn drop(&mut self) {
        drop(self.client.take());
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
    }
}

impl std::ops::Deref for TestClient {
    type Target = Client;
    fn deref(&self) -> &Client {
        self.client.as_ref().unwrap()
    }
}

pub fn test_client() -> TestClient {
    // Unique temp DB per test (avoids parallel test contention)
    let db_path = format!(
        "/tmp/mail_test_{}.db",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    );
    let rocket = local_agent_mail::rocket_with_db(&db_path);
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient {
        client: Some(client),
        db_path,
    }
}

/// Build a client with a custom config (short dedup windows and the like).
pub fn test_client_with_config(mut config: local_agent_mail::config::Config) -> TestClient {
    let db_path = format!(
        "/tmp/mail_test_{}.db",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    );
    config.db_path = db_path.clone();
    let rocket = local_agent_mail::rocket_with_config(config);
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient {
        client: Some(client),
        db_path,
    }
}

/// Helper: register an agent with a fixed name.
pub fn register(client: &Client, name: &str) -> serde_json::Value {
    let res = client
        .post("/api/v1/agents")
        .header(ContentType::JSON)
        .body(format!(r#"{{"name": "{name}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    res.into_json().unwrap()
}

/// Helper: send a direct message and return the receipt.
pub fn send(client: &Client, sender: &str, recipients: &[&str], subject: &str) -> serde_json::Value {
    let recipients = recipients
        .iter()
        .map(|r| format!(r#""{r}""#))
        .collect::<Vec<_>>()
        .join(",");
    let res = client
        .post("/api/v1/messages")
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"sender": "{sender}", "recipients": [{recipients}], "subject": "{subject}", "body": "body of {subject}"}}"#
        ))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    res.into_json().unwrap()
}

/// Helper: fetch an agent's inbox with an optional query string.
pub fn inbox(client: &Client, agent: &str, query: &str) -> Vec<serde_json::Value> {
    let url = if query.is_empty() {
        format!("/api/v1/inbox/{agent}")
    } else {
        format!("/api/v1/inbox/{agent}?{query}")
    };
    let res = client.get(url).dispatch();
    assert_eq!(res.status(), Status::Ok);
    res.into_json().unwrap()
}
