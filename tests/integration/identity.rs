use crate::common::{register, test_client};
use rocket::http::{ContentType, Status};

fn ensure(
    client: &rocket::local::blocking::Client,
    session_id: &str,
    extra: &str,
) -> serde_json::Value {
    let res = client
        .post("/api/v1/identity/ensure")
        .header(ContentType::JSON)
        .body(format!(r#"{{"session_id": "{session_id}"{extra}}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    res.into_json().unwrap()
}

#[test]
fn test_ensure_identity_lifecycle() {
    let client = test_client();

    // First contact mints a memorable name and binds the session.
    let first = ensure(&client, "s1", r#", "project_key": "p""#);
    let name = first["name"].as_str().unwrap().to_string();
    assert!(!name.is_empty());

    // Second call with the same session returns the same agent.
    let second = ensure(&client, "s1", "");
    assert_eq!(second["name"], name.as_str());
    assert_eq!(second["id"], first["id"]);

    // Heartbeat, then the status endpoint reports activity.
    client
        .post("/api/v1/agents/heartbeat")
        .header(ContentType::JSON)
        .body(format!(r#"{{"agent": "{name}"}}"#))
        .dispatch();
    let agents: Vec<serde_json::Value> = client
        .get("/api/v1/agents")
        .dispatch()
        .into_json()
        .unwrap();
    let me = agents.iter().find(|a| a["name"] == name.as_str()).unwrap();
    // ensure_identity bound the session, so a live heartbeat means busy.
    assert!(me["status"] == "busy" || me["status"] == "active");
}

#[test]
fn test_status_degrades_with_heartbeat_age() {
    let client = test_client();
    register(&client, "sleeper");
    client
        .post("/api/v1/agents/heartbeat")
        .header(ContentType::JSON)
        .body(r#"{"agent": "sleeper"}"#)
        .dispatch();

    // Age the heartbeat 31 minutes by editing the store directly.
    let db = local_agent_mail::db::Db::new(&client.db_path);
    {
        let conn = db.conn();
        let aged = chrono::Utc::now().timestamp() - 31 * 60;
        conn.execute("UPDATE agents SET last_active_at = ?1", [aged])
            .unwrap();
    }
    drop(db);

    let agent: serde_json::Value = client
        .get("/api/v1/agents/sleeper")
        .dispatch()
        .into_json()
        .unwrap();
    assert_eq!(agent["status"], "offline");
}

#[test]
fn test_preferred_name_is_used_when_free() {
    let client = test_client();
    let agent = ensure(&client, "s2", r#", "preferred_name": "scout""#);
    assert_eq!(agent["name"], "scout");

    // A taken preferred name falls back to a generated one.
    let other = ensure(&client, "s3", r#", "preferred_name": "scout""#);
    assert_ne!(other["name"], "scout");
}

#[test]
fn test_save_identity_snapshot() {
    let client = test_client();
    ensure(&client, "s4", "");

    let res = client
        .post("/api/v1/identity/save")
        .header(ContentType::JSON)
        .body(r#"{"session_id": "s4", "cwd": "/work/repo", "git_branch": "main", "state": {"scratch": 1}}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let session: serde_json::Value = client
        .get("/api/v1/sessions/s4")
        .dispatch()
        .into_json()
        .unwrap();
    assert_eq!(session["cwd"], "/work/repo");
    assert_eq!(session["git_branch"], "main");

    // Saving against an unknown session fails.
    let res = client
        .post("/api/v1/identity/save")
        .header(ContentType::JSON)
        .body(r#"{"session_id": "nope"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}
