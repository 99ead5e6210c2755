use crate::common::{register, test_client};
use rocket::http::{ContentType, Status};

#[test]
fn test_register_with_explicit_name() {
    let client = test_client();
    let agent = register(&client, "alice");
    assert_eq!(agent["name"], "alice");
    assert_eq!(agent["status"], "offline");
    assert!(!agent["id"].as_str().unwrap().is_empty());
}

#[test]
fn test_register_generates_memorable_name() {
    let client = test_client();
    let res = client
        .post("/api/v1/agents")
        .header(ContentType::JSON)
        .body("{}")
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let agent: serde_json::Value = res.into_json().unwrap();
    let name = agent["name"].as_str().unwrap();
    // adjective-noun shape
    assert!(name.contains('-'), "generated name was {name}");
}

#[test]
fn test_register_duplicate_name_conflicts() {
    let client = test_client();
    register(&client, "alice");
    let res = client
        .post("/api/v1/agents")
        .header(ContentType::JSON)
        .body(r#"{"name": "alice"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["code"], "already_exists");
}

#[test]
fn test_get_and_list_agents() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");

    let res = client.get("/api/v1/agents/alice").dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client.get("/api/v1/agents").dispatch();
    let agents: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(agents.len(), 2);

    let res = client.get("/api/v1/agents/nobody").dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_update_agent_rename() {
    let client = test_client();
    register(&client, "alice");
    let res = client
        .put("/api/v1/agents/alice")
        .header(ContentType::JSON)
        .body(r#"{"new_name": "alice-2", "project_key": "proj"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let agent: serde_json::Value = res.into_json().unwrap();
    assert_eq!(agent["name"], "alice-2");
    assert_eq!(agent["project_key"], "proj");

    let res = client.get("/api/v1/agents/alice").dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_heartbeat_drives_status() {
    let client = test_client();
    register(&client, "alice");

    let res = client
        .post("/api/v1/agents/heartbeat")
        .header(ContentType::JSON)
        .body(r#"{"agent": "alice"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let agent: serde_json::Value = client
        .get("/api/v1/agents/alice")
        .dispatch()
        .into_json()
        .unwrap();
    assert_eq!(agent["status"], "active");

    // A session-start heartbeat makes the agent busy.
    client
        .post("/api/v1/agents/heartbeat")
        .header(ContentType::JSON)
        .body(r#"{"agent": "alice", "session_start": true, "session_id": "s1"}"#)
        .dispatch();
    let agent: serde_json::Value = client
        .get("/api/v1/agents/alice")
        .dispatch()
        .into_json()
        .unwrap();
    assert_eq!(agent["status"], "busy");
    assert_eq!(agent["current_session_id"], "s1");
}

#[test]
fn test_delete_unreferenced_agent_frees_name() {
    let client = test_client();
    register(&client, "ghost");
    let res = client.delete("/api/v1/agents/ghost").dispatch();
    assert_eq!(res.status(), Status::Ok);
    // Name can be reused right away.
    register(&client, "ghost");
}

#[test]
fn test_filter_agents_by_project() {
    let client = test_client();
    let res = client
        .post("/api/v1/agents")
        .header(ContentType::JSON)
        .body(r#"{"name": "alice", "project_key": "alpha"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    register(&client, "bob");

    let agents: Vec<serde_json::Value> = client
        .get("/api/v1/agents?project_key=alpha")
        .dispatch()
        .into_json()
        .unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0]["name"], "alice");
}
