use crate::common::{register, test_client};
use rocket::http::{ContentType, Status};

#[test]
fn test_session_start_and_complete() {
    let client = test_client();
    register(&client, "runner");

    let res = client
        .post("/api/v1/sessions/start")
        .header(ContentType::JSON)
        .body(r#"{"session_id": "sess-1", "agent": "runner"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let session: serde_json::Value = res.into_json().unwrap();
    assert_eq!(session["agent"], "runner");

    let agent: serde_json::Value = client
        .get("/api/v1/agents/runner")
        .dispatch()
        .into_json()
        .unwrap();
    assert_eq!(agent["status"], "busy");
    assert_eq!(agent["current_session_id"], "sess-1");

    let res = client
        .post("/api/v1/sessions/complete")
        .header(ContentType::JSON)
        .body(r#"{"session_id": "sess-1"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let agent: serde_json::Value = client
        .get("/api/v1/agents/runner")
        .dispatch()
        .into_json()
        .unwrap();
    assert_eq!(agent["status"], "active");
    assert!(agent.get("current_session_id").is_none() || agent["current_session_id"].is_null());
}

#[test]
fn test_list_and_get_sessions() {
    let client = test_client();
    register(&client, "a");
    register(&client, "b");
    for (session, agent) in [("s-a", "a"), ("s-b", "b")] {
        client
            .post("/api/v1/sessions/start")
            .header(ContentType::JSON)
            .body(format!(r#"{{"session_id": "{session}", "agent": "{agent}"}}"#))
            .dispatch();
    }

    let all: Vec<serde_json::Value> = client
        .get("/api/v1/sessions")
        .dispatch()
        .into_json()
        .unwrap();
    assert_eq!(all.len(), 2);

    let only_a: Vec<serde_json::Value> = client
        .get("/api/v1/sessions?agent=a")
        .dispatch()
        .into_json()
        .unwrap();
    assert_eq!(only_a.len(), 1);
    assert_eq!(only_a[0]["session_id"], "s-a");

    let res = client.get("/api/v1/sessions/s-b").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let res = client.get("/api/v1/sessions/unknown").dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_start_session_for_unknown_agent() {
    let client = test_client();
    let res = client
        .post("/api/v1/sessions/start")
        .header(ContentType::JSON)
        .body(r#"{"session_id": "sx", "agent": "nobody"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}
