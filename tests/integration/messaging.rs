use crate::common::{inbox, register, send, test_client};
use rocket::http::{ContentType, Status};

#[test]
fn test_send_and_fetch_round_trip() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");

    let receipt = send(&client, "alice", &["bob"], "hi");
    assert_eq!(receipt["delivered_to"], 1);
    assert_eq!(receipt["thread_id"], receipt["message_id"]);

    let messages = inbox(&client, "bob", "");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["sender"], "alice");
    assert_eq!(messages[0]["subject"], "hi");
    assert_eq!(messages[0]["body"], "body of hi");
    assert_eq!(messages[0]["state"], "inbox");
    assert!(messages[0].get("read_at").is_none() || messages[0]["read_at"].is_null());

    // The sender has no recipient row of their own.
    assert!(inbox(&client, "alice", "").is_empty());
}

#[test]
fn test_read_message_sets_read_at_once() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");
    let receipt = send(&client, "alice", &["bob"], "hi");
    let id = receipt["message_id"].as_str().unwrap();

    let res = client
        .post(format!("/api/v1/messages/{id}/read"))
        .header(ContentType::JSON)
        .body(r#"{"agent": "bob"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    let first_read = body["message"]["read_at"].as_i64().unwrap();
    assert!(first_read > 0);

    // Unread filter is now empty.
    assert!(inbox(&client, "bob", "unread_only=true").is_empty());

    // Reading again does not move the timestamp.
    let res = client
        .post(format!("/api/v1/messages/{id}/read"))
        .header(ContentType::JSON)
        .body(r#"{"agent": "bob"}"#)
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["message"]["read_at"].as_i64().unwrap(), first_read);
}

#[test]
fn test_send_to_unknown_recipient_fails() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");

    let res = client
        .post("/api/v1/messages")
        .header(ContentType::JSON)
        .body(r#"{"sender": "alice", "recipients": ["bob", "nobody"], "subject": "x", "body": "y"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
    // The whole send rolled back: bob got nothing.
    assert!(inbox(&client, "bob", "").is_empty());
}

#[test]
fn test_send_validation() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");

    // Empty subject
    let res = client
        .post("/api/v1/messages")
        .header(ContentType::JSON)
        .body(r#"{"sender": "alice", "recipients": ["bob"], "subject": "", "body": "y"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);

    // No recipients
    let res = client
        .post("/api/v1/messages")
        .header(ContentType::JSON)
        .body(r#"{"sender": "alice", "recipients": [], "subject": "x", "body": "y"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);

    // Bad priority
    let res = client
        .post("/api/v1/messages")
        .header(ContentType::JSON)
        .body(r#"{"sender": "alice", "recipients": ["bob"], "subject": "x", "body": "y", "priority": "asap"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::UnprocessableEntity);
}

#[test]
fn test_message_metadata_and_priority_round_trip() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");

    let res = client
        .post("/api/v1/messages")
        .header(ContentType::JSON)
        .body(
            r#"{"sender": "alice", "recipients": ["bob"], "subject": "urgent thing",
                "body": "now", "priority": "urgent", "metadata": {"ticket": 42}}"#,
        )
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let messages = inbox(&client, "bob", "");
    assert_eq!(messages[0]["priority"], "urgent");
    assert_eq!(messages[0]["metadata"]["ticket"], 42);
}

#[test]
fn test_deadline_and_ack() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");

    let deadline = chrono::Utc::now().timestamp() + 3600;
    let res = client
        .post("/api/v1/messages")
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"sender": "alice", "recipients": ["bob"], "subject": "act", "body": "b", "deadline_at": {deadline}}}"#
        ))
        .dispatch();
    let receipt: serde_json::Value = res.into_json().unwrap();
    let id = receipt["message_id"].as_str().unwrap();

    let res = client
        .post("/api/v1/messages/ack")
        .header(ContentType::JSON)
        .body(format!(r#"{{"agent": "bob", "message_id": "{id}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body["acked_at"].as_i64().unwrap() > 0);

    // Ack on a message without a deadline is invalid.
    let receipt = send(&client, "alice", &["bob"], "no deadline");
    let id = receipt["message_id"].as_str().unwrap();
    let res = client
        .post("/api/v1/messages/ack")
        .header(ContentType::JSON)
        .body(format!(r#"{{"agent": "bob", "message_id": "{id}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_inbox_pagination_and_since_offset() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");
    for i in 0..5 {
        send(&client, "alice", &["bob"], &format!("msg {i}"));
    }

    let page = inbox(&client, "bob", "limit=2");
    assert_eq!(page.len(), 2);
    assert_eq!(page[0]["subject"], "msg 0");

    let second = inbox(&client, "bob", "limit=2&offset=2");
    assert_eq!(second[0]["subject"], "msg 2");

    let cursor = page[1]["seq"].as_i64().unwrap();
    let rest = inbox(&client, "bob", &format!("since_offset={cursor}"));
    assert_eq!(rest.len(), 3);
}

#[test]
fn test_agent_status_summary() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");
    send(&client, "alice", &["bob"], "one");
    send(&client, "alice", &["bob"], "two");

    let res = client.get("/api/v1/agents/bob/status").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["agent"], "bob");
    assert_eq!(body["unread"], 2);
    assert!(body["latest_seq"].as_i64().unwrap() >= 2);
    assert_eq!(body["status"], "offline");
}
