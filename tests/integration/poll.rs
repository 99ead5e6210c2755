use crate::common::{register, send, test_client};
use rocket::http::{ContentType, Status};

#[test]
fn test_poll_returns_new_messages_and_offsets() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");
    send(&client, "alice", &["bob"], "one");
    send(&client, "alice", &["bob"], "two");

    let res = client
        .post("/api/v1/poll")
        .header(ContentType::JSON)
        .body(r#"{"agent": "bob"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["messages"].as_array().unwrap().len(), 2);
    let inbox_offset = body["new_offsets"]["inbox"].as_i64().unwrap();
    assert!(inbox_offset >= 2);

    // Replaying the returned offsets yields nothing new.
    let res = client
        .post("/api/v1/poll")
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"agent": "bob", "offsets": {{"inbox": {inbox_offset}}}}}"#
        ))
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body["messages"].as_array().unwrap().is_empty());

    // A third message advances past the old offset.
    send(&client, "alice", &["bob"], "three");
    let res = client
        .post("/api/v1/poll")
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"agent": "bob", "offsets": {{"inbox": {inbox_offset}}}}}"#
        ))
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["subject"], "three");
}

#[test]
fn test_poll_tracks_topics_separately() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");
    client
        .post("/api/v1/topics/ci/subscribe")
        .header(ContentType::JSON)
        .body(r#"{"agent": "bob"}"#)
        .dispatch();
    send(&client, "alice", &["bob"], "direct");
    client
        .post("/api/v1/topics/ci/publish")
        .header(ContentType::JSON)
        .body(r#"{"sender": "alice", "subject": "green", "body": "ok"}"#)
        .dispatch();

    let res = client
        .post("/api/v1/poll")
        .header(ContentType::JSON)
        .body(r#"{"agent": "bob"}"#)
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["messages"].as_array().unwrap().len(), 2);
    assert!(body["new_offsets"]["inbox"].is_i64());
    assert!(body["new_offsets"]["ci"].is_i64());
}

#[test]
fn test_poll_with_wait_times_out_empty() {
    let client = test_client();
    register(&client, "bob");

    let started = std::time::Instant::now();
    let res = client
        .post("/api/v1/poll")
        .header(ContentType::JSON)
        .body(r#"{"agent": "bob", "wait_secs": 1}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body["messages"].as_array().unwrap().is_empty());
    // The request parked for roughly the requested wait.
    assert!(started.elapsed() >= std::time::Duration::from_millis(900));
}

#[test]
fn test_poll_unknown_agent() {
    let client = test_client();
    let res = client
        .post("/api/v1/poll")
        .header(ContentType::JSON)
        .body(r#"{"agent": "nobody"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}
