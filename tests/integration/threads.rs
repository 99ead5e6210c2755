use crate::common::{inbox, register, send, test_client};
use rocket::http::{ContentType, Status};

#[test]
fn test_reply_with_parent_inherits_thread() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");

    let root = send(&client, "alice", &["bob"], "root");
    let root_id = root["message_id"].as_str().unwrap();
    let thread_id = root["thread_id"].as_str().unwrap();

    let res = client
        .post("/api/v1/messages")
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"sender": "bob", "recipients": ["alice"], "subject": "re", "body": "b", "parent_id": "{root_id}"}}"#
        ))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let child: serde_json::Value = res.into_json().unwrap();
    assert_eq!(child["thread_id"], thread_id);
}

#[test]
fn test_thread_reply_endpoint_expands_participants() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");
    register(&client, "carol");

    let root = send(&client, "alice", &["bob", "carol"], "kickoff");
    let thread_id = root["thread_id"].as_str().unwrap();

    let res = client
        .post(format!("/api/v1/threads/{thread_id}/reply"))
        .header(ContentType::JSON)
        .body(r#"{"sender": "bob", "body": "on it"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let receipt: serde_json::Value = res.into_json().unwrap();
    // alice and carol get the reply; bob does not reply to himself.
    assert_eq!(receipt["delivered_to"], 2);

    let alice_inbox = inbox(&client, "alice", "");
    assert_eq!(alice_inbox.len(), 1);
    assert_eq!(alice_inbox[0]["subject"], "Re: kickoff");
    assert_eq!(alice_inbox[0]["thread_id"].as_str().unwrap(), thread_id);
}

#[test]
fn test_read_thread_is_chronological_and_visible_only() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");
    register(&client, "carol");

    let root = send(&client, "alice", &["bob"], "first");
    let thread_id = root["thread_id"].as_str().unwrap();
    client
        .post(format!("/api/v1/threads/{thread_id}/reply"))
        .header(ContentType::JSON)
        .body(r#"{"sender": "bob", "body": "second"}"#)
        .dispatch();

    let res = client
        .get(format!("/api/v1/threads/{thread_id}?agent=bob"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let messages: Vec<serde_json::Value> = res.into_json().unwrap();
    // bob received the root and sent the reply; both are visible.
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["subject"], "first");
    assert_eq!(messages[1]["subject"], "Re: first");

    // carol never participated: the thread does not exist for her.
    let res = client
        .get(format!("/api/v1/threads/{thread_id}?agent=carol"))
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_reply_to_unknown_thread() {
    let client = test_client();
    register(&client, "alice");
    let res = client
        .post("/api/v1/threads/no-such-thread/reply")
        .header(ContentType::JSON)
        .body(r#"{"sender": "alice", "body": "hello?"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_archive_thread_moves_all_recipient_rows() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");

    let root = send(&client, "alice", &["bob"], "series");
    let thread_id = root["thread_id"].as_str().unwrap().to_string();
    for _ in 0..2 {
        client
            .post(format!("/api/v1/threads/{thread_id}/reply"))
            .header(ContentType::JSON)
            .body(r#"{"sender": "alice", "body": "more"}"#)
            .dispatch();
    }
    assert_eq!(inbox(&client, "bob", "").len(), 3);

    let res = client
        .post(format!("/api/v1/threads/{thread_id}/archive"))
        .header(ContentType::JSON)
        .body(r#"{"agent": "bob"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["affected"], 3);
    assert!(inbox(&client, "bob", "").is_empty());
    assert_eq!(inbox(&client, "bob", "states=archived").len(), 3);
}

#[test]
fn test_mark_thread_unread_and_delete_thread() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");

    let root = send(&client, "alice", &["bob"], "wipe me");
    let thread_id = root["thread_id"].as_str().unwrap().to_string();
    let id = root["message_id"].as_str().unwrap();

    // Read it, then mark the thread unread again.
    client
        .post(format!("/api/v1/messages/{id}/read"))
        .header(ContentType::JSON)
        .body(r#"{"agent": "bob"}"#)
        .dispatch();
    assert!(inbox(&client, "bob", "unread_only=true").is_empty());
    client
        .post(format!("/api/v1/threads/{thread_id}/mark_unread"))
        .header(ContentType::JSON)
        .body(r#"{"agent": "bob"}"#)
        .dispatch();
    assert_eq!(inbox(&client, "bob", "unread_only=true").len(), 1);

    // Deleting the thread tombstones every row for bob.
    let res = client
        .post(format!("/api/v1/threads/{thread_id}/delete"))
        .header(ContentType::JSON)
        .body(r#"{"agent": "bob"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    assert!(inbox(&client, "bob", "states=inbox,archived,trash").is_empty());
}
