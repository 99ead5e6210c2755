use crate::common::{inbox, register, send, test_client};
use rocket::http::{ContentType, Status};

fn change_state(
    client: &rocket::local::blocking::Client,
    agent: &str,
    message_id: &str,
    action: &str,
) -> (Status, serde_json::Value) {
    let res = client
        .post("/api/v1/messages/state")
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"agent": "{agent}", "message_id": "{message_id}", "action": "{action}"}}"#
        ))
        .dispatch();
    let status = res.status();
    (status, res.into_json().unwrap())
}

#[test]
fn test_archive_restore_cycle() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");
    let receipt = send(&client, "alice", &["bob"], "file me");
    let id = receipt["message_id"].as_str().unwrap();

    let (status, body) = change_state(&client, "bob", id, "archive");
    assert_eq!(status, Status::Ok);
    assert_eq!(body["state"], "archived");
    assert!(inbox(&client, "bob", "").is_empty());
    assert_eq!(inbox(&client, "bob", "states=archived").len(), 1);

    let (_, body) = change_state(&client, "bob", id, "restore");
    assert_eq!(body["state"], "inbox");
    assert_eq!(inbox(&client, "bob", "").len(), 1);
}

#[test]
fn test_trash_and_archive_from_trash() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");
    let receipt = send(&client, "alice", &["bob"], "junk");
    let id = receipt["message_id"].as_str().unwrap();

    let (_, body) = change_state(&client, "bob", id, "trash");
    assert_eq!(body["state"], "trash");

    // trash → archived is an allowed edge
    let (status, body) = change_state(&client, "bob", id, "archive");
    assert_eq!(status, Status::Ok);
    assert_eq!(body["state"], "archived");
}

#[test]
fn test_invalid_transitions_are_rejected() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");
    let receipt = send(&client, "alice", &["bob"], "strict");
    let id = receipt["message_id"].as_str().unwrap();

    // restore only applies to archived/trash
    let (status, body) = change_state(&client, "bob", id, "restore");
    assert_eq!(status, Status::BadRequest);
    assert_eq!(body["code"], "invalid_argument");

    // archive twice: second is invalid (archived → archived not an edge)
    change_state(&client, "bob", id, "archive");
    let (status, _) = change_state(&client, "bob", id, "archive");
    assert_eq!(status, Status::BadRequest);

    // unknown action
    let (status, _) = change_state(&client, "bob", id, "shred");
    assert_eq!(status, Status::BadRequest);
}

#[test]
fn test_delete_is_terminal_and_hidden_everywhere() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");
    let receipt = send(&client, "alice", &["bob"], "secret");
    let id = receipt["message_id"].as_str().unwrap();

    let res = client
        .delete(format!("/api/v1/messages/{id}?agent=bob"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    // Not visible through any filter combination.
    assert!(inbox(&client, "bob", "").is_empty());
    assert!(inbox(&client, "bob", "states=inbox,archived,trash").is_empty());

    // Tombstone rejects further transitions and reads.
    let (status, _) = change_state(&client, "bob", id, "restore");
    assert_eq!(status, Status::BadRequest);
    let res = client
        .post(format!("/api/v1/messages/{id}/read"))
        .header(ContentType::JSON)
        .body(r#"{"agent": "bob"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_star_and_mark_unread_flags() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");
    let receipt = send(&client, "alice", &["bob"], "flagged");
    let id = receipt["message_id"].as_str().unwrap();

    let (_, body) = change_state(&client, "bob", id, "star");
    assert_eq!(body["starred"], true);
    assert_eq!(body["state"], "inbox");
    assert_eq!(inbox(&client, "bob", "starred_only=true").len(), 1);

    let (_, body) = change_state(&client, "bob", id, "unstar");
    assert_eq!(body["starred"], false);

    // read then mark unread clears read_at
    let (_, body) = change_state(&client, "bob", id, "read");
    assert!(body["read_at"].as_i64().unwrap() > 0);
    let (_, body) = change_state(&client, "bob", id, "mark_unread");
    assert!(body.get("read_at").is_none() || body["read_at"].is_null());
    assert_eq!(inbox(&client, "bob", "unread_only=true").len(), 1);
}

#[test]
fn test_state_is_per_recipient() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");
    register(&client, "carol");
    let receipt = send(&client, "alice", &["bob", "carol"], "both");
    let id = receipt["message_id"].as_str().unwrap();

    change_state(&client, "bob", id, "archive");
    assert!(inbox(&client, "bob", "").is_empty());
    assert_eq!(inbox(&client, "carol", "").len(), 1);
}

#[test]
fn test_state_change_on_foreign_message_is_not_found() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");
    register(&client, "mallory");
    let receipt = send(&client, "alice", &["bob"], "private");
    let id = receipt["message_id"].as_str().unwrap();

    // mallory has no recipient row, so the message does not exist for her.
    let (status, _) = change_state(&client, "mallory", id, "archive");
    assert_eq!(status, Status::NotFound);
}
