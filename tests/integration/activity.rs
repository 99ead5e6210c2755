use crate::common::{register, send, test_client};
use rocket::http::{ContentType, Status};

/// The activity actor processes appends asynchronously; give its mailbox
/// a moment to drain before asserting on the feed.
fn feed(client: &rocket::local::blocking::Client, query: &str) -> Vec<serde_json::Value> {
    std::thread::sleep(std::time::Duration::from_millis(150));
    let url = if query.is_empty() {
        "/api/v1/activity".to_string()
    } else {
        format!("/api/v1/activity?{query}")
    };
    client.get(url).dispatch().into_json().unwrap()
}

#[test]
fn test_send_and_read_show_up_in_the_feed() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");
    let receipt = send(&client, "alice", &["bob"], "traced");
    let id = receipt["message_id"].as_str().unwrap();
    client
        .post(format!("/api/v1/messages/{id}/read"))
        .header(ContentType::JSON)
        .body(r#"{"agent": "bob"}"#)
        .dispatch();

    let entries = feed(&client, "");
    let kinds: Vec<&str> = entries
        .iter()
        .map(|e| e["kind"].as_str().unwrap())
        .collect();
    assert!(kinds.contains(&"agent_registered"));
    assert!(kinds.contains(&"message_sent"));
    assert!(kinds.contains(&"message_read"));
}

#[test]
fn test_feed_filters() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");
    send(&client, "alice", &["bob"], "one");

    let only_alice = feed(&client, "agent=alice");
    assert!(only_alice.iter().all(|e| e["agent"] == "alice"));

    let only_sent = feed(&client, "kind=message_sent");
    assert_eq!(only_sent.len(), 1);
    assert!(only_sent[0]["description"]
        .as_str()
        .unwrap()
        .contains("one"));
}

#[test]
fn test_record_activity_endpoint() {
    let client = test_client();
    register(&client, "alice");
    let res = client
        .post("/api/v1/activity")
        .header(ContentType::JSON)
        .body(r#"{"agent": "alice", "kind": "review_requested", "description": "PR #7"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let entries = feed(&client, "kind=review_requested");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["description"], "PR #7");
}

#[test]
fn test_feed_limit() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");
    for i in 0..5 {
        send(&client, "alice", &["bob"], &format!("m{i}"));
    }
    let entries = feed(&client, "limit=3");
    assert_eq!(entries.len(), 3);
    // Newest first.
    assert!(entries[0]["description"].as_str().unwrap().contains("m4"));
}
