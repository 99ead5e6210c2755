use crate::common::{inbox, register, test_client};
use rocket::http::{ContentType, Status};

fn subscribe(client: &rocket::local::blocking::Client, topic: &str, agent: &str, kind: &str) {
    let res = client
        .post(format!("/api/v1/topics/{topic}/subscribe"))
        .header(ContentType::JSON)
        .body(format!(r#"{{"agent": "{agent}", "kind": "{kind}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

fn publish(
    client: &rocket::local::blocking::Client,
    topic: &str,
    sender: &str,
    subject: &str,
) -> (Status, serde_json::Value) {
    let res = client
        .post(format!("/api/v1/topics/{topic}/publish"))
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"sender": "{sender}", "subject": "{subject}", "body": "b"}}"#
        ))
        .dispatch();
    let status = res.status();
    (status, res.into_json().unwrap())
}

#[test]
fn test_broadcast_fans_out_with_independent_rows() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");
    register(&client, "carol");
    subscribe(&client, "updates", "alice", "broadcast");
    subscribe(&client, "updates", "bob", "broadcast");

    let (status, receipt) = publish(&client, "updates", "carol", "v1");
    assert_eq!(status, Status::Ok);
    assert_eq!(receipt["delivered_to"], 2);

    assert_eq!(inbox(&client, "alice", "").len(), 1);
    assert_eq!(inbox(&client, "bob", "").len(), 1);

    // Archiving on alice leaves bob's row in inbox.
    let id = receipt["message_id"].as_str().unwrap();
    client
        .post("/api/v1/messages/state")
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"agent": "alice", "message_id": "{id}", "action": "archive"}}"#
        ))
        .dispatch();
    assert!(inbox(&client, "alice", "").is_empty());
    assert_eq!(inbox(&client, "bob", "").len(), 1);
}

#[test]
fn test_queue_topic_load_balances() {
    let client = test_client();
    register(&client, "worker-1");
    register(&client, "worker-2");
    register(&client, "dispatcher");
    subscribe(&client, "jobs", "worker-1", "queue");
    subscribe(&client, "jobs", "worker-2", "queue");

    for i in 0..4 {
        let (status, receipt) = publish(&client, "jobs", "dispatcher", &format!("job {i}"));
        assert_eq!(status, Status::Ok);
        assert_eq!(receipt["delivered_to"], 1);
    }
    assert_eq!(inbox(&client, "worker-1", "").len(), 2);
    assert_eq!(inbox(&client, "worker-2", "").len(), 2);
}

#[test]
fn test_publish_to_direct_topic_is_invalid() {
    let client = test_client();
    register(&client, "alice");
    let res = client
        .post("/api/v1/topics")
        .header(ContentType::JSON)
        .body(r#"{"name": "dm-alice", "kind": "direct"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let (status, body) = publish(&client, "dm-alice", "alice", "x");
    assert_eq!(status, Status::BadRequest);
    assert_eq!(body["code"], "invalid_argument");
}

#[test]
fn test_publish_to_unknown_topic() {
    let client = test_client();
    register(&client, "alice");
    let (status, _) = publish(&client, "missing", "alice", "x");
    assert_eq!(status, Status::NotFound);
}

#[test]
fn test_duplicate_subscription_conflicts() {
    let client = test_client();
    register(&client, "alice");
    subscribe(&client, "updates", "alice", "broadcast");
    let res = client
        .post("/api/v1/topics/updates/subscribe")
        .header(ContentType::JSON)
        .body(r#"{"agent": "alice"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "carol");
    subscribe(&client, "updates", "alice", "broadcast");

    let res = client
        .post("/api/v1/topics/updates/unsubscribe")
        .header(ContentType::JSON)
        .body(r#"{"agent": "alice"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let (_, receipt) = publish(&client, "updates", "carol", "after");
    assert_eq!(receipt["delivered_to"], 0);
    assert!(inbox(&client, "alice", "").is_empty());

    // Unsubscribing again is NotFound.
    let res = client
        .post("/api/v1/topics/updates/unsubscribe")
        .header(ContentType::JSON)
        .body(r#"{"agent": "alice"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_list_topics_with_subscriber_counts() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");
    subscribe(&client, "updates", "alice", "broadcast");
    subscribe(&client, "updates", "bob", "broadcast");
    subscribe(&client, "jobs", "alice", "queue");

    let topics: Vec<serde_json::Value> = client
        .get("/api/v1/topics")
        .dispatch()
        .into_json()
        .unwrap();
    // seeded general + updates + jobs
    assert!(topics.len() >= 3);
    let updates = topics.iter().find(|t| t["name"] == "updates").unwrap();
    assert_eq!(updates["subscriber_count"], 2);
    assert_eq!(updates["kind"], "broadcast");

    // Scoped to one agent's subscriptions.
    let mine: Vec<serde_json::Value> = client
        .get("/api/v1/topics?agent=bob")
        .dispatch()
        .into_json()
        .unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0]["name"], "updates");
}

#[test]
fn test_topic_messages_filterable_in_inbox() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "carol");
    subscribe(&client, "updates", "alice", "broadcast");
    publish(&client, "updates", "carol", "v1");
    crate::common::send(&client, "carol", &["alice"], "direct");

    assert_eq!(inbox(&client, "alice", "").len(), 2);
    let only_topic = inbox(&client, "alice", "topic=updates");
    assert_eq!(only_topic.len(), 1);
    assert_eq!(only_topic[0]["topic"], "updates");
}
