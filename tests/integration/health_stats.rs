use crate::common::{register, send, test_client};
use rocket::http::Status;

#[test]
fn test_health() {
    let client = test_client();
    let res = client.get("/api/v1/health").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["uptime_secs"].is_number());
}

#[test]
fn test_stats_counts_core_entities() {
    let client = test_client();
    register(&client, "alice");
    register(&client, "bob");
    send(&client, "alice", &["bob"], "hello");

    let res = client.get("/api/v1/stats").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["dashboard"]["agents"], 2);
    assert_eq!(body["dashboard"]["messages"], 1);
    assert_eq!(body["dashboard"]["unread"], 1);
    // The seeded general topic is always there.
    assert!(body["dashboard"]["topics"].as_i64().unwrap() >= 1);
    assert!(body["push"]["dropped_events"].is_number());
}

#[test]
fn test_unknown_route_is_structured_404() {
    let client = test_client();
    let res = client.get("/api/v1/nope").dispatch();
    assert_eq!(res.status(), Status::NotFound);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["code"], "not_found");
}
