use rocket::serde::json::Json;
use rocket::{State, catch, get};
use std::time::Instant;

use crate::db::Db;
use crate::error::ApiError;
use crate::mail;
use crate::models::DashboardStats;
use crate::notify::NotificationHub;
use crate::ws::WsHub;
use std::sync::Arc;

/// Process start time, managed at liftoff for the uptime counter.
pub struct Started(pub Instant);

#[get("/api/v1/health")]
pub fn health(started: &State<Started>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "uptime_secs": started.0.elapsed().as_secs(),
    }))
}

#[get("/api/v1/stats")]
pub fn stats(
    db: &State<Db>,
    hub: &State<Arc<NotificationHub>>,
    ws_hub: &State<WsHub>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let dashboard: DashboardStats = mail::dashboard_stats(db)?;
    Ok(Json(serde_json::json!({
        "dashboard": dashboard,
        "push": {
            "websocket_connections": ws_hub.connection_count(),
            "subscribers": hub.subscriber_count(),
            "dropped_events": hub.dropped_count(),
        },
    })))
}

#[catch(404)]
pub fn not_found() -> Json<serde_json::Value> {
    Json(serde_json::json!({"error": "Resource not found", "code": "not_found"}))
}
