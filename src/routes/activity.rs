use rocket::serde::json::Json;
use rocket::{State, get, post};

use crate::activity::{self, ActivityMsg};
use crate::actor::Addr;
use crate::db::Db;
use crate::error::ApiError;
use crate::models::*;

#[get("/api/v1/activity?<agent>&<kind>&<limit>")]
pub fn activity_feed(
    db: &State<Db>,
    agent: Option<&str>,
    kind: Option<&str>,
    limit: Option<i64>,
) -> Result<Json<Vec<ActivityEntry>>, ApiError> {
    let entries = activity::list_activities(db, agent, kind, limit.unwrap_or(50))?;
    Ok(Json(entries))
}

/// Fire-and-forget: the append goes through the activity actor's mailbox,
/// so a feed hiccup never fails the caller.
#[post("/api/v1/activity", format = "json", data = "<body>")]
pub fn record_activity(
    activity: &State<Addr<ActivityMsg>>,
    body: Json<RecordActivityBody>,
) -> Json<serde_json::Value> {
    let body = body.into_inner();
    activity::record(
        activity,
        body.agent.as_deref(),
        body.kind,
        body.description,
        body.metadata,
    );
    Json(serde_json::json!({"recorded": true}))
}
