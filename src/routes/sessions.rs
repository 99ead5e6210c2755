use rocket::serde::json::Json;
use rocket::{State, get, post};

use crate::activity::{self, ActivityMsg};
use crate::actor::Addr;
use crate::db::Db;
use crate::error::ApiError;
use crate::identity;
use crate::models::*;

#[get("/api/v1/sessions?<agent>")]
pub fn list_sessions(
    db: &State<Db>,
    agent: Option<&str>,
) -> Result<Json<Vec<SessionIdentity>>, ApiError> {
    Ok(Json(identity::list_sessions(db, agent)?))
}

#[get("/api/v1/sessions/<session_id>")]
pub fn get_session(db: &State<Db>, session_id: &str) -> Result<Json<SessionIdentity>, ApiError> {
    Ok(Json(identity::get_session(db, session_id)?))
}

#[post("/api/v1/sessions/start", format = "json", data = "<body>")]
pub fn start_session(
    db: &State<Db>,
    activity: &State<Addr<ActivityMsg>>,
    body: Json<SessionLifecycleBody>,
) -> Result<Json<SessionIdentity>, ApiError> {
    let session = identity::start_session(db, &body.session_id, &body.agent)?;
    activity::record(
        activity,
        Some(&body.agent),
        activity::KIND_SESSION_STARTED,
        format!("session {} started", body.session_id),
        None,
    );
    Ok(Json(session))
}

#[post("/api/v1/sessions/complete", format = "json", data = "<body>")]
pub fn complete_session(
    db: &State<Db>,
    activity: &State<Addr<ActivityMsg>>,
    body: Json<CompleteSessionBody>,
) -> Result<Json<SessionIdentity>, ApiError> {
    let session = identity::complete_session(db, &body.session_id)?;
    activity::record(
        activity,
        Some(&session.agent),
        activity::KIND_SESSION_COMPLETED,
        format!("session {} completed", body.session_id),
        None,
    );
    Ok(Json(session))
}
