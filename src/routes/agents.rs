use rocket::serde::json::Json;
use rocket::{State, delete, get, post, put};

use crate::activity::{self, ActivityMsg};
use crate::actor::Addr;
use crate::db::Db;
use crate::error::ApiError;
use crate::identity;
use crate::models::*;

#[post("/api/v1/agents", format = "json", data = "<body>")]
pub fn register_agent(
    db: &State<Db>,
    activity: &State<Addr<ActivityMsg>>,
    body: Json<RegisterAgent>,
) -> Result<Json<Agent>, ApiError> {
    let agent = identity::register_agent(db, body.name.as_deref(), body.project_key.as_deref())?;
    activity::record(
        activity,
        Some(&agent.name),
        activity::KIND_AGENT_REGISTERED,
        format!("agent {} registered", agent.name),
        None,
    );
    Ok(Json(agent))
}

#[get("/api/v1/agents?<project_key>")]
pub fn list_agents(db: &State<Db>, project_key: Option<&str>) -> Result<Json<Vec<Agent>>, ApiError> {
    Ok(Json(identity::list_agents(db, project_key)?))
}

#[get("/api/v1/agents/<name>")]
pub fn get_agent(db: &State<Db>, name: &str) -> Result<Json<Agent>, ApiError> {
    Ok(Json(identity::get_agent(db, name)?))
}

#[put("/api/v1/agents/<name>", format = "json", data = "<body>")]
pub fn update_agent(
    db: &State<Db>,
    name: &str,
    body: Json<UpdateAgent>,
) -> Result<Json<Agent>, ApiError> {
    let agent =
        identity::update_agent(db, name, body.new_name.as_deref(), body.project_key.as_deref())?;
    Ok(Json(agent))
}

#[delete("/api/v1/agents/<name>")]
pub fn delete_agent(db: &State<Db>, name: &str) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = identity::delete_agent(db, name)?;
    Ok(Json(serde_json::json!({"deleted": deleted})))
}

#[post("/api/v1/agents/heartbeat", format = "json", data = "<body>")]
pub fn heartbeat(
    db: &State<Db>,
    activity: &State<Addr<ActivityMsg>>,
    body: Json<HeartbeatBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let last_active_at =
        identity::heartbeat(db, &body.agent, body.session_start, body.session_id.as_deref())?;
    if body.session_start {
        activity::record(
            activity,
            Some(&body.agent),
            activity::KIND_SESSION_STARTED,
            format!("{} started a session", body.agent),
            None,
        );
    }
    Ok(Json(serde_json::json!({"last_active_at": last_active_at})))
}

#[post("/api/v1/identity/ensure", format = "json", data = "<body>")]
pub fn ensure_identity(
    db: &State<Db>,
    body: Json<EnsureIdentityBody>,
) -> Result<Json<Agent>, ApiError> {
    let agent = identity::ensure_identity(
        db,
        &body.session_id,
        body.project_key.as_deref(),
        body.preferred_name.as_deref(),
    )?;
    Ok(Json(agent))
}

#[post("/api/v1/identity/save", format = "json", data = "<body>")]
pub fn save_identity(
    db: &State<Db>,
    body: Json<SaveIdentityBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    identity::save_identity(
        db,
        &body.session_id,
        body.cwd.as_deref(),
        body.git_branch.as_deref(),
        body.state.as_ref(),
    )?;
    Ok(Json(serde_json::json!({"saved": true})))
}
