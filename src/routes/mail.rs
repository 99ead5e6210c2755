use rocket::serde::json::Json;
use rocket::{State, delete, get, post};
use std::time::Duration;

use crate::db::Db;
use crate::error::ApiError;
use crate::mail::{self, MailService, ThreadOp};
use crate::models::*;

#[post("/api/v1/messages", format = "json", data = "<body>")]
pub async fn send_message(
    mail: &State<MailService>,
    body: Json<SendMail>,
) -> Result<Json<SendReceipt>, ApiError> {
    let receipt = mail.send(body.into_inner()).await?;
    Ok(Json(receipt))
}

#[post("/api/v1/topics/<topic>/publish", format = "json", data = "<body>")]
pub async fn publish_message(
    mail: &State<MailService>,
    topic: &str,
    body: Json<PublishMail>,
) -> Result<Json<SendReceipt>, ApiError> {
    let receipt = mail.publish(topic.to_string(), body.into_inner()).await?;
    Ok(Json(receipt))
}

#[post("/api/v1/threads/<thread_id>/reply", format = "json", data = "<body>")]
pub async fn reply_to_thread(
    mail: &State<MailService>,
    thread_id: &str,
    body: Json<ReplyToThread>,
) -> Result<Json<SendReceipt>, ApiError> {
    let receipt = mail
        .reply_to_thread(thread_id.to_string(), body.into_inner())
        .await?;
    Ok(Json(receipt))
}

#[get(
    "/api/v1/inbox/<agent>?<unread_only>&<states>&<topic>&<since_offset>&<limit>&<offset>&<starred_only>"
)]
#[allow(clippy::too_many_arguments)]
pub fn fetch_inbox(
    db: &State<Db>,
    agent: &str,
    unread_only: Option<bool>,
    states: Option<&str>,
    topic: Option<&str>,
    since_offset: Option<i64>,
    limit: Option<i64>,
    offset: Option<i64>,
    starred_only: Option<bool>,
) -> Result<Json<Vec<InboxMessage>>, ApiError> {
    // `states` is a comma-separated subset of inbox/archived/trash.
    let mut state_in = Vec::new();
    if let Some(states) = states {
        for raw in states.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            state_in.push(RecipientState::parse(raw)?);
        }
    }
    let filter = InboxFilter {
        unread_only: unread_only.unwrap_or(false),
        state_in,
        topic: topic.map(String::from),
        since_offset,
        limit,
        offset,
        starred_only: starred_only.unwrap_or(false),
    };
    let messages = mail::fetch_inbox(db, agent, &filter)?;
    Ok(Json(messages))
}

#[post("/api/v1/messages/<message_id>/read", format = "json", data = "<body>")]
pub async fn read_message(
    mail: &State<MailService>,
    db: &State<Db>,
    message_id: &str,
    body: Json<ReadMessageBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let message = mail
        .read_message(body.agent.clone(), message_id.to_string())
        .await?;
    if body.include_thread {
        let thread = mail::read_thread(db, &body.agent, &message.thread_id)?;
        return Ok(Json(serde_json::json!({"message": message, "thread": thread})));
    }
    Ok(Json(serde_json::json!({"message": message})))
}

#[get("/api/v1/threads/<thread_id>?<agent>")]
pub fn read_thread(
    db: &State<Db>,
    thread_id: &str,
    agent: &str,
) -> Result<Json<Vec<InboxMessage>>, ApiError> {
    let messages = mail::read_thread(db, agent, thread_id)?;
    Ok(Json(messages))
}

#[post("/api/v1/messages/state", format = "json", data = "<body>")]
pub async fn update_message_state(
    mail: &State<MailService>,
    body: Json<UpdateStateBody>,
) -> Result<Json<RecipientStateView>, ApiError> {
    let body = body.into_inner();
    let action = StateAction::parse(&body.action)?;
    let view = mail
        .update_state(body.agent, body.message_id, action, body.snooze_until)
        .await?;
    Ok(Json(view))
}

#[post("/api/v1/messages/ack", format = "json", data = "<body>")]
pub async fn ack_message(
    mail: &State<MailService>,
    body: Json<AckBody>,
) -> Result<Json<RecipientStateView>, ApiError> {
    let body = body.into_inner();
    let view = mail.ack(body.agent, body.message_id).await?;
    Ok(Json(view))
}

#[delete("/api/v1/messages/<message_id>?<agent>")]
pub async fn delete_message(
    mail: &State<MailService>,
    message_id: &str,
    agent: &str,
) -> Result<Json<RecipientStateView>, ApiError> {
    let view = mail
        .update_state(
            agent.to_string(),
            message_id.to_string(),
            StateAction::Transition(StateEvent::Delete),
            None,
        )
        .await?;
    Ok(Json(view))
}

#[post("/api/v1/threads/<thread_id>/archive", format = "json", data = "<body>")]
pub async fn archive_thread(
    mail: &State<MailService>,
    thread_id: &str,
    body: Json<AgentBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let affected = mail
        .thread_op(body.agent.clone(), thread_id.to_string(), ThreadOp::Archive)
        .await?;
    Ok(Json(serde_json::json!({"affected": affected})))
}

#[post("/api/v1/threads/<thread_id>/delete", format = "json", data = "<body>")]
pub async fn delete_thread(
    mail: &State<MailService>,
    thread_id: &str,
    body: Json<AgentBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let affected = mail
        .thread_op(body.agent.clone(), thread_id.to_string(), ThreadOp::Delete)
        .await?;
    Ok(Json(serde_json::json!({"affected": affected})))
}

#[post(
    "/api/v1/threads/<thread_id>/mark_unread",
    format = "json",
    data = "<body>"
)]
pub async fn mark_thread_unread(
    mail: &State<MailService>,
    thread_id: &str,
    body: Json<AgentBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let affected = mail
        .thread_op(
            body.agent.clone(),
            thread_id.to_string(),
            ThreadOp::MarkUnread,
        )
        .await?;
    Ok(Json(serde_json::json!({"affected": affected})))
}

#[get("/api/v1/agents/<agent>/status")]
pub fn agent_status(db: &State<Db>, agent: &str) -> Result<Json<AgentStatusView>, ApiError> {
    Ok(Json(mail::get_status(db, agent)?))
}

/// Long-poll entry point. With `wait_secs` the request parks until a new
/// message lands or the deadline passes; disconnecting cancels the wait.
#[post("/api/v1/poll", format = "json", data = "<body>")]
pub async fn poll_changes(
    mail: &State<MailService>,
    body: Json<PollChangesBody>,
) -> Result<Json<PollChangesView>, ApiError> {
    let body = body.into_inner();
    let wait = body.wait_secs.map(Duration::from_secs);
    let view = mail.poll_changes(&body.agent, &body.offsets, wait).await?;
    Ok(Json(view))
}

#[get("/api/v1/search?<agent>&<q>&<limit>")]
pub fn search_messages(
    db: &State<Db>,
    agent: &str,
    q: &str,
    limit: Option<i64>,
) -> Result<Json<SearchView>, ApiError> {
    let view = mail::search(db, agent, q, limit.unwrap_or(50))?;
    Ok(Json(view))
}

// --- Topics ---

#[post("/api/v1/topics", format = "json", data = "<body>")]
pub fn create_topic(db: &State<Db>, body: Json<CreateTopicBody>) -> Result<Json<Topic>, ApiError> {
    let kind = TopicKind::parse(body.kind.as_deref().unwrap_or(""))?;
    let topic = mail::create_topic(db, &body.name, kind)?;
    Ok(Json(topic))
}

#[get("/api/v1/topics?<agent>")]
pub fn list_topics(db: &State<Db>, agent: Option<&str>) -> Result<Json<Vec<Topic>>, ApiError> {
    Ok(Json(mail::list_topics(db, agent)?))
}

#[post("/api/v1/topics/<topic>/subscribe", format = "json", data = "<body>")]
pub fn subscribe_topic(
    db: &State<Db>,
    topic: &str,
    body: Json<SubscribeBody>,
) -> Result<Json<Topic>, ApiError> {
    let kind = TopicKind::parse(body.kind.as_deref().unwrap_or(""))?;
    let topic = mail::subscribe(db, topic, &body.agent, kind)?;
    Ok(Json(topic))
}

#[post(
    "/api/v1/topics/<topic>/unsubscribe",
    format = "json",
    data = "<body>"
)]
pub fn unsubscribe_topic(
    db: &State<Db>,
    topic: &str,
    body: Json<AgentBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let removed = mail::unsubscribe(db, topic, &body.agent)?;
    Ok(Json(serde_json::json!({"removed": removed})))
}
