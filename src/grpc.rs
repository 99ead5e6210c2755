//! Binary RPC transport: tonic services over the same core the JSON
//! gateway calls. `SubscribeInbox` is the server-streaming push path:
//! backfill from the caller's offsets, then tail the notification hub.

use std::collections::HashMap;
use std::time::Duration;

use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

use crate::actor::Addr;
use crate::activity::{self, ActivityMsg};
use crate::db::Db;
use crate::identity;
use crate::mail::{self, MailService, ThreadOp};
use crate::models::{
    Agent, InboxFilter, InboxMessage, Priority, PublishMail, RecipientState, RecipientStateView,
    ReplyToThread, SendMail, SessionIdentity, StateAction, Topic, TopicKind,
};
use crate::proto;
use crate::proto::activity_service_server::{ActivityService, ActivityServiceServer};
use crate::proto::agent_service_server::{AgentService, AgentServiceServer};
use crate::proto::mail_service_server::{MailService as MailRpc, MailServiceServer};
use crate::proto::session_service_server::{SessionService, SessionServiceServer};
use crate::proto::stats_service_server::{StatsService, StatsServiceServer};

/// Everything the gRPC handlers need, cloned per service.
#[derive(Clone)]
pub struct GrpcContext {
    pub mail: MailService,
    pub db: Db,
    pub activity: Addr<ActivityMsg>,
    pub started_at: std::time::Instant,
}

/// Serve all five services on the given port until the process exits.
pub async fn serve(ctx: GrpcContext, port: u16) -> Result<(), tonic::transport::Error> {
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!(%addr, "gRPC server listening");
    tonic::transport::Server::builder()
        .add_service(MailServiceServer::new(ctx.clone()))
        .add_service(AgentServiceServer::new(ctx.clone()))
        .add_service(SessionServiceServer::new(ctx.clone()))
        .add_service(ActivityServiceServer::new(ctx.clone()))
        .add_service(StatsServiceServer::new(ctx))
        .serve(addr)
        .await
}

// --- Wire conversions ---

fn opt_str(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

fn opt_i64(v: i64) -> Option<i64> {
    if v == 0 { None } else { Some(v) }
}

fn message_to_proto(m: &InboxMessage) -> proto::MessageView {
    proto::MessageView {
        id: m.id.clone(),
        sender: m.sender.clone(),
        subject: m.subject.clone(),
        body: m.body.clone(),
        priority: m.priority.as_str().to_string(),
        thread_id: m.thread_id.clone(),
        parent_id: m.parent_id.clone().unwrap_or_default(),
        topic: m.topic.clone().unwrap_or_default(),
        deadline_at: m.deadline_at.unwrap_or(0),
        metadata_json: m.metadata.to_string(),
        created_at: m.created_at,
        seq: m.seq,
        state: m.state.as_str().to_string(),
        read_at: m.read_at.unwrap_or(0),
        acked_at: m.acked_at.unwrap_or(0),
        snoozed_until: m.snoozed_until.unwrap_or(0),
        starred: m.starred,
    }
}

fn agent_to_proto(a: &Agent) -> proto::AgentView {
    proto::AgentView {
        id: a.id.clone(),
        name: a.name.clone(),
        project_key: a.project_key.clone().unwrap_or_default(),
        current_session_id: a.current_session_id.clone().unwrap_or_default(),
        created_at: a.created_at,
        last_active_at: a.last_active_at.unwrap_or(0),
        status: a.status.as_str().to_string(),
    }
}

fn topic_to_proto(t: &Topic) -> proto::TopicView {
    proto::TopicView {
        id: t.id.clone(),
        name: t.name.clone(),
        kind: t.kind.as_str().to_string(),
        subscriber_count: t.subscriber_count,
        created_at: t.created_at,
    }
}

fn session_to_proto(s: &SessionIdentity) -> proto::SessionView {
    proto::SessionView {
        session_id: s.session_id.clone(),
        agent: s.agent.clone(),
        project_key: s.project_key.clone().unwrap_or_default(),
        git_branch: s.git_branch.clone().unwrap_or_default(),
        cwd: s.cwd.clone().unwrap_or_default(),
        created_at: s.created_at,
        updated_at: s.updated_at,
    }
}

fn state_to_proto(v: &RecipientStateView) -> proto::UpdateStateResponse {
    proto::UpdateStateResponse {
        state: v.state.as_str().to_string(),
        read_at: v.read_at.unwrap_or(0),
        acked_at: v.acked_at.unwrap_or(0),
        snoozed_until: v.snoozed_until.unwrap_or(0),
        starred: v.starred,
    }
}

fn offsets_from_proto(offsets: &[proto::TopicOffset]) -> HashMap<String, i64> {
    offsets
        .iter()
        .map(|o| (o.topic.clone(), o.seq))
        .collect()
}

fn offsets_to_proto(offsets: &HashMap<String, i64>) -> Vec<proto::TopicOffset> {
    let mut out: Vec<proto::TopicOffset> = offsets
        .iter()
        .map(|(topic, seq)| proto::TopicOffset {
            topic: topic.clone(),
            seq: *seq,
        })
        .collect();
    out.sort_by(|a, b| a.topic.cmp(&b.topic));
    out
}

fn parse_metadata(json: &str) -> Result<Option<serde_json::Value>, Status> {
    if json.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(json)
        .map(Some)
        .map_err(|e| Status::invalid_argument(format!("metadata_json: {e}")))
}

// --- Mail ---

#[tonic::async_trait]
impl MailRpc for GrpcContext {
    async fn send(
        &self,
        request: Request<proto::SendRequest>,
    ) -> Result<Response<proto::SendResponse>, Status> {
        let req = request.into_inner();
        let receipt = self
            .mail
            .send(SendMail {
                sender: req.sender,
                recipients: req.recipients,
                subject: req.subject,
                body: req.body,
                priority: Priority::parse(&req.priority)?,
                thread_id: opt_str(req.thread_id),
                parent_id: opt_str(req.parent_id),
                deadline_at: opt_i64(req.deadline_at),
                metadata: parse_metadata(&req.metadata_json)?,
                idempotency_key: opt_str(req.idempotency_key),
            })
            .await?;
        Ok(Response::new(proto::SendResponse {
            message_id: receipt.message_id,
            thread_id: receipt.thread_id,
            delivered_to: receipt.delivered_to,
        }))
    }

    async fn fetch_inbox(
        &self,
        request: Request<proto::FetchInboxRequest>,
    ) -> Result<Response<proto::FetchInboxResponse>, Status> {
        let req = request.into_inner();
        let mut state_in = Vec::new();
        for s in &req.state_in {
            state_in.push(RecipientState::parse(s)?);
        }
        let filter = InboxFilter {
            unread_only: req.unread_only,
            state_in,
            topic: opt_str(req.topic),
            since_offset: opt_i64(req.since_offset),
            limit: opt_i64(req.limit),
            offset: opt_i64(req.offset),
            starred_only: req.starred_only,
        };
        let messages = mail::fetch_inbox(&self.db, &req.agent, &filter)?;
        Ok(Response::new(proto::FetchInboxResponse {
            messages: messages.iter().map(message_to_proto).collect(),
        }))
    }

    async fn read_message(
        &self,
        request: Request<proto::ReadMessageRequest>,
    ) -> Result<Response<proto::ReadMessageResponse>, Status> {
        let req = request.into_inner();
        let message = self
            .mail
            .read_message(req.agent.clone(), req.message_id)
            .await?;
        let thread = if req.include_thread {
            mail::read_thread(&self.db, &req.agent, &message.thread_id)?
                .iter()
                .map(message_to_proto)
                .collect()
        } else {
            Vec::new()
        };
        Ok(Response::new(proto::ReadMessageResponse {
            message: Some(message_to_proto(&message)),
            thread,
        }))
    }

    async fn read_thread(
        &self,
        request: Request<proto::ReadThreadRequest>,
    ) -> Result<Response<proto::ReadThreadResponse>, Status> {
        let req = request.into_inner();
        let messages = mail::read_thread(&self.db, &req.agent, &req.thread_id)?;
        Ok(Response::new(proto::ReadThreadResponse {
            messages: messages.iter().map(message_to_proto).collect(),
        }))
    }

    async fn reply_to_thread(
        &self,
        request: Request<proto::ReplyToThreadRequest>,
    ) -> Result<Response<proto::SendResponse>, Status> {
        let req = request.into_inner();
        let receipt = self
            .mail
            .reply_to_thread(
                req.thread_id,
                ReplyToThread {
                    sender: req.sender,
                    subject: opt_str(req.subject),
                    body: req.body,
                    priority: Priority::parse(&req.priority)?,
                    idempotency_key: opt_str(req.idempotency_key),
                },
            )
            .await?;
        Ok(Response::new(proto::SendResponse {
            message_id: receipt.message_id,
            thread_id: receipt.thread_id,
            delivered_to: receipt.delivered_to,
        }))
    }

    async fn update_state(
        &self,
        request: Request<proto::UpdateStateRequest>,
    ) -> Result<Response<proto::UpdateStateResponse>, Status> {
        let req = request.into_inner();
        let action = StateAction::parse(&req.action)?;
        let view = self
            .mail
            .update_state(req.agent, req.message_id, action, opt_i64(req.snooze_until))
            .await?;
        Ok(Response::new(state_to_proto(&view)))
    }

    async fn ack(
        &self,
        request: Request<proto::AckRequest>,
    ) -> Result<Response<proto::AckResponse>, Status> {
        let req = request.into_inner();
        let view = self.mail.ack(req.agent, req.message_id).await?;
        Ok(Response::new(proto::AckResponse {
            acked_at: view.acked_at.unwrap_or(0),
        }))
    }

    async fn delete_message(
        &self,
        request: Request<proto::AckRequest>,
    ) -> Result<Response<proto::UpdateStateResponse>, Status> {
        let req = request.into_inner();
        let view = self
            .mail
            .update_state(
                req.agent,
                req.message_id,
                StateAction::Transition(crate::models::StateEvent::Delete),
                None,
            )
            .await?;
        Ok(Response::new(state_to_proto(&view)))
    }

    async fn archive_thread(
        &self,
        request: Request<proto::ThreadOpRequest>,
    ) -> Result<Response<proto::ThreadOpResponse>, Status> {
        let req = request.into_inner();
        let affected = self
            .mail
            .thread_op(req.agent, req.thread_id, ThreadOp::Archive)
            .await?;
        Ok(Response::new(proto::ThreadOpResponse { affected }))
    }

    async fn delete_thread(
        &self,
        request: Request<proto::ThreadOpRequest>,
    ) -> Result<Response<proto::ThreadOpResponse>, Status> {
        let req = request.into_inner();
        let affected = self
            .mail
            .thread_op(req.agent, req.thread_id, ThreadOp::Delete)
            .await?;
        Ok(Response::new(proto::ThreadOpResponse { affected }))
    }

    async fn mark_thread_unread(
        &self,
        request: Request<proto::ThreadOpRequest>,
    ) -> Result<Response<proto::ThreadOpResponse>, Status> {
        let req = request.into_inner();
        let affected = self
            .mail
            .thread_op(req.agent, req.thread_id, ThreadOp::MarkUnread)
            .await?;
        Ok(Response::new(proto::ThreadOpResponse { affected }))
    }

    async fn get_status(
        &self,
        request: Request<proto::GetStatusRequest>,
    ) -> Result<Response<proto::GetStatusResponse>, Status> {
        let req = request.into_inner();
        let view = mail::get_status(&self.db, &req.agent)?;
        Ok(Response::new(proto::GetStatusResponse {
            agent: view.agent,
            status: view.status.as_str().to_string(),
            unread: view.unread,
            latest_seq: view.latest_seq,
        }))
    }

    async fn poll_changes(
        &self,
        request: Request<proto::PollChangesRequest>,
    ) -> Result<Response<proto::PollChangesResponse>, Status> {
        let req = request.into_inner();
        let offsets = offsets_from_proto(&req.offsets);
        let wait = (req.wait_secs > 0).then(|| Duration::from_secs(req.wait_secs as u64));
        let view = self.mail.poll_changes(&req.agent, &offsets, wait).await?;
        Ok(Response::new(proto::PollChangesResponse {
            messages: view.messages.iter().map(message_to_proto).collect(),
            new_offsets: offsets_to_proto(&view.new_offsets),
        }))
    }

    type SubscribeInboxStream = ReceiverStream<Result<proto::InboxEvent, Status>>;

    async fn subscribe_inbox(
        &self,
        request: Request<proto::SubscribeInboxRequest>,
    ) -> Result<Response<Self::SubscribeInboxStream>, Status> {
        let req = request.into_inner();
        let agent = req.agent.clone();
        // Validate the agent up front so a bad subscribe fails the call,
        // not the stream.
        mail::get_status(&self.db, &agent)?;

        let offsets = offsets_from_proto(&req.offsets);
        let db = self.db.clone();
        let hub = std::sync::Arc::clone(self.mail.hub());
        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            // Subscribe before the backfill query so nothing lands in the
            // gap between the two.
            let mut sub = hub.subscribe_agent(&agent);
            match mail::poll_changes_snapshot(&db, &agent, &offsets) {
                Ok(view) => {
                    for m in &view.messages {
                        let event = proto::InboxEvent {
                            message_id: m.id.clone(),
                            recipient: agent.clone(),
                            sender: m.sender.clone(),
                            subject_preview: crate::notify::NotifyEvent::preview(&m.subject),
                            priority: m.priority.as_str().to_string(),
                            thread_id: m.thread_id.clone(),
                            timestamp: m.created_at,
                        };
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(Status::from(e))).await;
                    return;
                }
            }
            // Tail until the caller hangs up; dropping `sub` releases the
            // hub registration.
            while let Some(ev) = sub.recv().await {
                let event = proto::InboxEvent {
                    message_id: ev.message_id,
                    recipient: ev.recipient,
                    sender: ev.sender,
                    subject_preview: ev.subject_preview,
                    priority: ev.priority.as_str().to_string(),
                    thread_id: ev.thread_id,
                    timestamp: ev.timestamp,
                };
                if tx.send(Ok(event)).await.is_err() {
                    break;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn publish(
        &self,
        request: Request<proto::PublishRequest>,
    ) -> Result<Response<proto::PublishResponse>, Status> {
        let req = request.into_inner();
        let receipt = self
            .mail
            .publish(
                req.topic,
                PublishMail {
                    sender: req.sender,
                    subject: req.subject,
                    body: req.body,
                    priority: Priority::parse(&req.priority)?,
                    idempotency_key: opt_str(req.idempotency_key),
                },
            )
            .await?;
        Ok(Response::new(proto::PublishResponse {
            message_id: receipt.message_id,
            delivered_to: receipt.delivered_to,
        }))
    }

    async fn subscribe(
        &self,
        request: Request<proto::SubscribeRequest>,
    ) -> Result<Response<proto::SubscribeResponse>, Status> {
        let req = request.into_inner();
        let kind = TopicKind::parse(&req.kind)?;
        let topic = mail::subscribe(&self.db, &req.topic, &req.agent, kind)?;
        Ok(Response::new(proto::SubscribeResponse {
            topic: Some(topic_to_proto(&topic)),
        }))
    }

    async fn unsubscribe(
        &self,
        request: Request<proto::UnsubscribeRequest>,
    ) -> Result<Response<proto::UnsubscribeResponse>, Status> {
        let req = request.into_inner();
        let removed = mail::unsubscribe(&self.db, &req.topic, &req.agent)?;
        Ok(Response::new(proto::UnsubscribeResponse { removed }))
    }

    async fn list_topics(
        &self,
        request: Request<proto::ListTopicsRequest>,
    ) -> Result<Response<proto::ListTopicsResponse>, Status> {
        let req = request.into_inner();
        let topics = mail::list_topics(&self.db, opt_str(req.agent).as_deref())?;
        Ok(Response::new(proto::ListTopicsResponse {
            topics: topics.iter().map(topic_to_proto).collect(),
        }))
    }

    async fn search(
        &self,
        request: Request<proto::SearchRequest>,
    ) -> Result<Response<proto::SearchResponse>, Status> {
        let req = request.into_inner();
        let limit = if req.limit > 0 { req.limit } else { 50 };
        let view = mail::search(&self.db, &req.agent, &req.query, limit)?;
        Ok(Response::new(proto::SearchResponse {
            hits: view
                .hits
                .iter()
                .map(|h| proto::SearchHit {
                    message: Some(message_to_proto(&h.message)),
                    rank: h.rank,
                })
                .collect(),
        }))
    }
}

// --- Agent ---

#[tonic::async_trait]
impl AgentService for GrpcContext {
    async fn register(
        &self,
        request: Request<proto::RegisterAgentRequest>,
    ) -> Result<Response<proto::AgentView>, Status> {
        let req = request.into_inner();
        let agent = identity::register_agent(
            &self.db,
            opt_str(req.name).as_deref(),
            opt_str(req.project_key).as_deref(),
        )?;
        activity::record(
            &self.activity,
            Some(&agent.name),
            activity::KIND_AGENT_REGISTERED,
            format!("agent {} registered", agent.name),
            None,
        );
        Ok(Response::new(agent_to_proto(&agent)))
    }

    async fn get(
        &self,
        request: Request<proto::GetAgentRequest>,
    ) -> Result<Response<proto::AgentView>, Status> {
        let req = request.into_inner();
        let agent = identity::get_agent(&self.db, &req.name)?;
        Ok(Response::new(agent_to_proto(&agent)))
    }

    async fn list(
        &self,
        request: Request<proto::ListAgentsRequest>,
    ) -> Result<Response<proto::ListAgentsResponse>, Status> {
        let req = request.into_inner();
        let agents = identity::list_agents(&self.db, opt_str(req.project_key).as_deref())?;
        Ok(Response::new(proto::ListAgentsResponse {
            agents: agents.iter().map(agent_to_proto).collect(),
        }))
    }

    async fn update(
        &self,
        request: Request<proto::UpdateAgentRequest>,
    ) -> Result<Response<proto::AgentView>, Status> {
        let req = request.into_inner();
        let agent = identity::update_agent(
            &self.db,
            &req.name,
            opt_str(req.new_name).as_deref(),
            opt_str(req.project_key).as_deref(),
        )?;
        Ok(Response::new(agent_to_proto(&agent)))
    }

    async fn delete(
        &self,
        request: Request<proto::DeleteAgentRequest>,
    ) -> Result<Response<proto::DeleteAgentResponse>, Status> {
        let req = request.into_inner();
        let deleted = identity::delete_agent(&self.db, &req.name)?;
        Ok(Response::new(proto::DeleteAgentResponse { deleted }))
    }

    async fn get_agents_status(
        &self,
        request: Request<proto::ListAgentsRequest>,
    ) -> Result<Response<proto::ListAgentsResponse>, Status> {
        AgentService::list(self, request).await
    }

    async fn heartbeat(
        &self,
        request: Request<proto::HeartbeatRequest>,
    ) -> Result<Response<proto::HeartbeatResponse>, Status> {
        let req = request.into_inner();
        let last_active_at = identity::heartbeat(
            &self.db,
            &req.agent,
            req.session_start,
            opt_str(req.session_id).as_deref(),
        )?;
        if req.session_start {
            activity::record(
                &self.activity,
                Some(&req.agent),
                activity::KIND_SESSION_STARTED,
                format!("{} started a session", req.agent),
                None,
            );
        }
        Ok(Response::new(proto::HeartbeatResponse { last_active_at }))
    }

    async fn ensure_identity(
        &self,
        request: Request<proto::EnsureIdentityRequest>,
    ) -> Result<Response<proto::AgentView>, Status> {
        let req = request.into_inner();
        let agent = identity::ensure_identity(
            &self.db,
            &req.session_id,
            opt_str(req.project_key).as_deref(),
            opt_str(req.preferred_name).as_deref(),
        )?;
        Ok(Response::new(agent_to_proto(&agent)))
    }

    async fn save_identity(
        &self,
        request: Request<proto::SaveIdentityRequest>,
    ) -> Result<Response<proto::SaveIdentityResponse>, Status> {
        let req = request.into_inner();
        let state = parse_metadata(&req.state_json)?;
        identity::save_identity(
            &self.db,
            &req.session_id,
            opt_str(req.cwd).as_deref(),
            opt_str(req.git_branch).as_deref(),
            state.as_ref(),
        )?;
        Ok(Response::new(proto::SaveIdentityResponse { saved: true }))
    }
}

// --- Session ---

#[tonic::async_trait]
impl SessionService for GrpcContext {
    async fn list(
        &self,
        request: Request<proto::ListSessionsRequest>,
    ) -> Result<Response<proto::ListSessionsResponse>, Status> {
        let req = request.into_inner();
        let sessions = identity::list_sessions(&self.db, opt_str(req.agent).as_deref())?;
        Ok(Response::new(proto::ListSessionsResponse {
            sessions: sessions.iter().map(session_to_proto).collect(),
        }))
    }

    async fn get(
        &self,
        request: Request<proto::GetSessionRequest>,
    ) -> Result<Response<proto::SessionView>, Status> {
        let req = request.into_inner();
        let session = identity::get_session(&self.db, &req.session_id)?;
        Ok(Response::new(session_to_proto(&session)))
    }

    async fn start(
        &self,
        request: Request<proto::SessionLifecycleRequest>,
    ) -> Result<Response<proto::SessionView>, Status> {
        let req = request.into_inner();
        let session = identity::start_session(&self.db, &req.session_id, &req.agent)?;
        activity::record(
            &self.activity,
            Some(&req.agent),
            activity::KIND_SESSION_STARTED,
            format!("session {} started", req.session_id),
            None,
        );
        Ok(Response::new(session_to_proto(&session)))
    }

    async fn complete(
        &self,
        request: Request<proto::SessionLifecycleRequest>,
    ) -> Result<Response<proto::SessionView>, Status> {
        let req = request.into_inner();
        let session = identity::complete_session(&self.db, &req.session_id)?;
        activity::record(
            &self.activity,
            Some(&session.agent),
            activity::KIND_SESSION_COMPLETED,
            format!("session {} completed", req.session_id),
            None,
        );
        Ok(Response::new(session_to_proto(&session)))
    }
}

// --- Activity ---

#[tonic::async_trait]
impl ActivityService for GrpcContext {
    async fn list(
        &self,
        request: Request<proto::ListActivityRequest>,
    ) -> Result<Response<proto::ListActivityResponse>, Status> {
        let req = request.into_inner();
        let limit = if req.limit > 0 { req.limit } else { 50 };
        let entries = activity::list_activities(
            &self.db,
            opt_str(req.agent).as_deref(),
            opt_str(req.kind).as_deref(),
            limit,
        )?;
        Ok(Response::new(proto::ListActivityResponse {
            entries: entries
                .iter()
                .map(|e| proto::ActivityView {
                    id: e.id,
                    agent: e.agent.clone().unwrap_or_default(),
                    kind: e.kind.clone(),
                    description: e.description.clone(),
                    metadata_json: e.metadata.to_string(),
                    created_at: e.created_at,
                })
                .collect(),
        }))
    }
}

// --- Stats ---

#[tonic::async_trait]
impl StatsService for GrpcContext {
    async fn get_dashboard_stats(
        &self,
        _request: Request<proto::DashboardStatsRequest>,
    ) -> Result<Response<proto::DashboardStatsResponse>, Status> {
        let stats = mail::dashboard_stats(&self.db)?;
        Ok(Response::new(proto::DashboardStatsResponse {
            agents: stats.agents,
            messages: stats.messages,
            unread: stats.unread,
            topics: stats.topics,
            activities_24h: stats.activities_24h,
            recently_active: stats.recently_active.iter().map(agent_to_proto).collect(),
        }))
    }

    async fn health_check(
        &self,
        _request: Request<proto::HealthCheckRequest>,
    ) -> Result<Response<proto::HealthCheckResponse>, Status> {
        Ok(Response::new(proto::HealthCheckResponse {
            status: "ok".to_string(),
            uptime_secs: self.started_at.elapsed().as_secs() as i64,
        }))
    }
}
