use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};

// --- Boundary enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" | "" => Ok(Priority::Normal),
            "urgent" => Ok(Priority::Urgent),
            other => Err(Error::invalid(format!("unknown priority '{other}'"))),
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Per-recipient message state. `Deleted` is a terminal tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientState {
    Inbox,
    Archived,
    Trash,
    Deleted,
}

impl RecipientState {
    pub fn as_str(self) -> &'static str {
        match self {
            RecipientState::Inbox => "inbox",
            RecipientState::Archived => "archived",
            RecipientState::Trash => "trash",
            RecipientState::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "inbox" => Ok(RecipientState::Inbox),
            "archived" => Ok(RecipientState::Archived),
            "trash" => Ok(RecipientState::Trash),
            "deleted" => Ok(RecipientState::Deleted),
            other => Err(Error::invalid(format!("unknown state '{other}'"))),
        }
    }

    /// The recipient state machine. State-changing events only; flag events
    /// (read, star, snooze, ack) leave the state untouched.
    pub fn transition(self, event: StateEvent) -> Result<RecipientState> {
        use RecipientState as S;
        use StateEvent as E;
        if self == S::Deleted {
            return Err(Error::invalid("message is deleted"));
        }
        match (event, self) {
            (E::Archive, S::Inbox) | (E::Archive, S::Trash) => Ok(S::Archived),
            (E::Trash, S::Inbox) | (E::Trash, S::Archived) => Ok(S::Trash),
            (E::Restore, S::Archived) | (E::Restore, S::Trash) => Ok(S::Inbox),
            (E::Delete, _) => Ok(S::Deleted),
            (E::Archive, from) | (E::Trash, from) | (E::Restore, from) => {
                Err(Error::invalid(format!(
                    "cannot {} a message in state {}",
                    event.as_str(),
                    from.as_str()
                )))
            }
        }
    }
}

/// State-changing transitions of the recipient FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    Archive,
    Trash,
    Restore,
    Delete,
}

impl StateEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            StateEvent::Archive => "archive",
            StateEvent::Trash => "trash",
            StateEvent::Restore => "restore",
            StateEvent::Delete => "delete",
        }
    }
}

/// Everything a client may ask UpdateState to do: state transitions plus
/// the orthogonal flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateAction {
    Transition(StateEvent),
    Read,
    MarkUnread,
    Snooze,
    Star,
    Unstar,
}

impl StateAction {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "archive" => Ok(StateAction::Transition(StateEvent::Archive)),
            "trash" => Ok(StateAction::Transition(StateEvent::Trash)),
            "restore" => Ok(StateAction::Transition(StateEvent::Restore)),
            "delete" => Ok(StateAction::Transition(StateEvent::Delete)),
            "read" => Ok(StateAction::Read),
            "mark_unread" => Ok(StateAction::MarkUnread),
            "snooze" => Ok(StateAction::Snooze),
            "star" => Ok(StateAction::Star),
            "unstar" => Ok(StateAction::Unstar),
            other => Err(Error::invalid(format!("unknown action '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Busy,
    Active,
    Idle,
    Offline,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Busy => "busy",
            AgentStatus::Active => "active",
            AgentStatus::Idle => "idle",
            AgentStatus::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicKind {
    Direct,
    Broadcast,
    Queue,
}

impl TopicKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TopicKind::Direct => "direct",
            TopicKind::Broadcast => "broadcast",
            TopicKind::Queue => "queue",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "direct" => Ok(TopicKind::Direct),
            "broadcast" | "" => Ok(TopicKind::Broadcast),
            "queue" => Ok(TopicKind::Queue),
            other => Err(Error::invalid(format!("unknown topic kind '{other}'"))),
        }
    }
}

// --- Entities ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_session_id: Option<String>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_active_at: Option<i64>,
    pub status: AgentStatus,
}

/// A message joined with the requesting recipient's projection row.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InboxMessage {
    pub id: String,
    pub sender: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub subject: String,
    pub body: String,
    pub priority: Priority,
    pub thread_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_at: Option<i64>,
    pub metadata: serde_json::Value,
    pub created_at: i64,
    pub seq: i64,
    pub state: RecipientState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acked_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snoozed_until: Option<i64>,
    pub starred: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Topic {
    pub id: String,
    pub name: String,
    pub kind: TopicKind,
    pub subscriber_count: i64,
    pub created_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionIdentity {
    pub session_id: String,
    pub agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ActivityEntry {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub kind: String,
    pub description: String,
    pub metadata: serde_json::Value,
    pub created_at: i64,
}

// --- Requests ---

#[derive(Debug, Deserialize)]
pub struct SendMail {
    pub sender: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub deadline_at: Option<i64>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReplyToThread {
    pub sender: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PublishMail {
    pub sender: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStateBody {
    pub agent: String,
    pub message_id: String,
    pub action: String,
    #[serde(default)]
    pub snooze_until: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AckBody {
    pub agent: String,
    pub message_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AgentBody {
    pub agent: String,
}

#[derive(Debug, Deserialize)]
pub struct ReadMessageBody {
    pub agent: String,
    #[serde(default)]
    pub include_thread: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateTopicBody {
    pub name: String,
    #[serde(default)]
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteSessionBody {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RecordActivityBody {
    #[serde(default)]
    pub agent: Option<String>,
    pub kind: String,
    pub description: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterAgent {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub project_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAgent {
    #[serde(default)]
    pub project_key: Option<String>,
    #[serde(default)]
    pub new_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatBody {
    pub agent: String,
    #[serde(default)]
    pub session_start: bool,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EnsureIdentityBody {
    pub session_id: String,
    #[serde(default)]
    pub project_key: Option<String>,
    #[serde(default)]
    pub preferred_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SaveIdentityBody {
    pub session_id: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub git_branch: Option<String>,
    #[serde(default)]
    pub state: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeBody {
    pub agent: String,
    #[serde(default)]
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionLifecycleBody {
    pub session_id: String,
    pub agent: String,
}

#[derive(Debug, Deserialize)]
pub struct PollChangesBody {
    pub agent: String,
    #[serde(default)]
    pub offsets: HashMap<String, i64>,
    #[serde(default)]
    pub wait_secs: Option<u64>,
}

/// Inbox filter options, shared by the REST query string and gRPC request.
#[derive(Debug, Default, Clone)]
pub struct InboxFilter {
    pub unread_only: bool,
    pub state_in: Vec<RecipientState>,
    pub topic: Option<String>,
    pub since_offset: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub starred_only: bool,
}

// --- Responses ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SendReceipt {
    pub message_id: String,
    pub thread_id: String,
    pub delivered_to: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecipientStateView {
    pub message_id: String,
    pub state: RecipientState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acked_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snoozed_until: Option<i64>,
    pub starred: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AgentStatusView {
    pub agent: String,
    pub status: AgentStatus,
    pub unread: i64,
    pub latest_seq: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PollChangesView {
    pub messages: Vec<InboxMessage>,
    pub new_offsets: HashMap<String, i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SearchHit {
    #[serde(flatten)]
    pub message: InboxMessage,
    pub rank: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchView {
    pub hits: Vec<SearchHit>,
    pub count: usize,
    pub query: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DashboardStats {
    pub agents: i64,
    pub messages: i64,
    pub unread: i64,
    pub topics: i64,
    pub activities_24h: i64,
    pub recently_active: Vec<Agent>,
}
