// Route module decomposition: each service area in its own file.
// Everything mounts under /api/v1/; route functions are re-exported for
// the mount in lib.rs.

mod activity;
mod agents;
mod mail;
mod sessions;
mod stream;
mod system;

pub use activity::{activity_feed, record_activity};
pub use agents::{
    delete_agent, ensure_identity, get_agent, heartbeat, list_agents, register_agent,
    save_identity, update_agent,
};
pub use mail::{
    ack_message, agent_status, archive_thread, create_topic, delete_message, delete_thread,
    fetch_inbox, list_topics, mark_thread_unread, poll_changes, publish_message, read_message,
    read_thread, reply_to_thread, search_messages, send_message, subscribe_topic,
    unsubscribe_topic, update_message_state,
};
pub use sessions::{complete_session, get_session, list_sessions, start_session};
pub use stream::push_socket;
pub use system::{Started, health, not_found, stats};
