use rocket::futures::{SinkExt, StreamExt};
use rocket::{State, get};
use rocket_ws as ws;
use std::sync::Arc;
use tokio::time::interval;

use crate::mail::MailService;
use crate::ws::{
    ACTIVITY_INTERVAL, AGENT_UPDATE_INTERVAL, SnapshotMsg, SnapshotPool, UNREAD_INTERVAL, WsHub,
    envelope,
};

/// Push socket for browser clients. One connection per client, bound to
/// an agent at handshake; the server sends `connected` once, forwards
/// `new_message` instantly from the notification hub, and pushes periodic
/// `agent_update` / `activity` / `unread_count` snapshots. A client text
/// frame `{"type":"ping"}` is answered with `pong`. Reconnect and backoff
/// are the client's job; no state outlives the socket.
#[get("/api/v1/ws?<agent>")]
pub fn push_socket(
    socket: ws::WebSocket,
    agent: &str,
    mail: &State<MailService>,
    ws_hub: &State<WsHub>,
    snapshots: &State<SnapshotPool>,
) -> ws::Channel<'static> {
    let agent = agent.trim().to_string();
    let hub = Arc::clone(mail.hub());
    let ws_hub = ws_hub.inner().clone();
    let snapshots = Arc::clone(snapshots);

    socket.channel(move |mut stream| {
        Box::pin(async move {
            let mut sub = hub.subscribe_agent(&agent);
            let conn_id = ws_hub.register(&agent);

            let hello = envelope("connected", serde_json::json!({"agent": agent}));
            if stream.send(ws::Message::Text(hello)).await.is_err() {
                ws_hub.unregister(conn_id);
                return Ok(());
            }

            let mut agent_tick = interval(AGENT_UPDATE_INTERVAL);
            let mut activity_tick = interval(ACTIVITY_INTERVAL);
            let mut unread_tick = interval(UNREAD_INTERVAL);

            loop {
                tokio::select! {
                    incoming = stream.next() => {
                        match incoming {
                            Some(Ok(ws::Message::Text(text))) => {
                                let is_ping = serde_json::from_str::<serde_json::Value>(&text)
                                    .ok()
                                    .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(String::from))
                                    .is_some_and(|t| t == "ping");
                                if is_ping {
                                    let pong = envelope("pong", serde_json::json!({}));
                                    if stream.send(ws::Message::Text(pong)).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Some(Ok(ws::Message::Close(_))) | None => break,
                            Some(Err(_)) => break,
                            Some(Ok(_)) => {}
                        }
                    }
                    event = sub.recv() => {
                        match event {
                            Some(ev) => {
                                let frame = envelope(
                                    "new_message",
                                    serde_json::to_value(&ev).unwrap_or_default(),
                                );
                                if stream.send(ws::Message::Text(frame)).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = agent_tick.tick() => {
                        if let Ok(payload) = snapshots.ask(SnapshotMsg::AgentUpdate).await {
                            let frame = envelope("agent_update", payload);
                            if stream.send(ws::Message::Text(frame)).await.is_err() {
                                break;
                            }
                        }
                    }
                    _ = activity_tick.tick() => {
                        if let Ok(payload) = snapshots.ask(SnapshotMsg::Activity).await {
                            let frame = envelope("activity", payload);
                            if stream.send(ws::Message::Text(frame)).await.is_err() {
                                break;
                            }
                        }
                    }
                    _ = unread_tick.tick() => {
                        let agent = agent.clone();
                        if let Ok(payload) = snapshots
                            .ask(|reply| SnapshotMsg::UnreadCount { agent, reply })
                            .await
                        {
                            let frame = envelope("unread_count", payload);
                            if stream.send(ws::Message::Text(frame)).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }

            ws_hub.unregister(conn_id);
            Ok(())
        })
    })
}
