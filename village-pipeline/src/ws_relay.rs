//! Axum WebSocket room-relay `BroadcastSink`, enabled by the `ws-relay`
//! Cargo feature. One broadcast channel per room name; a client subscribes
//! to a room by connecting to `/ws/village/:id` or `/ws/repo/:id` and
//! receives every `Broadcast` sent to that room from then on.

use std::collections::HashMap;
use std::sync::Mutex;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::broadcast::{Broadcast, BroadcastRoom, BroadcastSink};

const ROOM_BUFFER: usize = 256;

struct Rooms {
    village: HashMap<String, broadcast::Sender<Broadcast>>,
    repo: HashMap<String, broadcast::Sender<Broadcast>>,
}

impl Rooms {
    fn new() -> Self {
        Self { village: HashMap::new(), repo: HashMap::new() }
    }
}

/// `BroadcastSink` that fans broadcasts out to whatever WebSocket clients
/// are currently subscribed to the target room, lazily creating a room's
/// channel on first use.
pub struct WsRelaySink {
    rooms: Mutex<Rooms>,
}

impl Default for WsRelaySink {
    fn default() -> Self {
        Self { rooms: Mutex::new(Rooms::new()) }
    }
}

impl WsRelaySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn village_sender(&self, village_id: &str) -> broadcast::Sender<Broadcast> {
        let mut rooms = self.rooms.lock().expect("ws relay room map poisoned");
        rooms
            .village
            .entry(village_id.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_BUFFER).0)
            .clone()
    }

    fn repo_sender(&self, repo_id: &str) -> broadcast::Sender<Broadcast> {
        let mut rooms = self.rooms.lock().expect("ws relay room map poisoned");
        rooms.repo.entry(repo_id.to_string()).or_insert_with(|| broadcast::channel(ROOM_BUFFER).0).clone()
    }
}

impl BroadcastSink for WsRelaySink {
    fn emit_to_village(&self, village_id: &str, event: &str, payload: Value) {
        let sender = self.village_sender(village_id);
        // No subscribers is not an error: the room simply has nobody listening yet.
        let _ = sender.send(Broadcast {
            room: BroadcastRoom::Village(village_id.to_string()),
            event: event.to_string(),
            payload,
        });
    }

    fn emit_to_repo(&self, repo_id: &str, event: &str, payload: Value) {
        let sender = self.repo_sender(repo_id);
        let _ = sender.send(Broadcast {
            room: BroadcastRoom::Repo(repo_id.to_string()),
            event: event.to_string(),
            payload,
        });
    }
}

/// Router exposing `/ws/village/:id` and `/ws/repo/:id` upgrade endpoints.
/// Mount alongside the observability router in `main.rs`.
pub fn router(sink: std::sync::Arc<WsRelaySink>) -> Router {
    Router::new()
        .route("/ws/village/{id}", get(village_ws_handler))
        .route("/ws/repo/{id}", get(repo_ws_handler))
        .with_state(sink)
}

async fn village_ws_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    State(sink): State<std::sync::Arc<WsRelaySink>>,
) -> impl IntoResponse {
    let rx = sink.village_sender(&id).subscribe();
    ws.on_upgrade(move |socket| relay_room(socket, rx))
}

async fn repo_ws_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    State(sink): State<std::sync::Arc<WsRelaySink>>,
) -> impl IntoResponse {
    let rx = sink.repo_sender(&id).subscribe();
    ws.on_upgrade(move |socket| relay_room(socket, rx))
}

async fn relay_room(mut socket: WebSocket, mut rx: broadcast::Receiver<Broadcast>) {
    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Ok(broadcast) => {
                        let text = serde_json::json!({"event": broadcast.event, "payload": broadcast.payload}).to_string();
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                // Clients don't send anything meaningful; a closed/errored
                // recv just means the peer went away.
                if incoming.is_none() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn emit_with_no_subscriber_does_not_panic() {
        let sink = WsRelaySink::new();
        sink.emit_to_village("v1", "rollout_started", json!({"a": 1}));
        sink.emit_to_repo("r1", "house.activity", json!({"b": 2}));
    }

    #[tokio::test]
    async fn subscriber_receives_broadcast_sent_after_subscribe() {
        let sink = WsRelaySink::new();
        let mut rx = sink.village_sender("v1").subscribe();
        sink.emit_to_village("v1", "rollout_started", json!({"a": 1}));
        let received = rx.recv().await.expect("broadcast delivered");
        assert_eq!(received.event, "rollout_started");
    }
}
