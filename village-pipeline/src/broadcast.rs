//! The injected broadcast interface (spec §6): `emitToVillage`/`emitToRepo`
//! become one trait, `BroadcastSink`, so callers can supply a real
//! WebSocket room-relay (out of scope per spec §1) or a logging/in-memory
//! stub for tests without the pipeline caring which.

use std::sync::Mutex;

use serde_json::Value;

/// Destination room for a broadcast: a village (rollout notifications,
/// aggregate house summaries) or a single repo (per-house activity).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastRoom {
    Village(String),
    Repo(String),
}

/// A delivered message: room, event name, and JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Broadcast {
    pub room: BroadcastRoom,
    pub event: String,
    pub payload: Value,
}

/// Injected sink for `emitToVillage`/`emitToRepo` (spec §6). The WebSocket
/// transport itself is out of scope (spec §1); this is the seam it plugs
/// into.
pub trait BroadcastSink: Send + Sync {
    fn emit_to_village(&self, village_id: &str, event: &str, payload: Value);
    fn emit_to_repo(&self, repo_id: &str, event: &str, payload: Value);
}

/// Default sink: logs at `info!` and retains every delivered broadcast for
/// inspection, used by tests and by `villaged` when no room-relay feature
/// is enabled.
#[derive(Default)]
pub struct LoggingBroadcastSink {
    sent: Mutex<Vec<Broadcast>>,
}

impl LoggingBroadcastSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Broadcast> {
        self.sent.lock().expect("broadcast log mutex poisoned").clone()
    }
}

impl BroadcastSink for LoggingBroadcastSink {
    fn emit_to_village(&self, village_id: &str, event: &str, payload: Value) {
        tracing::info!(village_id, event, "emit_to_village");
        self.sent.lock().expect("broadcast log mutex poisoned").push(Broadcast {
            room: BroadcastRoom::Village(village_id.to_string()),
            event: event.to_string(),
            payload,
        });
    }

    fn emit_to_repo(&self, repo_id: &str, event: &str, payload: Value) {
        tracing::info!(repo_id, event, "emit_to_repo");
        self.sent.lock().expect("broadcast log mutex poisoned").push(Broadcast {
            room: BroadcastRoom::Repo(repo_id.to_string()),
            event: event.to_string(),
            payload,
        });
    }
}
