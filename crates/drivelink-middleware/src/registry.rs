//! Per-session outbound routing.
//!
//! Every connected session owns one unbounded outbound queue, drained by the
//! task that writes to its socket. [`SessionRegistry::emit`] encodes an event
//! into its wire frame and pushes it onto exactly one session's queue, so a
//! response can never reach another producer.
//!
//! Emission is fire-and-forget: it never waits on the socket, and emitting to
//! a session that has already gone away is a silent no-op reported as
//! `false`.

use std::collections::HashMap;
use std::sync::RwLock;

use drivelink_types::SessionId;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::wire;

/// Receiving half of a session's outbound queue: encoded wire frames.
pub type OutboundReceiver = mpsc::UnboundedReceiver<String>;

/// Shared table of live sessions and their outbound queues.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, mpsc::UnboundedSender<String>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` and return the receiver its socket writer drains.
    ///
    /// Re-registering an id replaces the previous queue.
    pub fn register(&self, session: SessionId) -> OutboundReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.write().insert(session, tx);
        rx
    }

    /// Forget `session`. Later emissions to it return `false`.
    pub fn unregister(&self, session: SessionId) {
        self.write().remove(&session);
    }

    pub fn contains(&self, session: SessionId) -> bool {
        self.read().contains_key(&session)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encode `event` with `payload` and queue it for `session` only.
    ///
    /// Returns `true` when the frame was queued, `false` when the session is
    /// unknown or its writer has stopped.
    pub fn emit(&self, session: SessionId, event: &str, payload: &Value) -> bool {
        self.send_raw(session, wire::encode_event(event, payload))
    }

    /// Queue an already encoded wire frame for `session`.
    pub fn send_raw(&self, session: SessionId, frame: String) -> bool {
        let sessions = self.read();
        let Some(tx) = sessions.get(&session) else {
            debug!(session = %session, "emit to unknown session dropped");
            return false;
        };
        if tx.send(frame).is_err() {
            debug!(session = %session, "emit to closed session dropped");
            return false;
        }
        true
    }

    // A poisoned lock still guards a consistent map.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SessionId, mpsc::UnboundedSender<String>>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SessionId, mpsc::UnboundedSender<String>>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{EnginePacket, SocketPacket};
    use serde_json::json;

    fn event_name(frame: &str) -> String {
        match wire::decode(frame).unwrap() {
            EnginePacket::Message(SocketPacket::Event { name, .. }) => name,
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn emit_reaches_only_the_target_session() {
        let registry = SessionRegistry::new();
        let a = SessionId::new();
        let b = SessionId::new();
        let mut rx_a = registry.register(a);
        let mut rx_b = registry.register(b);

        assert!(registry.emit(a, "steer", &json!({"throttle": "1"})));

        assert_eq!(event_name(&rx_a.recv().await.unwrap()), "steer");
        assert!(rx_b.try_recv().is_err(), "session b must not see session a's frame");
    }

    #[test]
    fn emit_to_unknown_session_is_false() {
        let registry = SessionRegistry::new();
        assert!(!registry.emit(SessionId::new(), "steer", &json!({})));
    }

    #[test]
    fn emit_after_unregister_is_false() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        let _rx = registry.register(id);
        assert!(registry.contains(id));
        registry.unregister(id);
        assert!(!registry.contains(id));
        assert!(!registry.emit(id, "steer", &json!({})));
        assert!(registry.is_empty());
    }

    #[test]
    fn emit_after_receiver_dropped_is_false() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        drop(registry.register(id));
        assert!(!registry.emit(id, "steer", &json!({})));
    }

    #[tokio::test]
    async fn frames_keep_emission_order() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        let mut rx = registry.register(id);
        for i in 0..5 {
            registry.emit(id, &format!("e{i}"), &json!(null));
        }
        for i in 0..5 {
            assert_eq!(event_name(&rx.recv().await.unwrap()), format!("e{i}"));
        }
    }
}
