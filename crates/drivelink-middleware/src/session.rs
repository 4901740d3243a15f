//! [`SessionHandle`] – a handler's view of one connected producer.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use drivelink_types::{ControlCommand, SessionId, events};
use serde_json::{Value, json};

use crate::registry::SessionRegistry;

/// Identity of one session plus the means to answer it.
///
/// Cloning is cheap; all clones address the same session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    peer: SocketAddr,
    connected_at: DateTime<Utc>,
    registry: Arc<SessionRegistry>,
}

impl SessionHandle {
    pub fn new(id: SessionId, peer: SocketAddr, registry: Arc<SessionRegistry>) -> Self {
        Self {
            id,
            peer,
            connected_at: Utc::now(),
            registry,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// `false` once the producer has disconnected.
    pub fn is_open(&self) -> bool {
        self.registry.contains(self.id)
    }

    /// Emit `event` with `payload` to this session only.
    ///
    /// Returns `false` when the session has already closed; the frame is
    /// dropped silently.
    pub fn emit(&self, event: &str, payload: &Value) -> bool {
        self.registry.emit(self.id, event, payload)
    }

    /// Emit `command` as a `steer` event.
    pub fn send_control(&self, command: &ControlCommand) -> bool {
        self.emit(events::STEER, &steer_payload(command))
    }
}

/// Wire payload of a `steer` event. Both values travel as decimal text.
pub fn steer_payload(command: &ControlCommand) -> Value {
    json!({
        "steering_angle": command.steering_angle.to_string(),
        "throttle": command.throttle.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steer_payload_uses_decimal_strings() {
        let payload = steer_payload(&ControlCommand {
            steering_angle: -0.25,
            throttle: 0.5,
        });
        assert_eq!(payload["steering_angle"], "-0.25");
        assert_eq!(payload["throttle"], "0.5");
    }

    #[test]
    fn zero_command_encodes_as_plain_zero() {
        let payload = steer_payload(&ControlCommand::zero());
        assert_eq!(payload["steering_angle"], "0");
        assert_eq!(payload["throttle"], "0");
    }

    #[tokio::test]
    async fn send_control_targets_own_session() {
        let registry = Arc::new(SessionRegistry::new());
        let id = SessionId::new();
        let mut rx = registry.register(id);
        let handle = SessionHandle::new(id, "127.0.0.1:9".parse().unwrap(), Arc::clone(&registry));

        assert!(handle.is_open());
        assert!(handle.send_control(&ControlCommand::zero()));
        let frame = rx.recv().await.unwrap();
        assert!(frame.starts_with("42[\"steer\""));

        registry.unregister(id);
        assert!(!handle.is_open());
        assert!(!handle.send_control(&ControlCommand::zero()));
    }
}
