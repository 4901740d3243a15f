//! Explicit event-name → handler registration.
//!
//! The channel never interprets events itself. Each decoded Socket.IO event
//! is looked up in an [`EventRouter`]; unregistered names are ignored, and
//! registered ones are validated into an [`InboundEvent`] before the handler
//! sees them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drivelink_types::{DriveError, InboundEnvelope, InboundEvent, events};
use serde_json::Value;
use tracing::{debug, warn};

use crate::session::SessionHandle;

/// Something that reacts to the inbound events of a session.
///
/// # Contract
///
/// * Events of one session are delivered one at a time, in arrival order.
/// * Handlers are shared by every session and may run concurrently for
///   different sessions.
/// * An `Err` is logged by the router and never closes the session.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, session: &SessionHandle, envelope: InboundEnvelope) -> Result<(), DriveError>;
}

/// An event as read off the socket, before validation.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub seq: u64,
    pub received_at: DateTime<Utc>,
    pub name: String,
    pub payload: Option<Value>,
}

impl RawEvent {
    pub fn new(seq: u64, name: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            seq,
            received_at: Utc::now(),
            name: name.into(),
            payload,
        }
    }

    pub fn connect(seq: u64) -> Self {
        Self::new(seq, events::CONNECT, None)
    }

    pub fn disconnect(seq: u64) -> Self {
        Self::new(seq, events::DISCONNECT, None)
    }
}

/// Table of registered handlers, keyed by event name.
#[derive(Clone, Default)]
pub struct EventRouter {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `event` to `handler` (builder-style). A later registration for
    /// the same name replaces the earlier one.
    pub fn on(mut self, event: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(event.into(), handler);
        self
    }

    pub fn handles(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    /// Validate `raw` and run its handler. Every failure is logged here and
    /// contained.
    pub async fn dispatch(&self, session: &SessionHandle, raw: RawEvent) {
        let Some(handler) = self.handlers.get(&raw.name) else {
            debug!(session = %session.id(), seq = raw.seq, event = %raw.name, "no handler registered; event ignored");
            return;
        };

        let event = match InboundEvent::decode(&raw.name, raw.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(session = %session.id(), seq = raw.seq, event = %raw.name, error = %e, "rejected inbound event");
                return;
            }
        };

        let envelope = InboundEnvelope {
            session: session.id(),
            seq: raw.seq,
            received_at: raw.received_at,
            event,
        };
        if let Err(e) = handler.handle(session, envelope).await {
            warn!(session = %session.id(), seq = raw.seq, event = %raw.name, error = %e, "event handler failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionRegistry;
    use drivelink_types::SessionId;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(u64, String)>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, _session: &SessionHandle, envelope: InboundEnvelope) -> Result<(), DriveError> {
            self.seen
                .lock()
                .unwrap()
                .push((envelope.seq, envelope.event.name().to_string()));
            if envelope.seq == 99 {
                return Err(DriveError::Inference("boom".to_string()));
            }
            Ok(())
        }
    }

    fn session() -> SessionHandle {
        let registry = Arc::new(SessionRegistry::new());
        SessionHandle::new(SessionId::new(), "127.0.0.1:9".parse().unwrap(), registry)
    }

    #[tokio::test]
    async fn dispatches_registered_events_only() {
        let recorder = Arc::new(Recorder::default());
        let router = EventRouter::new()
            .on(events::CONNECT, recorder.clone())
            .on(events::TELEMETRY, recorder.clone());
        let session = session();

        router.dispatch(&session, RawEvent::connect(0)).await;
        router.dispatch(&session, RawEvent::new(1, "unknown", None)).await;
        router
            .dispatch(&session, RawEvent::new(2, events::TELEMETRY, Some(json!({"speed": 1}))))
            .await;

        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![(0, "connect".to_string()), (2, "telemetry".to_string())]);
        assert!(router.handles(events::CONNECT));
        assert!(!router.handles("unknown"));
    }

    #[tokio::test]
    async fn invalid_payload_never_reaches_handler() {
        let recorder = Arc::new(Recorder::default());
        let router = EventRouter::new().on(events::TELEMETRY, recorder.clone());

        router
            .dispatch(&session(), RawEvent::new(0, events::TELEMETRY, Some(json!([1, 2]))))
            .await;

        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn handler_errors_are_contained() {
        let recorder = Arc::new(Recorder::default());
        let router = EventRouter::new().on("custom", recorder.clone());
        let session = session();

        router.dispatch(&session, RawEvent::new(99, "custom", None)).await;
        router.dispatch(&session, RawEvent::new(100, "custom", None)).await;

        assert_eq!(recorder.seen.lock().unwrap().len(), 2);
    }
}
