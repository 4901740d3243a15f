//! `drivelink-middleware` – the event channel
//!
//! Moves Socket.IO events between simulator connections and the handlers
//! that answer them, without caring what the events mean.
//!
//! # Modules
//!
//! - [`wire`] – Engine.IO / Socket.IO text framing.
//! - [`registry`] – Per-session outbound queues; emission targets exactly one
//!   session.
//! - [`session`] – [`SessionHandle`], a handler's view of its connection.
//! - [`router`] – Explicit event-name → [`EventHandler`] registration.
//! - [`channel`] – WebSocket server with one connection task and one ordered
//!   worker per session.

pub mod channel;
pub mod registry;
pub mod router;
pub mod session;
pub mod wire;

pub use channel::{ChannelConfig, EventChannel, OverflowPolicy};
pub use registry::{OutboundReceiver, SessionRegistry};
pub use router::{EventHandler, EventRouter, RawEvent};
pub use session::{SessionHandle, steer_payload};
pub use wire::EngineVersion;
