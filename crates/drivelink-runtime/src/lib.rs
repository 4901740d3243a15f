//! `drivelink-runtime` – the control loop
//!
//! Wires perception, inference and the throttle policy behind the event
//! channel.
//!
//! # Modules
//!
//! - [`predictor`] – [`PredictorHandle`]: the process-wide steering model,
//!   loaded once and shared by every session, with an explicit
//!   [`PredictorAccess`] policy.
//! - [`session`] – [`SessionController`]: the [`EventHandler`] that answers
//!   `connect` with a zero command and each `telemetry` frame with a `steer`
//!   command, containing every per-frame failure.
//! - [`telemetry`] – [`init_tracing`]: console logging plus optional OTLP
//!   span export.
//!
//! [`EventHandler`]: drivelink_middleware::EventHandler

pub mod predictor;
pub mod session;
pub mod telemetry;

pub use predictor::{Activation, LinearModel, PredictorAccess, PredictorHandle, SteeringModel};
pub use session::{ControlPipeline, FrameOutcome, SessionController};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
