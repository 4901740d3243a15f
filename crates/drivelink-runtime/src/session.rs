//! Per-session control loop.
//!
//! [`SessionController`] answers the three lifecycle events of a producer:
//!
//! | Event | Reaction |
//! |---|---|
//! | `connect` | emit the zero command (steering 0, throttle 0) |
//! | `telemetry` | normalize → predict → throttle → emit `steer` |
//! | `disconnect` | log; in-flight work finishes and its emission is a no-op |
//!
//! Every failure inside a telemetry frame is contained to that frame: it is
//! logged with the session and sequence number and no command is emitted.

use std::sync::Arc;

use async_trait::async_trait;
use drivelink_control::ThrottlePolicy;
use drivelink_middleware::{EventHandler, EventRouter, SessionHandle};
use drivelink_perception::ImageNormalizer;
use drivelink_types::{ControlCommand, DriveError, InboundEnvelope, InboundEvent, TelemetryFrame, TelemetryPayload, events};
use tracing::{debug, info, warn};

use crate::predictor::PredictorHandle;

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline
// ─────────────────────────────────────────────────────────────────────────────

/// Telemetry frame → control command. Pure CPU work, no I/O.
#[derive(Debug)]
pub struct ControlPipeline {
    normalizer: ImageNormalizer,
    predictor: Arc<PredictorHandle>,
    policy: ThrottlePolicy,
}

impl ControlPipeline {
    pub fn new(predictor: Arc<PredictorHandle>, policy: ThrottlePolicy) -> Self {
        Self {
            normalizer: ImageNormalizer::new(),
            predictor,
            policy,
        }
    }

    pub fn policy(&self) -> ThrottlePolicy {
        self.policy
    }

    /// Run the full pipeline for one frame.
    ///
    /// # Errors
    ///
    /// Propagates [`DriveError::Decode`], [`DriveError::Shape`] and
    /// [`DriveError::Inference`] from normalization and prediction.
    pub fn process(&self, frame: &TelemetryFrame) -> Result<ControlCommand, DriveError> {
        let observation = self.normalizer.normalize(&frame.image)?;
        let steering_angle = self.predictor.predict(&observation)?;
        Ok(ControlCommand {
            steering_angle,
            throttle: self.policy.throttle(frame.speed),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Controller
// ─────────────────────────────────────────────────────────────────────────────

/// Result of one telemetry frame that did not fail.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameOutcome {
    /// The command was queued for the session.
    Emitted(ControlCommand),
    /// The command was computed but the session had already closed.
    Undelivered(ControlCommand),
    /// The frame carried no image; nothing was emitted.
    MissingImage,
}

/// The [`EventHandler`] shared by every session.
#[derive(Debug)]
pub struct SessionController {
    pipeline: Arc<ControlPipeline>,
}

impl SessionController {
    pub fn new(pipeline: ControlPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }

    /// Register this controller for `connect`, `telemetry` and `disconnect`.
    pub fn router(self: Arc<Self>) -> EventRouter {
        EventRouter::new()
            .on(events::CONNECT, self.clone())
            .on(events::TELEMETRY, self.clone())
            .on(events::DISCONNECT, self)
    }

    /// Handle one telemetry frame for `session`.
    ///
    /// The pipeline runs on the blocking pool so inference never stalls the
    /// socket tasks.
    pub async fn process_telemetry(
        &self,
        session: &SessionHandle,
        seq: u64,
        payload: TelemetryPayload,
    ) -> Result<FrameOutcome, DriveError> {
        let Some(frame) = payload.into_frame()? else {
            warn!(session = %session.id(), seq, "telemetry without image; no command emitted");
            return Ok(FrameOutcome::MissingImage);
        };

        let pipeline = Arc::clone(&self.pipeline);
        let command = tokio::task::spawn_blocking(move || pipeline.process(&frame))
            .await
            .map_err(|e| DriveError::Inference(format!("pipeline task failed: {e}")))??;

        debug!(
            session = %session.id(),
            seq,
            steering_angle = command.steering_angle,
            throttle = command.throttle,
            "control command"
        );
        if session.send_control(&command) {
            Ok(FrameOutcome::Emitted(command))
        } else {
            debug!(session = %session.id(), seq, "session closed before emission");
            Ok(FrameOutcome::Undelivered(command))
        }
    }
}

#[async_trait]
impl EventHandler for SessionController {
    async fn handle(&self, session: &SessionHandle, envelope: InboundEnvelope) -> Result<(), DriveError> {
        match envelope.event {
            InboundEvent::Connect => {
                info!(session = %session.id(), peer = %session.peer(), "producer connected");
                session.send_control(&ControlCommand::zero());
                Ok(())
            }
            InboundEvent::Telemetry(payload) => self
                .process_telemetry(session, envelope.seq, payload)
                .await
                .map(|_| ()),
            InboundEvent::Disconnect => {
                info!(session = %session.id(), inbound_events = envelope.seq, "producer disconnected");
                Ok(())
            }
            InboundEvent::Custom { name, .. } => {
                debug!(session = %session.id(), event = %name, "unhandled event");
                Ok(())
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
