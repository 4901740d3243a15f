use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Event names of the producer ↔ controller protocol.
pub mod events {
    /// Inbound: a producer attached to the channel.
    pub const CONNECT: &str = "connect";
    /// Inbound: one telemetry frame (speed + optional camera image).
    pub const TELEMETRY: &str = "telemetry";
    /// Inbound: the producer went away (synthesised by the channel).
    pub const DISCONNECT: &str = "disconnect";
    /// Outbound: steering angle and throttle for the vehicle.
    pub const STEER: &str = "steer";
}

/// Identity of one connected producer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// One validated telemetry frame: the vehicle's speed and the raw bytes of
/// its camera image (still in their container format, e.g. JPEG).
#[derive(Debug, Clone)]
pub struct TelemetryFrame {
    pub speed: f64,
    pub image: Vec<u8>,
}

/// Raw key/value payload of a `telemetry` event, not yet validated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryPayload(Map<String, Value>);

impl TelemetryPayload {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// `true` when the producer attached a camera image to this frame.
    pub fn has_image(&self) -> bool {
        self.0.contains_key("image")
    }

    /// Parse the `speed` field. Numbers and numeric strings are accepted;
    /// the result must be finite.
    pub fn speed(&self) -> Result<f64, DriveError> {
        let raw = self
            .0
            .get("speed")
            .ok_or_else(|| DriveError::MalformedTelemetry("missing `speed` field".to_string()))?;
        let speed = match raw {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .ok_or_else(|| DriveError::MalformedTelemetry(format!("unparseable speed: {raw}")))?;
        if !speed.is_finite() {
            return Err(DriveError::MalformedTelemetry(format!(
                "speed must be finite, got {speed}"
            )));
        }
        Ok(speed)
    }

    /// Validate the payload into a [`TelemetryFrame`].
    ///
    /// Returns `Ok(None)` when the payload carries no `image` field. The
    /// image check comes first so that a frame without an image is reported
    /// as such even when its speed is also unusable.
    pub fn into_frame(self) -> Result<Option<TelemetryFrame>, DriveError> {
        if !self.has_image() {
            return Ok(None);
        }
        let speed = self.speed()?;
        let encoded = match self.0.get("image") {
            Some(Value::String(s)) => s.trim(),
            Some(other) => {
                return Err(DriveError::Decode(format!(
                    "image field must be a base64 string, got {}",
                    json_kind(other)
                )));
            }
            None => return Ok(None),
        };
        let image = BASE64
            .decode(encoded)
            .map_err(|e| DriveError::Decode(format!("image is not valid base64: {e}")))?;
        Ok(Some(TelemetryFrame { speed, image }))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Inbound events, decoded from the wire name and payload.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Connect,
    Telemetry(TelemetryPayload),
    Disconnect,
    /// Any other named event a handler was registered for.
    Custom { name: String, payload: Option<Value> },
}

impl InboundEvent {
    /// Build the typed event for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DriveError::Decode`] when a `telemetry` payload is absent or
    /// is not a key/value object.
    pub fn decode(name: &str, payload: Option<Value>) -> Result<Self, DriveError> {
        match name {
            events::CONNECT => Ok(Self::Connect),
            events::DISCONNECT => Ok(Self::Disconnect),
            events::TELEMETRY => match payload {
                Some(Value::Object(fields)) => Ok(Self::Telemetry(TelemetryPayload::new(fields))),
                Some(other) => Err(DriveError::Decode(format!(
                    "telemetry payload must be an object, got {}",
                    json_kind(&other)
                ))),
                None => Err(DriveError::Decode("telemetry event without payload".to_string())),
            },
            other => Ok(Self::Custom {
                name: other.to_string(),
                payload,
            }),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Connect => events::CONNECT,
            Self::Telemetry(_) => events::TELEMETRY,
            Self::Disconnect => events::DISCONNECT,
            Self::Custom { name, .. } => name,
        }
    }
}

/// An inbound event together with its identity inside the session.
#[derive(Debug, Clone)]
pub struct InboundEnvelope {
    pub session: SessionId,
    /// Position of this event in the session's inbound stream, from 0.
    pub seq: u64,
    pub received_at: DateTime<Utc>,
    pub event: InboundEvent,
}

/// Steering and throttle for one control cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub steering_angle: f64,
    pub throttle: f64,
}

impl ControlCommand {
    /// The initial condition of the control loop, sent on connect.
    pub const fn zero() -> Self {
        Self {
            steering_angle: 0.0,
            throttle: 0.0,
        }
    }
}

/// Error taxonomy shared by every DriveLink crate.
///
/// `Decode`, `Shape`, `MalformedTelemetry` and `Inference` are per-frame and
/// contained by the session controller. `ArtifactLoad` and `Config` only
/// occur at startup and are fatal.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DriveError {
    #[error("Decode Error: {0}")]
    Decode(String),

    #[error("Shape Error: {0}")]
    Shape(String),

    #[error("Malformed Telemetry: {0}")]
    MalformedTelemetry(String),

    #[error("Inference Error: {0}")]
    Inference(String),

    #[error("Artifact Load Error ({path}): {reason}")]
    ArtifactLoad { path: String, reason: String },

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Channel Error: {0}")]
    Channel(String),
}

impl DriveError {
    /// `true` for errors that must stop the process from serving.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ArtifactLoad { .. } | Self::Config(_))
    }
}
