//! [`PredictorHandle`] – steering inference over a loaded model.
//!
//! The pipeline treats the model as opaque: anything implementing
//! [`SteeringModel`] that accepts a `[batch, 66, 200, 3]` tensor and yields one
//! steering angle per sample can drive the car. [`LinearModel`] is the
//! built-in artifact format.
//!
//! # Artifact format
//!
//! ```json
//! {
//!   "format": "drivelink-linear",
//!   "input_shape": [66, 200, 3],
//!   "weights": [0.0, ...],
//!   "bias": 0.0,
//!   "activation": "tanh"
//! }
//! ```
//!
//! `weights` is row-major over `input_shape`; `activation` is `"identity"`
//! (default) or `"tanh"`.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use drivelink_perception::{OBSERVATION_SHAPE, Observation};
use drivelink_types::DriveError;
use ndarray::{Array3, ArrayView4, Axis, Zip};
use serde::Deserialize;
use tracing::info;

// ─────────────────────────────────────────────────────────────────────────────
// Model seam
// ─────────────────────────────────────────────────────────────────────────────

/// A loaded steering model.
///
/// Implementations must be pure: the same input always yields the same
/// output, and `predict_batch` takes `&self` only.
pub trait SteeringModel: Send + Sync {
    /// Shape of one sample, `[height, width, channels]`.
    fn input_shape(&self) -> [usize; 3];

    /// One steering angle per sample of `batch`.
    fn predict_batch(&self, batch: ArrayView4<'_, f32>) -> Result<Vec<f32>, DriveError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Linear artifact
// ─────────────────────────────────────────────────────────────────────────────

/// Output non-linearity of a [`LinearModel`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Identity,
    Tanh,
}

#[derive(Debug, Deserialize)]
struct LinearArtifact {
    format: String,
    input_shape: [usize; 3],
    weights: Vec<f32>,
    bias: f32,
    #[serde(default)]
    activation: Activation,
}

/// `activation(sum(weights * input) + bias)`.
#[derive(Debug, Clone)]
pub struct LinearModel {
    weights: Array3<f32>,
    bias: f32,
    activation: Activation,
}

impl LinearModel {
    pub const FORMAT: &'static str = "drivelink-linear";

    pub fn new(weights: Array3<f32>, bias: f32, activation: Activation) -> Self {
        Self {
            weights,
            bias,
            activation,
        }
    }

    /// Read and validate an artifact file.
    ///
    /// # Errors
    ///
    /// [`DriveError::ArtifactLoad`] if the file is unreadable, is not a
    /// `drivelink-linear` document, or its weight count does not match
    /// `input_shape`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DriveError> {
        let path = path.as_ref();
        let fail = |reason: String| DriveError::ArtifactLoad {
            path: path.display().to_string(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
        Self::from_json(&text).map_err(fail)
    }

    fn from_json(text: &str) -> Result<Self, String> {
        let artifact: LinearArtifact = serde_json::from_str(text).map_err(|e| e.to_string())?;
        if artifact.format != Self::FORMAT {
            return Err(format!(
                "unsupported artifact format {:?}, expected {:?}",
                artifact.format,
                Self::FORMAT
            ));
        }
        let [h, w, c] = artifact.input_shape;
        let weights = Array3::from_shape_vec((h, w, c), artifact.weights)
            .map_err(|e| format!("weights do not match input_shape {:?}: {e}", artifact.input_shape))?;
        if !artifact.bias.is_finite() || weights.iter().any(|w| !w.is_finite()) {
            return Err("artifact contains non-finite parameters".to_string());
        }
        Ok(Self::new(weights, artifact.bias, artifact.activation))
    }
}

impl SteeringModel for LinearModel {
    fn input_shape(&self) -> [usize; 3] {
        let (h, w, c) = self.weights.dim();
        [h, w, c]
    }

    fn predict_batch(&self, batch: ArrayView4<'_, f32>) -> Result<Vec<f32>, DriveError> {
        batch
            .outer_iter()
            .map(|sample| {
                if sample.dim() != self.weights.dim() {
                    return Err(DriveError::Shape(format!(
                        "model expects {:?}, got {:?}",
                        self.weights.dim(),
                        sample.dim()
                    )));
                }
                let z = Zip::from(&sample)
                    .and(&self.weights)
                    .fold(self.bias, |acc, &x, &w| acc + x * w);
                Ok(match self.activation {
                    Activation::Identity => z,
                    Activation::Tanh => z.tanh(),
                })
            })
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Access policy
// ─────────────────────────────────────────────────────────────────────────────

/// How concurrent sessions reach the single model instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictorAccess {
    /// Sessions call the model in parallel.
    #[default]
    Shared,
    /// One inference at a time, process-wide.
    Serialized,
}

impl FromStr for PredictorAccess {
    type Err = DriveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(Self::Shared),
            "serialized" => Ok(Self::Serialized),
            other => Err(DriveError::Config(format!(
                "predictor_access must be \"shared\" or \"serialized\", got {other:?}"
            ))),
        }
    }
}

impl fmt::Display for PredictorAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Shared => "shared",
            Self::Serialized => "serialized",
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PredictorHandle
// ─────────────────────────────────────────────────────────────────────────────

/// The process-wide model, shared read-only by every session.
pub struct PredictorHandle {
    model: Arc<dyn SteeringModel>,
    access: PredictorAccess,
    gate: Mutex<()>,
}

impl PredictorHandle {
    /// Load a [`LinearModel`] artifact.
    pub fn load(path: impl AsRef<Path>, access: PredictorAccess) -> Result<Self, DriveError> {
        let path = path.as_ref();
        let handle = Self::from_model(Arc::new(LinearModel::load(path)?), access).map_err(|e| {
            DriveError::ArtifactLoad {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        info!(path = %path.display(), access = %access, "steering model loaded");
        Ok(handle)
    }

    /// Wrap an already constructed model.
    ///
    /// # Errors
    ///
    /// [`DriveError::Shape`] if the model does not take 66×200×3 samples.
    pub fn from_model(model: Arc<dyn SteeringModel>, access: PredictorAccess) -> Result<Self, DriveError> {
        let shape = model.input_shape();
        if shape != OBSERVATION_SHAPE {
            return Err(DriveError::Shape(format!(
                "model input shape {shape:?} does not match observation shape {OBSERVATION_SHAPE:?}"
            )));
        }
        Ok(Self {
            model,
            access,
            gate: Mutex::new(()),
        })
    }

    pub fn access(&self) -> PredictorAccess {
        self.access
    }

    /// Steering angle for one observation, run as a batch of one.
    ///
    /// # Errors
    ///
    /// [`DriveError::Inference`] if the model fails, returns anything but a
    /// single value, or returns a non-finite value.
    pub fn predict(&self, observation: &Observation) -> Result<f64, DriveError> {
        let batch = observation.view().insert_axis(Axis(0));
        let outputs = match self.access {
            PredictorAccess::Shared => self.model.predict_batch(batch),
            PredictorAccess::Serialized => {
                let _guard = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
                self.model.predict_batch(batch)
            }
        }
        .map_err(as_inference)?;
        match outputs.as_slice() {
            [angle] if angle.is_finite() => Ok(f64::from(*angle)),
            [angle] => Err(DriveError::Inference(format!("model produced non-finite angle {angle}"))),
            other => Err(DriveError::Inference(format!(
                "expected one output per sample, got {}",
                other.len()
            ))),
        }
    }
}

/// Any model failure surfaces as [`DriveError::Inference`].
fn as_inference(err: DriveError) -> DriveError {
    match err {
        DriveError::Inference(_) => err,
        other => DriveError::Inference(other.to_string()),
    }
}

impl fmt::Debug for PredictorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredictorHandle")
            .field("input_shape", &self.model.input_shape())
            .field("access", &self.access)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
