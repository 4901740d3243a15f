//! The normalised camera observation fed to the steering predictor.

use drivelink_types::DriveError;
use ndarray::{Array3, ArrayView3};

/// Rows of an observation.
pub const OBSERVATION_HEIGHT: usize = 66;
/// Columns of an observation.
pub const OBSERVATION_WIDTH: usize = 200;
/// Colour channels of an observation (Y, U, V).
pub const OBSERVATION_CHANNELS: usize = 3;
/// `(height, width, channels)`.
pub const OBSERVATION_SHAPE: [usize; 3] =
    [OBSERVATION_HEIGHT, OBSERVATION_WIDTH, OBSERVATION_CHANNELS];

/// A `(66, 200, 3)` tensor of `f32` values in `[0, 1]`.
///
/// The shape is checked on construction and cannot change afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation(Array3<f32>);

impl Observation {
    /// Wrap `values`, rejecting any shape other than [`OBSERVATION_SHAPE`].
    pub fn from_array(values: Array3<f32>) -> Result<Self, DriveError> {
        if values.shape() != &OBSERVATION_SHAPE[..] {
            return Err(DriveError::Shape(format!(
                "observation must have shape {:?}, got {:?}",
                OBSERVATION_SHAPE,
                values.shape()
            )));
        }
        Ok(Self(values))
    }

    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.0.view()
    }

    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    pub fn into_inner(self) -> Array3<f32> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_exact_shape() {
        let obs = Observation::from_array(Array3::zeros((66, 200, 3))).unwrap();
        assert_eq!(obs.shape(), &[66, 200, 3]);
    }

    #[test]
    fn rejects_other_shapes() {
        let err = Observation::from_array(Array3::zeros((200, 66, 3))).unwrap_err();
        assert!(matches!(err, DriveError::Shape(_)));
        assert!(Observation::from_array(Array3::zeros((66, 200, 1))).is_err());
    }
}
