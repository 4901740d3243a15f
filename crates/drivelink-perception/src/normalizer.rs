//! [`ImageNormalizer`] – camera frame to [`Observation`].
//!
//! The pipeline is fixed because the predictor was trained on its exact
//! output:
//!
//! 1. decode the container (JPEG, PNG, …) and convert to 8-bit RGB;
//! 2. keep rows `[60, 135)`, dropping the sky and the bonnet;
//! 3. convert RGB to YUV;
//! 4. 3×3 Gaussian blur;
//! 5. resize to 200×66;
//! 6. divide by 255.
//!
//! # Example
//!
//! ```rust
//! use drivelink_perception::ImageNormalizer;
//! use ndarray::Array3;
//!
//! let normalizer = ImageNormalizer::new();
//! let frame = Array3::<u8>::from_elem((160, 320, 3), 128);
//! let obs = normalizer.normalize_rgb(frame).unwrap();
//! assert_eq!(obs.shape(), &[66, 200, 3]);
//! ```

use drivelink_types::DriveError;
use ndarray::Array3;
use tracing::trace;

use crate::observation::{OBSERVATION_HEIGHT, OBSERVATION_WIDTH, Observation};
use crate::transform;

/// First camera row kept by the crop.
pub const CROP_TOP: usize = 60;
/// One past the last camera row kept by the crop; also the minimum height
/// of an acceptable camera frame.
pub const CROP_BOTTOM: usize = 135;
/// Divisor mapping 8-bit channel values onto `[0, 1]`.
pub const PIXEL_SCALE: f32 = 255.0;

/// Stateless camera-frame normaliser. Cheap to copy and safe to share.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageNormalizer;

impl ImageNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Decode `raw` and run the full pipeline.
    ///
    /// # Errors
    ///
    /// * [`DriveError::Decode`] – `raw` is not an image the decoder knows.
    /// * [`DriveError::Shape`] – the image has fewer than 135 rows or no
    ///   columns.
    pub fn normalize(&self, raw: &[u8]) -> Result<Observation, DriveError> {
        let rgb = decode_rgb(raw)?;
        self.normalize_rgb(rgb)
    }

    /// Run the pipeline on an already decoded `(height, width, 3)` RGB frame.
    pub fn normalize_rgb(&self, rgb: Array3<u8>) -> Result<Observation, DriveError> {
        let (height, width, channels) = rgb.dim();
        if channels != 3 {
            return Err(DriveError::Shape(format!(
                "expected 3 colour channels, got {channels}"
            )));
        }
        if height < CROP_BOTTOM || width == 0 {
            return Err(DriveError::Shape(format!(
                "camera frame is {width}x{height}; need at least 1 column and {CROP_BOTTOM} rows"
            )));
        }
        trace!(width, height, "normalising camera frame");

        let mut band = transform::crop_rows(rgb.view(), CROP_TOP, CROP_BOTTOM);
        transform::rgb_to_yuv(&mut band);
        let blurred = transform::gaussian_blur_3x3(band.view());
        let resized = transform::resize_bilinear(blurred.view(), OBSERVATION_HEIGHT, OBSERVATION_WIDTH);

        Observation::from_array(resized.mapv(|v| f32::from(v) / PIXEL_SCALE))
    }
}

fn decode_rgb(raw: &[u8]) -> Result<Array3<u8>, DriveError> {
    let img = image::load_from_memory(raw)
        .map_err(|e| DriveError::Decode(format!("undecodable camera image: {e}")))?;
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    Array3::from_shape_vec((height as usize, width as usize, 3), rgb.into_raw())
        .map_err(|e| DriveError::Decode(format!("pixel buffer does not match {width}x{height}: {e}")))
}
