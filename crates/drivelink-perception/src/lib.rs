//! `drivelink-perception` – camera frames to predictor observations.
//!
//! Turns the producer's encoded camera image into the fixed-size, normalised
//! tensor the steering predictor was trained on.
//!
//! # Modules
//!
//! - [`normalizer`] – [`ImageNormalizer`][normalizer::ImageNormalizer]: the
//!   fixed decode → crop → YUV → blur → resize → scale pipeline.
//! - [`transform`] – the 8-bit pixel operations the pipeline is built from.
//! - [`observation`] – [`Observation`][observation::Observation]: the
//!   shape-checked `(66, 200, 3)` tensor handed to the predictor.

pub mod normalizer;
pub mod observation;
pub mod transform;

pub use normalizer::ImageNormalizer;
pub use observation::{OBSERVATION_SHAPE, Observation};
