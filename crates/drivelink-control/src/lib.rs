//! `drivelink-control` – longitudinal control for the simulated vehicle.
//!
//! - [`throttle`] – [`ThrottlePolicy`][throttle::ThrottlePolicy]: maps the
//!   vehicle's current speed and the configured speed limit onto a throttle
//!   command.

pub mod throttle;

pub use throttle::{SpeedLimit, ThrottlePolicy, throttle};
