//! Speed-limit throttle policy.
//!
//! The throttle falls linearly with speed: full throttle at standstill, zero
//! at the speed limit, and negative (braking) above it.
//!
//! The output is **not** clamped. Above the limit the policy returns values
//! below zero, and for negative speeds (reversing) values above one; the
//! vehicle-side consumer receives them unchanged.
//!
//! # Example
//!
//! ```rust
//! use drivelink_control::{SpeedLimit, ThrottlePolicy};
//!
//! let policy = ThrottlePolicy::new(SpeedLimit::new(10.0).unwrap());
//! assert_eq!(policy.throttle(5.0), 0.5);
//! assert_eq!(policy.throttle(15.0), -0.5);
//! ```

use drivelink_types::DriveError;

/// `1 - speed / limit`, computed exactly as written.
pub fn throttle(speed: f64, limit: f64) -> f64 {
    1.0 - speed / limit
}

/// A speed limit known to be finite and strictly positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedLimit(f64);

impl SpeedLimit {
    /// Validate `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`DriveError::Config`] for zero, negative or non-finite limits.
    pub fn new(limit: f64) -> Result<Self, DriveError> {
        if !limit.is_finite() || limit <= 0.0 {
            return Err(DriveError::Config(format!(
                "speed_limit must be a finite number > 0, got {limit}"
            )));
        }
        Ok(Self(limit))
    }

    pub fn get(&self) -> f64 {
        self.0
    }
}

/// Throttle policy bound to one process-wide speed limit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottlePolicy {
    limit: SpeedLimit,
}

impl ThrottlePolicy {
    pub fn new(limit: SpeedLimit) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> SpeedLimit {
        self.limit
    }

    /// Throttle command for the current `speed`.
    pub fn throttle(&self, speed: f64) -> f64 {
        throttle(speed, self.limit.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(limit: f64) -> ThrottlePolicy {
        ThrottlePolicy::new(SpeedLimit::new(limit).unwrap())
    }

    #[test]
    fn full_throttle_at_standstill() {
        assert_eq!(policy(10.0).throttle(0.0), 1.0);
    }

    #[test]
    fn zero_throttle_at_the_limit() {
        assert_eq!(policy(10.0).throttle(10.0), 0.0);
    }

    #[test]
    fn half_throttle_at_half_the_limit() {
        assert_eq!(policy(10.0).throttle(5.0), 0.5);
    }

    #[test]
    fn above_the_limit_is_negative_and_unclamped() {
        assert_eq!(policy(10.0).throttle(25.0), -1.5);
        assert_eq!(policy(10.0).throttle(1000.0), 1.0 - 1000.0 / 10.0);
    }

    #[test]
    fn negative_speed_exceeds_one() {
        assert_eq!(policy(10.0).throttle(-5.0), 1.5);
    }

    #[test]
    fn matches_formula_across_a_grid() {
        for limit in [0.5, 1.0, 10.0, 30.0, 123.456] {
            let p = policy(limit);
            for speed in [0.0, 0.1, 3.3, 9.99, 10.0, 42.0, 1e6] {
                assert_eq!(p.throttle(speed), 1.0 - speed / limit, "speed {speed} limit {limit}");
            }
        }
    }

    #[test]
    fn invalid_limits_are_rejected() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = SpeedLimit::new(bad).unwrap_err();
            assert!(matches!(err, DriveError::Config(_)), "limit {bad}");
        }
    }
}
