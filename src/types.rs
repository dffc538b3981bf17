//! Scalar types flowing through the throttle pipeline.

pub use crate::messages::{DriveMode, SpeedZone};

/// Commanded power, conventionally in `[-1.0, 1.0]`.
///
/// Positive values drive forward, negative values brake or reverse. The type
/// itself does not enforce the range: clamping is the controller's job.
pub type Throttle = f32;

/// Steering angle in `[-1.0, 1.0]`, `0.0` being straight ahead.
pub type Steering = f32;
