//! Table driven steering to throttle mapping.

use super::processor::Processor;
use crate::config::{self, ConfigError};
use crate::types::{Steering, Throttle};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Parallel arrays describing throttle steps by steering breakpoint.
///
/// `steering_values` is strictly increasing and `throttle_steps` strictly
/// decreasing, all values in `(0, 1]`. Instances built through [`Self::new`]
/// or [`Self::from_file`] are always valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SteeringThrottleConfig {
    steering_values: Vec<Steering>,
    throttle_steps: Vec<Throttle>,
}

impl SteeringThrottleConfig {
    pub fn new(
        steering_values: Vec<Steering>,
        throttle_steps: Vec<Throttle>,
    ) -> Result<Self, ConfigError> {
        let cfg = Self {
            steering_values,
            throttle_steps,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub async fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let cfg: Self = config::load_file(path).await?;
        cfg.validate()?;
        info!(
            "Steering/throttle table loaded from {}: {} steps",
            path.display(),
            cfg.steering_values.len()
        );
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        config::ensure_parallel(
            "steering_values",
            &self.steering_values,
            "throttle_steps",
            &self.throttle_steps,
        )?;
        ensure_unit_range("throttle_steps", &self.throttle_steps)?;
        config::ensure_strictly_decreasing("throttle_steps", &self.throttle_steps)?;
        ensure_unit_range("steering_values", &self.steering_values)?;
        config::ensure_strictly_increasing("steering_values", &self.steering_values)
    }

    pub fn steering_values(&self) -> &[Steering] {
        &self.steering_values
    }

    pub fn throttle_steps(&self) -> &[Throttle] {
        &self.throttle_steps
    }

    /// Throttle step of the interval `|steering|` falls into.
    ///
    /// Below the first breakpoint the first step applies; past the last one
    /// the last step applies.
    pub fn value_of(&self, steering: Steering) -> Throttle {
        let st = steering.abs();

        let mut previous = match self.throttle_steps.first() {
            Some(first) => *first,
            None => return 0.0,
        };
        for (breakpoint, step) in self.steering_values.iter().zip(&self.throttle_steps) {
            if st < *breakpoint {
                return previous;
            }
            previous = *step;
        }
        previous
    }
}

fn ensure_unit_range(name: &str, values: &[f32]) -> Result<(), ConfigError> {
    match values.iter().find(|v| **v <= 0.0 || **v > 1.0) {
        Some(v) => Err(ConfigError::Validation(format!(
            "{} values must be in (0, 1], found {}",
            name, v
        ))),
        None => Ok(()),
    }
}

#[derive(Debug, Clone)]
pub struct CustomSteeringProcessor {
    cfg: SteeringThrottleConfig,
}

impl CustomSteeringProcessor {
    pub fn new(cfg: SteeringThrottleConfig) -> Self {
        Self { cfg }
    }
}

impl Processor for CustomSteeringProcessor {
    fn process(&self, steering: Steering) -> Throttle {
        self.cfg.value_of(steering)
    }
}
