//! Brake controllers smooth the transition between the measured throttle and
//! the throttle requested by the processor.
//!
//! ```text
//! target ──► BrakeController::adjust_throttle ──► shaped throttle
//!                   ▲
//!        throttle feedback (set_real_throttle)
//! ```

pub mod config;

pub use config::BrakeConfig;

use crate::types::Throttle;
use std::sync::RwLock;
use tracing::debug;

/// Shapes a target throttle against the last measured one.
pub trait BrakeController: Send + Sync {
    /// Record the throttle actually achieved by the vehicle.
    fn set_real_throttle(&self, throttle: Throttle);

    /// Throttle to emit instead of `target`.
    fn adjust_throttle(&self, target: Throttle) -> Throttle;
}

/// Passthrough controller, no shaping at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledController;

impl BrakeController for DisabledController {
    fn set_real_throttle(&self, _throttle: Throttle) {}

    fn adjust_throttle(&self, target: Throttle) -> Throttle {
        target
    }
}

/// Table driven controller.
///
/// Accelerations are scaled by `accelerator_factor` and capped at full
/// throttle; decelerations are looked up in a [`BrakeConfig`].
#[derive(Debug)]
pub struct CustomController {
    real_throttle: RwLock<Throttle>,
    cfg: BrakeConfig,
    accelerator_factor: f32,
}

impl Default for CustomController {
    fn default() -> Self {
        Self::new()
    }
}

impl CustomController {
    /// Controller with the built-in brake table and no acceleration boost.
    pub fn new() -> Self {
        Self::with_config(BrakeConfig::default(), 1.0)
    }

    /// A non-positive `accelerator_factor` turns acceleration shaping off:
    /// targets above the real throttle are returned unchanged.
    pub fn with_config(cfg: BrakeConfig, accelerator_factor: f32) -> Self {
        Self {
            real_throttle: RwLock::new(0.0),
            cfg,
            accelerator_factor,
        }
    }

    pub fn real_throttle(&self) -> Throttle {
        *self
            .real_throttle
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> &BrakeConfig {
        &self.cfg
    }
}

impl BrakeController for CustomController {
    fn set_real_throttle(&self, throttle: Throttle) {
        let mut real = self
            .real_throttle
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *real = throttle;
    }

    fn adjust_throttle(&self, target: Throttle) -> Throttle {
        let real = self.real_throttle();

        if target > real {
            if self.accelerator_factor <= 0.0 {
                return target;
            }
            let throttle = real + (target - real) * self.accelerator_factor;
            return throttle.min(1.0);
        }

        let throttle = self.cfg.value_of(real, target);
        if throttle != target {
            debug!(
                "brake from real throttle {} toward {}: apply {}",
                real, target, throttle
            );
        }
        throttle
    }
}
