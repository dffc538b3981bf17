//! Strategies turning the current steering into a target throttle.

use crate::config::ConfigError;
use crate::types::{SpeedZone, Steering, Throttle};
use std::sync::Mutex;
use tracing::debug;

/// Computes the throttle the pilot should aim for.
///
/// Implementations are shared between the periodic publisher and the bus
/// handlers, hence `&self` everywhere and interior mutability where needed.
pub trait Processor: Send + Sync {
    fn process(&self, steering: Steering) -> Throttle;

    /// Record the latest speed zone. Ignored by processors that only look at
    /// the steering.
    fn set_speed_zone(&self, _zone: SpeedZone) {}
}

/// Linear interpolation between `max_throttle` when driving straight and
/// `min_throttle` at full lock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SteeringProcessor {
    min_throttle: Throttle,
    max_throttle: Throttle,
}

impl SteeringProcessor {
    pub fn new(min_throttle: Throttle, max_throttle: Throttle) -> Self {
        Self {
            min_throttle,
            max_throttle,
        }
    }
}

impl Processor for SteeringProcessor {
    fn process(&self, steering: Steering) -> Throttle {
        let abs_steering = steering.abs();
        self.min_throttle + (self.max_throttle - self.min_throttle) * (1.0 - abs_steering)
    }
}

/// Throttle levels and steering thresholds for [`SpeedZoneProcessor`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedZoneSettings {
    pub slow_throttle: Throttle,
    pub normal_throttle: Throttle,
    pub fast_throttle: Throttle,
    pub moderate_steering: Steering,
    pub full_steering: Steering,
}

impl Default for SpeedZoneSettings {
    fn default() -> Self {
        Self {
            slow_throttle: 0.2,
            normal_throttle: 0.5,
            fast_throttle: 0.8,
            moderate_steering: 0.4,
            full_steering: 0.8,
        }
    }
}

/// Picks one of three throttle levels from the speed zone and how hard the
/// car is turning.
#[derive(Debug)]
pub struct SpeedZoneProcessor {
    speed_zone: Mutex<SpeedZone>,
    settings: SpeedZoneSettings,
}

impl SpeedZoneProcessor {
    pub fn new(settings: SpeedZoneSettings) -> Result<Self, ConfigError> {
        if settings.moderate_steering < 0.0 || settings.moderate_steering >= settings.full_steering
        {
            return Err(ConfigError::Validation(format!(
                "moderate steering ({}) must not be negative and lower than full steering ({})",
                settings.moderate_steering, settings.full_steering
            )));
        }
        Ok(Self {
            speed_zone: Mutex::new(SpeedZone::Unknown),
            settings,
        })
    }

    pub fn speed_zone(&self) -> SpeedZone {
        *self
            .speed_zone
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Processor for SpeedZoneProcessor {
    fn process(&self, steering: Steering) -> Throttle {
        let st = steering.abs();
        let s = &self.settings;

        match self.speed_zone() {
            SpeedZone::Fast => {
                if st >= s.full_steering {
                    s.slow_throttle
                } else if st >= s.moderate_steering {
                    s.normal_throttle
                } else {
                    s.fast_throttle
                }
            }
            // NORMAL only reacts past full steering, with a strict comparison.
            SpeedZone::Normal => {
                if st > s.full_steering {
                    s.slow_throttle
                } else {
                    s.normal_throttle
                }
            }
            SpeedZone::Slow | SpeedZone::Unknown => s.slow_throttle,
        }
    }

    fn set_speed_zone(&self, zone: SpeedZone) {
        let mut current = self
            .speed_zone
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *current != zone {
            debug!("speed zone changed from {:?} to {:?}", *current, zone);
        }
        *current = zone;
    }
}
