//! Deceleration table used by [`CustomController`](super::CustomController).

use crate::config::{self, ConfigError};
use crate::types::Throttle;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Maps the gap between the measured and the requested throttle to a brake
/// value.
///
/// `delta_steps` are ascending thresholds, `data[i]` is the throttle to apply
/// once the gap reaches `delta_steps[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrakeConfig {
    pub delta_steps: Vec<f32>,
    pub data: Vec<Throttle>,
}

impl Default for BrakeConfig {
    fn default() -> Self {
        Self {
            delta_steps: vec![0.05, 0.3, 0.5],
            data: vec![-0.1, -0.5, -1.0],
        }
    }
}

impl BrakeConfig {
    pub async fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let cfg: Self = config::load_file(path).await?;
        cfg.validate()?;
        info!(
            "Brake table loaded from {}: {} steps",
            path.display(),
            cfg.delta_steps.len()
        );
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        config::ensure_parallel("delta_steps", &self.delta_steps, "data", &self.data)?;
        config::ensure_strictly_increasing("delta_steps", &self.delta_steps)?;
        if let Some(step) = self.delta_steps.iter().find(|s| **s <= 0.0) {
            return Err(ConfigError::Validation(format!(
                "delta_steps must be positive, found {}",
                step
            )));
        }
        if let Some(value) = self.data.iter().find(|v| !(-1.0..=1.0).contains(*v)) {
            return Err(ConfigError::Validation(format!(
                "brake data must be within [-1, 1], found {}",
                value
            )));
        }
        Ok(())
    }

    /// Throttle to apply when slowing down from `current` to `target`.
    ///
    /// A gap below the first step is negligible and `target` is returned as is.
    pub fn value_of(&self, current: Throttle, target: Throttle) -> Throttle {
        let delta = current - target;

        let mut previous = target;
        for (step, value) in self.delta_steps.iter().zip(&self.data) {
            if delta < *step {
                return previous;
            }
            previous = *value;
        }
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn value_of_default_table() {
        let cfg = BrakeConfig::default();

        // target above current: not a braking situation
        assert_eq!(cfg.value_of(0.5, 0.8), 0.8);
        // no delta
        assert_eq!(cfg.value_of(0.5, 0.5), 0.5);
        // delta below the first step
        assert_eq!(cfg.value_of(0.5, 0.495), 0.495);
        // first step <= delta < second step
        assert_eq!(cfg.value_of(0.5, 0.38), -0.1);
        // second step <= delta < last step
        assert_eq!(cfg.value_of(0.8, 0.4), -0.5);
        // delta beyond the last step
        assert_eq!(cfg.value_of(0.8, 0.3), -1.0);
        assert_eq!(cfg.value_of(1.0, -1.0), -1.0);
    }

    #[test]
    fn default_table_is_valid() {
        assert!(BrakeConfig::default().validate().is_ok());
    }

    #[test]
    fn invalid_tables_are_rejected() {
        let empty = BrakeConfig {
            delta_steps: vec![],
            data: vec![],
        };
        assert!(empty.validate().is_err());

        let mismatched = BrakeConfig {
            delta_steps: vec![0.1, 0.2],
            data: vec![-0.5],
        };
        assert!(mismatched.validate().is_err());

        let unordered = BrakeConfig {
            delta_steps: vec![0.3, 0.1],
            data: vec![-0.1, -0.5],
        };
        assert!(unordered.validate().is_err());

        let out_of_range = BrakeConfig {
            delta_steps: vec![0.1, 0.3],
            data: vec![-0.1, -1.5],
        };
        assert!(out_of_range.validate().is_err());
    }

    #[tokio::test]
    async fn from_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"delta_steps": [0.05, 0.3, 0.5], "data": [-0.1, -0.5, -1.0]}}"#
        )
        .unwrap();

        let cfg = BrakeConfig::from_file(file.path()).await.unwrap();
        assert_eq!(cfg, BrakeConfig::default());
    }

    #[tokio::test]
    async fn from_file_validates_content() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"delta_steps": [0.05, 0.3], "data": [-0.1]}}"#).unwrap();

        let result = BrakeConfig::from_file(file.path()).await;
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }
}
