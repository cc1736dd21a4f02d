use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackingError};

/// Which Kalman variant runs after the smoother.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    /// Independent constant-position filters for latitude and longitude
    Scalar,
    /// Joint [lat, lng, vel_lat, vel_lng] filter
    PositionVelocity,
}

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    // ── Ingest gating ──
    pub max_accuracy_m: f64,
    pub warn_accuracy_m: f64,

    // ── Drift filter ──
    pub max_jump_m: f64,
    pub reanchor_after_rejections: u32,

    // ── Moving average ──
    pub smoothing_window: usize,

    // ── Kalman ──
    pub estimator: EstimatorKind,
    pub measurement_noise_m: f64,
    pub process_noise_position_m: f64,
    pub process_noise_velocity_mps: f64,
    pub initial_velocity_std_mps: f64,
    pub accuracy_weighted_noise: bool,

    // ── Dead reckoning ──
    pub min_motion_speed_mps: f64,
    pub max_extrapolation_secs: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: 15.0,
            warn_accuracy_m: 10.0,
            max_jump_m: 60.0,
            reanchor_after_rejections: 5,
            smoothing_window: 5,
            estimator: EstimatorKind::PositionVelocity,
            measurement_noise_m: 5.0,
            process_noise_position_m: 0.1,
            process_noise_velocity_mps: 0.5,
            initial_velocity_std_mps: 10.0,
            accuracy_weighted_noise: false,
            min_motion_speed_mps: 0.2,
            max_extrapolation_secs: 30.0,
        }
    }
}

impl FusionConfig {
    /// Load tunables from a JSON file; missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: FusionConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_accuracy_m", self.max_accuracy_m),
            ("warn_accuracy_m", self.warn_accuracy_m),
            ("max_jump_m", self.max_jump_m),
            ("measurement_noise_m", self.measurement_noise_m),
            ("initial_velocity_std_mps", self.initial_velocity_std_mps),
            ("max_extrapolation_secs", self.max_extrapolation_secs),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(TrackingError::InvalidConfig(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }

        let non_negative = [
            ("process_noise_position_m", self.process_noise_position_m),
            ("process_noise_velocity_mps", self.process_noise_velocity_mps),
            ("min_motion_speed_mps", self.min_motion_speed_mps),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(TrackingError::InvalidConfig(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }

        if self.smoothing_window == 0 {
            return Err(TrackingError::InvalidConfig(
                "smoothing_window must be at least 1".to_string(),
            ));
        }
        if self.warn_accuracy_m > self.max_accuracy_m {
            return Err(TrackingError::InvalidConfig(format!(
                "warn_accuracy_m ({}) exceeds max_accuracy_m ({})",
                self.warn_accuracy_m, self.max_accuracy_m
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_valid() {
        assert!(FusionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_window_rejected() {
        let config = FusionConfig {
            smoothing_window: 0,
            ..FusionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TrackingError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_warn_above_max_rejected() {
        let config = FusionConfig {
            warn_accuracy_m: 20.0,
            max_accuracy_m: 15.0,
            ..FusionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_nan_threshold_rejected() {
        let config = FusionConfig {
            max_jump_m: f64::NAN,
            ..FusionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: FusionConfig =
            serde_json::from_str(r#"{"max_jump_m": 100.0, "estimator": "scalar"}"#).unwrap();
        assert_eq!(config.max_jump_m, 100.0);
        assert_eq!(config.estimator, EstimatorKind::Scalar);
        assert_eq!(config.smoothing_window, 5);
    }

    #[test]
    fn test_from_json_file() {
        let path = std::env::temp_dir().join(format!(
            "fusion_config_test_{}.json",
            std::process::id()
        ));
        let mut file = fs::File::create(&path).unwrap();
        write!(file, r#"{{"smoothing_window": 8}}"#).unwrap();
        drop(file);

        let config = FusionConfig::from_json_file(&path).unwrap();
        assert_eq!(config.smoothing_window, 8);
        fs::remove_file(&path).unwrap();
    }
}
