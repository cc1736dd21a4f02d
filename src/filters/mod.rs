pub mod position_velocity;
pub mod scalar;

use crate::config::{EstimatorKind, FusionConfig};
use crate::geodesy::meters_std_to_deg_var;
use crate::types::FusedPosition;

use position_velocity::PositionVelocityKalman;
use scalar::AxisKalman;

/// Result of running one smoothed sample through the estimator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KalmanStep {
    pub fused: FusedPosition,
    /// dt was ≤ 0 (or unknown on a running filter), prediction was a no-op
    pub prediction_skipped: Option<f64>,
    /// Innovation covariance was singular, correction was a no-op
    pub correction_skipped: bool,
    /// Velocity was replaced by the speed/heading hint
    pub velocity_overridden: bool,
    /// First sample after construction/reset
    pub initialized: bool,
}

/// The Kalman stage, in either of its two variants.
#[derive(Clone, Debug)]
pub enum Estimator {
    Scalar(AxisKalman),
    PositionVelocity(PositionVelocityKalman),
}

/// Owns the estimator plus the timing/noise bookkeeping around it.
#[derive(Clone, Debug)]
pub struct KalmanStage {
    estimator: Estimator,
    accuracy_weighted_noise: bool,
    last_timestamp: Option<i64>,
}

impl KalmanStage {
    pub fn from_config(config: &FusionConfig) -> Self {
        let r = meters_std_to_deg_var(config.measurement_noise_m);
        let q_pos = meters_std_to_deg_var(config.process_noise_position_m);
        let estimator = match config.estimator {
            EstimatorKind::Scalar => Estimator::Scalar(AxisKalman::new(q_pos, r)),
            EstimatorKind::PositionVelocity => {
                Estimator::PositionVelocity(PositionVelocityKalman::new(
                    q_pos,
                    meters_std_to_deg_var(config.process_noise_velocity_mps),
                    r,
                    meters_std_to_deg_var(config.initial_velocity_std_mps),
                ))
            }
        };
        Self {
            estimator,
            accuracy_weighted_noise: config.accuracy_weighted_noise,
            last_timestamp: None,
        }
    }

    /// Fuse one smoothed position.
    ///
    /// `velocity_hint` (deg/s) comes from the fix's own speed and the resolved
    /// heading; the 4-state variant adopts it verbatim after the correction.
    pub fn update(
        &mut self,
        z: (f64, f64),
        accuracy_m: f64,
        timestamp: i64,
        velocity_hint: Option<(f64, f64)>,
    ) -> KalmanStep {
        let dt = self
            .last_timestamp
            .map(|prev| timestamp.saturating_sub(prev) as f64 / 1000.0);
        // Never move the reference time backwards
        if self.last_timestamp.map_or(true, |prev| timestamp > prev) {
            self.last_timestamp = Some(timestamp);
        }

        let r = self.measurement_noise(accuracy_m);
        let mut step = KalmanStep {
            fused: FusedPosition::at(z.0, z.1),
            prediction_skipped: None,
            correction_skipped: false,
            velocity_overridden: false,
            initialized: false,
        };

        match &mut self.estimator {
            Estimator::Scalar(kf) => {
                if !kf.is_initialized() {
                    kf.correct(z, r);
                    step.initialized = true;
                } else {
                    let dt = dt.unwrap_or(0.0);
                    if !kf.predict(dt) {
                        step.prediction_skipped = Some(dt);
                    }
                    step.correction_skipped = !kf.correct(z, r);
                }
                let (lat, lng) = kf.position();
                step.fused = FusedPosition::at(lat, lng);
            }
            Estimator::PositionVelocity(kf) => {
                if !kf.is_initialized() {
                    kf.initialize(z, velocity_hint);
                    step.initialized = true;
                    step.velocity_overridden = velocity_hint.is_some();
                } else {
                    let dt = dt.unwrap_or(0.0);
                    if !kf.predict(dt) {
                        step.prediction_skipped = Some(dt);
                    }
                    step.correction_skipped = !kf.correct(z, r);
                    if let Some((v_lat, v_lng)) = velocity_hint {
                        kf.override_velocity(v_lat, v_lng);
                        step.velocity_overridden = true;
                    }
                }
                let (lat, lng) = kf.position();
                step.fused = FusedPosition {
                    latitude: lat,
                    longitude: lng,
                    velocity: Some(kf.velocity()),
                };
            }
        }

        step
    }

    fn measurement_noise(&self, accuracy_m: f64) -> f64 {
        if self.accuracy_weighted_noise && accuracy_m > 0.0 {
            return meters_std_to_deg_var(accuracy_m);
        }
        match &self.estimator {
            Estimator::Scalar(kf) => kf.measurement_noise(),
            Estimator::PositionVelocity(kf) => kf.measurement_noise(),
        }
    }

    /// Mean lat/lng variance [deg²]
    pub fn position_variance(&self) -> f64 {
        match &self.estimator {
            Estimator::Scalar(kf) => {
                let state = kf.get_state();
                (state.variance.0 + state.variance.1) / 2.0
            }
            Estimator::PositionVelocity(kf) => kf.position_variance(),
        }
    }

    pub fn estimator(&self) -> &Estimator {
        &self.estimator
    }

    pub fn reset(&mut self) {
        match &mut self.estimator {
            Estimator::Scalar(kf) => kf.reset(),
            Estimator::PositionVelocity(kf) => kf.reset(),
        }
        self.last_timestamp = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn stage(kind: EstimatorKind) -> KalmanStage {
        KalmanStage::from_config(&FusionConfig {
            estimator: kind,
            ..FusionConfig::default()
        })
    }

    #[test]
    fn test_first_sample_passes_through() {
        for kind in [EstimatorKind::Scalar, EstimatorKind::PositionVelocity] {
            let mut kf = stage(kind);
            let step = kf.update((32.2, -110.9), 5.0, 1_000, None);
            assert!(step.initialized);
            assert_eq!(step.fused.latitude, 32.2);
            assert_eq!(step.fused.longitude, -110.9);
        }
    }

    #[test]
    fn test_scalar_has_no_velocity() {
        let mut kf = stage(EstimatorKind::Scalar);
        let step = kf.update((0.0, 0.0), 5.0, 0, None);
        assert_eq!(step.fused.velocity, None);
    }

    #[test]
    fn test_repeated_timestamp_skips_prediction() {
        for kind in [EstimatorKind::Scalar, EstimatorKind::PositionVelocity] {
            let mut kf = stage(kind);
            kf.update((0.0, 0.0), 5.0, 1_000, None);
            let step = kf.update((0.00001, 0.0), 5.0, 1_000, None);
            assert_eq!(step.prediction_skipped, Some(0.0));
            let step = kf.update((0.00001, 0.0), 5.0, 500, None);
            assert_eq!(step.prediction_skipped, Some(-0.5));
            assert!(!step.correction_skipped);
        }
    }

    #[test]
    fn test_extreme_timestamps_saturate() {
        for kind in [EstimatorKind::Scalar, EstimatorKind::PositionVelocity] {
            let mut kf = stage(kind);
            kf.update((0.0, 0.0), 5.0, i64::MAX, None);
            let step = kf.update((0.00001, 0.0), 5.0, i64::MIN, None);
            assert!(step.prediction_skipped.is_some_and(|dt| dt < 0.0));
            assert!(step.fused.latitude.is_finite());
        }
    }

    #[test]
    fn test_variance_non_increasing_for_both_variants() {
        for kind in [EstimatorKind::Scalar, EstimatorKind::PositionVelocity] {
            let mut kf = stage(kind);
            let jitter = [0.0, 2e-5, -1e-5, 3e-5, -2e-5, 1e-5, 0.0, -3e-5, 2e-5, -1e-5];
            let mut prev = f64::INFINITY;
            for (i, j) in jitter.iter().enumerate() {
                kf.update((45.0 + j, 7.0 - j), 5.0, i as i64 * 1000, None);
                let var = kf.position_variance();
                assert!(var <= prev * (1.0 + 1e-12), "{kind:?}: {var} > {prev}");
                prev = var;
            }
        }
    }

    #[test]
    fn test_velocity_hint_overrides() {
        let mut kf = stage(EstimatorKind::PositionVelocity);
        kf.update((0.0, 0.0), 5.0, 0, None);
        let step = kf.update((0.0, 0.0), 5.0, 1_000, Some((1e-4, 0.0)));
        assert!(step.velocity_overridden);
        let (v_lat, v_lng) = step.fused.velocity.unwrap();
        assert_abs_diff_eq!(v_lat, 1e-4, epsilon = 1e-15);
        assert_abs_diff_eq!(v_lng, 0.0, epsilon = 1e-15);
    }

    #[test]
    fn test_accuracy_weighted_noise() {
        let kf = KalmanStage::from_config(&FusionConfig {
            accuracy_weighted_noise: true,
            ..FusionConfig::default()
        });
        assert_abs_diff_eq!(
            kf.measurement_noise(10.0),
            meters_std_to_deg_var(10.0),
            epsilon = 1e-20
        );
    }
}
