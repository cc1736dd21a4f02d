use serde::{Deserialize, Serialize};

use crate::types::{GainMat, MeasMat, MeasVec, ObsMat, StateMat4, StateVec4};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PositionVelocityState {
    /// (lat, lng) [deg]
    pub position: (f64, f64),
    /// (vel_lat, vel_lng) [deg/s]
    pub velocity: (f64, f64),
    /// Diagonal of P
    pub variance: [f64; 4],
    pub updates: u64,
    pub skipped_predictions: u64,
    pub skipped_corrections: u64,
}

/// Constant-velocity Kalman filter over [lat, lng, vel_lat, vel_lng].
///
/// ```text
/// F(dt) = | 1 0 dt 0  |     H = | 1 0 0 0 |
///         | 0 1 0  dt |         | 0 1 0 0 |
///         | 0 0 1  0  |
///         | 0 0 0  1  |
/// ```
/// Noise densities are in degrees; Q is scaled by dt.
#[derive(Clone, Debug)]
pub struct PositionVelocityKalman {
    state: StateVec4,
    covariance: StateMat4,

    /// Position random walk [deg²/s]
    q_pos: f64,
    /// Velocity random walk [(deg/s)²/s]
    q_vel: f64,
    /// Default measurement variance [deg²]
    r: f64,
    /// Initial velocity variance [(deg/s)²]
    initial_vel_var: f64,

    initialized: bool,
    updates: u64,
    skipped_predictions: u64,
    skipped_corrections: u64,
}

impl PositionVelocityKalman {
    pub fn new(q_pos: f64, q_vel: f64, r: f64, initial_vel_var: f64) -> Self {
        Self {
            state: StateVec4::zeros(),
            covariance: Self::initial_covariance(r, initial_vel_var),
            q_pos,
            q_vel,
            r,
            initial_vel_var,
            initialized: false,
            updates: 0,
            skipped_predictions: 0,
            skipped_corrections: 0,
        }
    }

    fn initial_covariance(r: f64, vel_var: f64) -> StateMat4 {
        StateMat4::from_diagonal(&StateVec4::new(r, r, vel_var, vel_var))
    }

    fn transition_matrix(dt: f64) -> StateMat4 {
        let mut f = StateMat4::identity();
        f[(0, 2)] = dt;
        f[(1, 3)] = dt;
        f
    }

    fn process_noise(&self, dt: f64) -> StateMat4 {
        StateMat4::from_diagonal(&StateVec4::new(
            self.q_pos * dt,
            self.q_pos * dt,
            self.q_vel * dt,
            self.q_vel * dt,
        ))
    }

    fn observation_matrix() -> ObsMat {
        let mut h = ObsMat::zeros();
        h[(0, 0)] = 1.0;
        h[(1, 1)] = 1.0;
        h
    }

    /// Seed the state from the first measurement.
    pub fn initialize(&mut self, z: (f64, f64), velocity: Option<(f64, f64)>) {
        let (v_lat, v_lng) = velocity.unwrap_or((0.0, 0.0));
        self.state = StateVec4::new(z.0, z.1, v_lat, v_lng);
        self.covariance = Self::initial_covariance(self.r, self.initial_vel_var);
        self.initialized = true;
        self.updates = 1;
    }

    /// Propagate x and P forward by `dt` seconds.
    /// Non-positive (or NaN) dt is treated as a simultaneous sample: no-op.
    pub fn predict(&mut self, dt: f64) -> bool {
        if !(dt > 0.0) || !dt.is_finite() {
            self.skipped_predictions += 1;
            return false;
        }
        let f = Self::transition_matrix(dt);
        self.state = f * self.state;
        self.covariance = f * self.covariance * f.transpose() + self.process_noise(dt);
        true
    }

    /// Position measurement update with variance `r` per axis.
    /// A singular innovation covariance skips the correction and keeps state.
    pub fn correct(&mut self, z: (f64, f64), r: f64) -> bool {
        let h = Self::observation_matrix();
        let r_mat = MeasMat::from_diagonal_element(r);

        let innovation = MeasVec::new(z.0, z.1) - h * self.state;
        let s = h * self.covariance * h.transpose() + r_mat;
        let Some(s_inv) = s.try_inverse() else {
            self.skipped_corrections += 1;
            return false;
        };
        let k: GainMat = self.covariance * h.transpose() * s_inv;

        self.state += k * innovation;

        // Joseph form keeps P symmetric positive-definite under rounding
        let i_kh = StateMat4::identity() - k * h;
        let p = i_kh * self.covariance * i_kh.transpose() + k * r_mat * k.transpose();
        self.covariance = (p + p.transpose()) * 0.5;

        self.updates += 1;
        true
    }

    /// Replace the velocity components outright (no probabilistic fusion).
    pub fn override_velocity(&mut self, v_lat: f64, v_lng: f64) {
        self.state[2] = v_lat;
        self.state[3] = v_lng;
    }

    pub fn position(&self) -> (f64, f64) {
        (self.state[0], self.state[1])
    }

    pub fn velocity(&self) -> (f64, f64) {
        (self.state[2], self.state[3])
    }

    /// Mean of the lat/lng variances
    pub fn position_variance(&self) -> f64 {
        (self.covariance[(0, 0)] + self.covariance[(1, 1)]) / 2.0
    }

    pub fn covariance(&self) -> &StateMat4 {
        &self.covariance
    }

    pub fn measurement_noise(&self) -> f64 {
        self.r
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn get_state(&self) -> PositionVelocityState {
        PositionVelocityState {
            position: self.position(),
            velocity: self.velocity(),
            variance: [
                self.covariance[(0, 0)],
                self.covariance[(1, 1)],
                self.covariance[(2, 2)],
                self.covariance[(3, 3)],
            ],
            updates: self.updates,
            skipped_predictions: self.skipped_predictions,
            skipped_corrections: self.skipped_corrections,
        }
    }

    pub fn reset(&mut self) {
        self.state = StateVec4::zeros();
        self.covariance = Self::initial_covariance(self.r, self.initial_vel_var);
        self.initialized = false;
        self.updates = 0;
        self.skipped_predictions = 0;
        self.skipped_corrections = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    // Meter-scale noise keeps the numbers readable; the filter is unit-agnostic.
    fn filter() -> PositionVelocityKalman {
        PositionVelocityKalman::new(0.01, 0.25, 25.0, 100.0)
    }

    #[test]
    fn test_predict_moves_position_by_velocity() {
        let mut kf = filter();
        kf.initialize((0.0, 0.0), Some((2.0, -1.0)));
        assert!(kf.predict(0.5));
        let (lat, lng) = kf.position();
        assert_abs_diff_eq!(lat, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(lng, -0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_non_positive_dt_preserves_state() {
        let mut kf = filter();
        kf.initialize((1.0, 2.0), Some((3.0, 4.0)));
        let before = *kf.covariance();
        assert!(!kf.predict(0.0));
        assert!(!kf.predict(-1.0));
        assert!(!kf.predict(f64::NAN));
        assert_eq!(kf.position(), (1.0, 2.0));
        assert_eq!(*kf.covariance(), before);
        assert_eq!(kf.get_state().skipped_predictions, 3);
    }

    #[test]
    fn test_position_variance_non_increasing_on_stationary_target() {
        let mut kf = filter();
        let noise = [
            (1.0, -0.5),
            (-2.0, 0.3),
            (0.7, 1.1),
            (-0.2, -1.8),
            (2.4, 0.6),
            (-1.1, -0.2),
            (0.3, 2.0),
            (-0.9, 0.4),
            (1.6, -1.3),
            (0.0, 0.9),
            (-0.4, -0.7),
            (0.8, 0.1),
        ];
        kf.initialize(noise[0], None);
        let mut prev = kf.position_variance();
        for z in &noise[1..] {
            assert!(kf.predict(1.0));
            assert!(kf.correct(*z, 25.0));
            let var = kf.position_variance();
            assert!(var <= prev * (1.0 + 1e-12), "{var} > {prev}");
            prev = var;
        }
        let (lat, lng) = kf.position();
        assert!(lat.abs() < 3.0 && lng.abs() < 3.0);
    }

    #[test]
    fn test_covariance_stays_symmetric_positive_definite() {
        let mut kf = filter();
        kf.initialize((0.0, 0.0), None);
        for i in 1..50 {
            kf.predict(1.0);
            kf.correct((i as f64 * 0.5, 0.0), 25.0);
        }
        let p = kf.covariance();
        assert_abs_diff_eq!((p - p.transpose()).norm(), 0.0, epsilon = 1e-9);
        assert!(p.cholesky().is_some());
    }

    #[test]
    fn test_tracks_constant_velocity() {
        let mut kf = filter();
        kf.initialize((0.0, 0.0), None);
        for i in 1..40 {
            kf.predict(1.0);
            kf.correct((i as f64 * 2.0, 0.0), 25.0);
        }
        let (v_lat, v_lng) = kf.velocity();
        assert_abs_diff_eq!(v_lat, 2.0, epsilon = 0.3);
        assert_abs_diff_eq!(v_lng, 0.0, epsilon = 0.3);
    }

    #[test]
    fn test_singular_innovation_skips_correction() {
        // Zero P and zero R → S = 0
        let mut kf = PositionVelocityKalman::new(0.0, 0.0, 0.0, 0.0);
        kf.initialize((1.0, 1.0), None);
        assert!(!kf.correct((5.0, 5.0), 0.0));
        assert_eq!(kf.position(), (1.0, 1.0));
        assert_eq!(kf.get_state().skipped_corrections, 1);
    }

    #[test]
    fn test_velocity_override() {
        let mut kf = filter();
        kf.initialize((0.0, 0.0), None);
        kf.override_velocity(0.5, 0.25);
        assert_eq!(kf.velocity(), (0.5, 0.25));
    }

    #[test]
    fn test_reset_matches_fresh_filter() {
        let mut kf = filter();
        kf.initialize((3.0, 3.0), Some((1.0, 1.0)));
        kf.predict(1.0);
        kf.correct((4.0, 4.0), 25.0);
        kf.reset();
        let fresh = filter();
        assert_eq!(kf.covariance(), fresh.covariance());
        assert!(!kf.is_initialized());
    }
}
