//! Dead reckoning between fixes: project the last fused position along the
//! best available heading at the best available speed.

use crate::geodesy::{normalize_heading, offset_position};
use crate::types::FusedPosition;

/// Compass beats GPS course, which beats whatever we last knew.
pub fn resolve_heading(compass: Option<f64>, gps: Option<f64>, last: Option<f64>) -> Option<f64> {
    compass
        .or(gps)
        .or(last)
        .filter(|h| h.is_finite())
        .map(normalize_heading)
}

#[derive(Clone, Debug)]
pub struct DeadReckoner {
    min_motion_speed: f64,
    max_extrapolation_secs: f64,
    last_timestamp: Option<i64>,
    last_heading: Option<f64>,
    last_speed: Option<f64>,
}

impl DeadReckoner {
    pub fn new(min_motion_speed: f64, max_extrapolation_secs: f64) -> Self {
        Self {
            min_motion_speed,
            max_extrapolation_secs,
            last_timestamp: None,
            last_heading: None,
            last_speed: None,
        }
    }

    /// Project `fused` forward by the time elapsed since the previous call.
    ///
    /// The first call only records the timestamp. A missing speed falls back
    /// to the last known one; below the motion threshold nothing moves.
    pub fn extrapolate(
        &mut self,
        fused: &FusedPosition,
        speed: Option<f64>,
        gps_heading: Option<f64>,
        compass_heading: Option<f64>,
        timestamp: i64,
    ) -> FusedPosition {
        let heading = resolve_heading(compass_heading, gps_heading, self.last_heading);
        let effective_speed = self.effective_speed(speed);
        if heading.is_some() {
            self.last_heading = heading;
        }
        if let Some(s) = speed.filter(|s| s.is_finite()) {
            self.last_speed = Some(s);
        }

        let Some(prev) = self.last_timestamp else {
            self.last_timestamp = Some(timestamp);
            return *fused;
        };
        let dt = timestamp.saturating_sub(prev) as f64 / 1000.0;
        if dt <= 0.0 {
            // Clock went backwards or duplicate sample, keep the later reference
            return *fused;
        }
        self.last_timestamp = Some(timestamp);

        match heading {
            Some(h) => self.project_with(fused, effective_speed, h, dt),
            None => *fused,
        }
    }

    /// Pure projection along `heading` at the remembered speed; no state change.
    /// Callers resolve the heading so the published one matches the motion.
    pub fn project(&self, fused: &FusedPosition, heading: Option<f64>, dt: f64) -> FusedPosition {
        match (heading.filter(|h| h.is_finite()), self.last_speed) {
            (Some(h), Some(s)) if dt > 0.0 => self.project_with(fused, s, h, dt),
            _ => *fused,
        }
    }

    fn project_with(
        &self,
        fused: &FusedPosition,
        speed: f64,
        heading: f64,
        dt: f64,
    ) -> FusedPosition {
        if !(speed >= self.min_motion_speed) {
            return *fused;
        }
        let dt = dt.min(self.max_extrapolation_secs);
        let (latitude, longitude) =
            offset_position(fused.latitude, fused.longitude, speed * dt, heading);
        FusedPosition {
            latitude,
            longitude,
            velocity: fused.velocity,
        }
    }

    /// Speed used for projection: this fix's, else the last non-null, else 0.
    pub fn effective_speed(&self, speed: Option<f64>) -> f64 {
        speed
            .filter(|s| s.is_finite())
            .or(self.last_speed)
            .unwrap_or(0.0)
    }

    pub fn last_heading(&self) -> Option<f64> {
        self.last_heading
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.last_timestamp
    }

    pub fn reset(&mut self) {
        self.last_timestamp = None;
        self.last_heading = None;
        self.last_speed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::METERS_PER_DEGREE_LAT;
    use approx::assert_abs_diff_eq;

    fn reckoner() -> DeadReckoner {
        DeadReckoner::new(0.2, 30.0)
    }

    #[test]
    fn test_first_call_returns_input() {
        let mut dr = reckoner();
        let pos = FusedPosition::at(10.0, 20.0);
        let out = dr.extrapolate(&pos, Some(10.0), Some(0.0), None, 1_000);
        assert_eq!(out, pos);
        assert_eq!(dr.last_timestamp(), Some(1_000));
    }

    #[test]
    fn test_due_north_one_second() {
        let mut dr = reckoner();
        let pos = FusedPosition::at(0.0, 0.0);
        dr.extrapolate(&pos, Some(10.0), Some(0.0), None, 0);
        let out = dr.extrapolate(&pos, Some(10.0), Some(0.0), None, 1_000);
        assert_abs_diff_eq!(out.latitude, 10.0 / METERS_PER_DEGREE_LAT, epsilon = 1e-12);
        assert_abs_diff_eq!(out.latitude, 9e-5, epsilon = 1e-6);
        assert_abs_diff_eq!(out.longitude, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_below_threshold_is_stationary() {
        let mut dr = reckoner();
        let pos = FusedPosition::at(1.0, 1.0);
        dr.extrapolate(&pos, Some(0.1), Some(90.0), None, 0);
        let out = dr.extrapolate(&pos, Some(0.19), Some(90.0), None, 5_000);
        assert_eq!(out, pos);
    }

    #[test]
    fn test_zero_speed_is_idempotent() {
        let mut dr = reckoner();
        let pos = FusedPosition::at(51.5, -0.12);
        for _ in 0..5 {
            assert_eq!(dr.extrapolate(&pos, Some(0.0), Some(45.0), None, 7_000), pos);
        }
    }

    #[test]
    fn test_non_monotonic_clock_does_not_move() {
        let mut dr = reckoner();
        let pos = FusedPosition::at(0.0, 0.0);
        dr.extrapolate(&pos, Some(10.0), Some(0.0), None, 5_000);
        assert_eq!(dr.extrapolate(&pos, Some(10.0), Some(0.0), None, 5_000), pos);
        assert_eq!(dr.extrapolate(&pos, Some(10.0), Some(0.0), None, 4_000), pos);
        assert_eq!(dr.last_timestamp(), Some(5_000));
    }

    #[test]
    fn test_compass_beats_gps_heading() {
        let mut dr = reckoner();
        let pos = FusedPosition::at(0.0, 0.0);
        dr.extrapolate(&pos, Some(10.0), Some(0.0), Some(90.0), 0);
        let out = dr.extrapolate(&pos, Some(10.0), Some(0.0), Some(90.0), 1_000);
        // Compass says east
        assert_abs_diff_eq!(out.latitude, 0.0, epsilon = 1e-12);
        assert!(out.longitude > 0.0);
    }

    #[test]
    fn test_missing_speed_falls_back_to_last_known() {
        let mut dr = reckoner();
        let pos = FusedPosition::at(0.0, 0.0);
        dr.extrapolate(&pos, Some(10.0), Some(0.0), None, 0);
        let out = dr.extrapolate(&pos, None, None, None, 1_000);
        assert_abs_diff_eq!(out.latitude, 10.0 / METERS_PER_DEGREE_LAT, epsilon = 1e-12);
        assert_eq!(dr.effective_speed(None), 10.0);
    }

    #[test]
    fn test_no_heading_stays_put() {
        let mut dr = reckoner();
        let pos = FusedPosition::at(0.0, 0.0);
        dr.extrapolate(&pos, Some(10.0), None, None, 0);
        assert_eq!(dr.extrapolate(&pos, Some(10.0), None, None, 1_000), pos);
    }

    #[test]
    fn test_projection_is_capped() {
        let mut dr = DeadReckoner::new(0.2, 2.0);
        let pos = FusedPosition::at(0.0, 0.0);
        dr.extrapolate(&pos, Some(10.0), Some(0.0), None, 0);
        let out = dr.project(&pos, dr.last_heading(), 60.0);
        assert_abs_diff_eq!(out.latitude, 20.0 / METERS_PER_DEGREE_LAT, epsilon = 1e-12);
    }

    #[test]
    fn test_projection_follows_given_heading() {
        let mut dr = reckoner();
        let pos = FusedPosition::at(0.0, 0.0);
        dr.extrapolate(&pos, Some(10.0), Some(0.0), None, 0);
        let out = dr.project(&pos, Some(90.0), 1.0);
        assert_abs_diff_eq!(out.latitude, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out.longitude, 10.0 / METERS_PER_DEGREE_LAT, epsilon = 1e-12);
        assert_eq!(dr.project(&pos, None, 1.0), pos);
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let mut dr = reckoner();
        let pos = FusedPosition::at(0.0, 0.0);
        dr.extrapolate(&pos, Some(10.0), Some(0.0), None, i64::MAX);
        assert_eq!(dr.extrapolate(&pos, Some(10.0), Some(0.0), None, i64::MIN), pos);
        assert_eq!(dr.last_timestamp(), Some(i64::MAX));
    }

    #[test]
    fn test_resolve_heading_order() {
        assert_eq!(resolve_heading(Some(10.0), Some(20.0), Some(30.0)), Some(10.0));
        assert_eq!(resolve_heading(None, Some(20.0), Some(30.0)), Some(20.0));
        assert_eq!(resolve_heading(None, None, Some(-30.0)), Some(330.0));
        assert_eq!(resolve_heading(None, None, None), None);
    }
}
