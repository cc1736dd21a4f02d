use serde::{Deserialize, Serialize};

/// 1-D constant-position Kalman filter.
///
/// Model: x_k = x_{k-1} + w (variance Q), z_k = x_k + v (variance R), Q ≪ R.
#[derive(Clone, Debug)]
pub struct ScalarKalman {
    q: f64,
    r: f64,
    x: f64,
    p: f64,
    initialized: bool,
}

impl ScalarKalman {
    pub fn new(process_noise: f64, measurement_noise: f64) -> Self {
        Self {
            q: process_noise,
            r: measurement_noise,
            x: 0.0,
            p: measurement_noise,
            initialized: false,
        }
    }

    /// Grow the variance by Q. Skipped when `dt` is not strictly positive.
    pub fn predict(&mut self, dt: f64) -> bool {
        if !(dt > 0.0) || !self.initialized {
            return false;
        }
        self.p += self.q;
        true
    }

    /// Correct with measurement `z` of variance `r`. Returns false when the
    /// gain would divide by zero; state is left untouched in that case.
    pub fn correct(&mut self, z: f64, r: f64) -> bool {
        if !self.initialized {
            self.x = z;
            self.p = r;
            self.initialized = true;
            return true;
        }

        let s = self.p + r;
        if s == 0.0 || !s.is_finite() {
            return false;
        }
        let k = self.p / s;
        self.x += k * (z - self.x);
        self.p *= 1.0 - k;
        true
    }

    pub fn estimate(&self) -> f64 {
        self.x
    }

    pub fn variance(&self) -> f64 {
        self.p
    }

    pub fn measurement_noise(&self) -> f64 {
        self.r
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn reset(&mut self) {
        self.x = 0.0;
        self.p = self.r;
        self.initialized = false;
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AxisKalmanState {
    pub position: (f64, f64),
    pub variance: (f64, f64),
}

/// Independent latitude and longitude filters sharing the same Q and R.
#[derive(Clone, Debug)]
pub struct AxisKalman {
    lat: ScalarKalman,
    lng: ScalarKalman,
}

impl AxisKalman {
    pub fn new(process_noise: f64, measurement_noise: f64) -> Self {
        Self {
            lat: ScalarKalman::new(process_noise, measurement_noise),
            lng: ScalarKalman::new(process_noise, measurement_noise),
        }
    }

    pub fn predict(&mut self, dt: f64) -> bool {
        let lat = self.lat.predict(dt);
        let lng = self.lng.predict(dt);
        lat && lng
    }

    pub fn correct(&mut self, z: (f64, f64), r: f64) -> bool {
        let lat = self.lat.correct(z.0, r);
        let lng = self.lng.correct(z.1, r);
        lat && lng
    }

    pub fn position(&self) -> (f64, f64) {
        (self.lat.estimate(), self.lng.estimate())
    }

    pub fn is_initialized(&self) -> bool {
        self.lat.is_initialized()
    }

    pub fn measurement_noise(&self) -> f64 {
        self.lat.measurement_noise()
    }

    pub fn get_state(&self) -> AxisKalmanState {
        AxisKalmanState {
            position: self.position(),
            variance: (self.lat.variance(), self.lng.variance()),
        }
    }

    pub fn reset(&mut self) {
        self.lat.reset();
        self.lng.reset();
    }
}
