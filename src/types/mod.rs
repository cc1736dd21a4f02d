pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

/// One raw location measurement as delivered by the platform location watch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius [m]
    pub accuracy: f64,
    /// Ground speed [m/s], absent on many fixes
    #[serde(default)]
    pub speed: Option<f64>,
    /// Course over ground [deg clockwise from north]
    #[serde(default)]
    pub heading: Option<f64>,
    /// Unix time [ms]
    pub timestamp: i64,
}

impl RawFix {
    pub fn new(latitude: f64, longitude: f64, accuracy: f64, timestamp: i64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            speed: None,
            heading: None,
            timestamp,
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }
}

/// Device compass reading. Last value wins; no timestamp correlation with fixes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrientationSample {
    /// Compass heading [deg clockwise from north]
    #[serde(default)]
    pub heading: Option<f64>,
}

impl OrientationSample {
    pub fn new(heading: f64) -> Self {
        Self {
            heading: Some(heading),
        }
    }
}

/// Output of the Kalman stage.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FusedPosition {
    pub latitude: f64,
    pub longitude: f64,
    /// (vel_lat, vel_lng) [deg/s], only produced by the 4-state estimator
    pub velocity: Option<(f64, f64)>,
}

impl FusedPosition {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            velocity: None,
        }
    }
}

/// What subscribers (map marker, status display) receive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionOutput {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    /// Effective speed used for dead reckoning [m/s]
    pub speed: f64,
    /// Resolved heading (compass, then GPS, then last known) [deg]
    pub heading: Option<f64>,
    pub velocity: Option<(f64, f64)>,
    pub timestamp: i64,
    /// True when projected between fixes rather than produced by a fix
    pub extrapolated: bool,
}
