//! Linear algebra type system for the position estimators
//!
//! Fixed-size aliases so the 4-state filter gets compile-time dimension checking.

use nalgebra::{SMatrix, SVector};

// ===== State Dimensions =====
pub const STATE_DIM: usize = 4; // [lat, lng, vel_lat, vel_lng]

// ===== Measurement Dimensions =====
pub const MEASURE_DIM_POS: usize = 2; // (lat, lng)

// ===== 4-State Filter Types =====
pub type StateVec4 = SVector<f64, STATE_DIM>;
pub type StateMat4 = SMatrix<f64, STATE_DIM, STATE_DIM>;

// Measurement types
pub type MeasVec = SVector<f64, MEASURE_DIM_POS>;
pub type MeasMat = SMatrix<f64, MEASURE_DIM_POS, MEASURE_DIM_POS>;

// Observation matrix H (2×4) and Kalman gain K (4×2)
pub type ObsMat = SMatrix<f64, MEASURE_DIM_POS, STATE_DIM>;
pub type GainMat = SMatrix<f64, STATE_DIM, MEASURE_DIM_POS>;
