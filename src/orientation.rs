use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::geodesy::normalize_heading;
use crate::types::OrientationSample;

const EMPTY: u64 = f64::NAN.to_bits();

/// Latest compass heading, shared between the orientation stream (writer)
/// and fix processing (reader). Last write wins; reads never tear.
#[derive(Clone, Debug)]
pub struct CompassHeading {
    bits: Arc<AtomicU64>,
}

impl CompassHeading {
    pub fn new() -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(EMPTY)),
        }
    }

    /// Apply an orientation event; samples without a heading are ignored.
    pub fn on_sample(&self, sample: &OrientationSample) {
        if let Some(heading) = sample.heading.filter(|h| h.is_finite()) {
            self.set(heading);
        }
    }

    pub fn set(&self, heading: f64) {
        self.bits
            .store(normalize_heading(heading).to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> Option<f64> {
        let value = f64::from_bits(self.bits.load(Ordering::Relaxed));
        if value.is_nan() {
            None
        } else {
            Some(value)
        }
    }

    pub fn clear(&self) {
        self.bits.store(EMPTY, Ordering::Relaxed);
    }
}

impl Default for CompassHeading {
    fn default() -> Self {
        Self::new()
    }
}
