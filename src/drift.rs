//! Anti-jump filter: drops fixes that land implausibly far from the last
//! accepted one (satellite re-acquisition, multipath).

use crate::geodesy::haversine_distance;
use crate::types::RawFix;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rejected {
    pub distance_m: f64,
}

#[derive(Clone, Copy, Debug)]
pub struct DriftFilter {
    max_jump_m: f64,
}

impl DriftFilter {
    pub fn new(max_jump_m: f64) -> Self {
        Self { max_jump_m }
    }

    pub fn max_jump_m(&self) -> f64 {
        self.max_jump_m
    }

    /// Pure predicate over two fixes. No last accepted fix means cold start,
    /// which always passes.
    pub fn accept<'a>(
        &self,
        candidate: &'a RawFix,
        last_accepted: Option<&RawFix>,
    ) -> Result<&'a RawFix, Rejected> {
        let Some(last) = last_accepted else {
            return Ok(candidate);
        };

        let distance_m = haversine_distance(
            last.latitude,
            last.longitude,
            candidate.latitude,
            candidate.longitude,
        );
        // NaN distance never compares greater, so guard it explicitly
        if distance_m > self.max_jump_m || !distance_m.is_finite() {
            Err(Rejected { distance_m })
        } else {
            Ok(candidate)
        }
    }
}
