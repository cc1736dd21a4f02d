//! Accuracy gate applied to every fix before it touches filter state.

use serde::{Deserialize, Serialize};

use crate::config::FusionConfig;
use crate::types::RawFix;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Accuracy radius above the configured limit
    Inaccurate { accuracy_m: f64, limit_m: f64 },
    /// NaN/infinite coordinates or a negative accuracy
    InvalidFix,
}

#[derive(Clone, Debug, PartialEq)]
pub enum GateVerdict {
    Accept,
    /// Usable, but worth telling the user the signal is weak
    AcceptLowAccuracy { accuracy_m: f64 },
    Reject(RejectReason),
}

#[derive(Clone, Debug)]
pub struct AccuracyGate {
    max_accuracy_m: f64,
    warn_accuracy_m: f64,
}

impl AccuracyGate {
    pub fn new(max_accuracy_m: f64, warn_accuracy_m: f64) -> Self {
        Self {
            max_accuracy_m,
            warn_accuracy_m,
        }
    }

    pub fn from_config(config: &FusionConfig) -> Self {
        Self::new(config.max_accuracy_m, config.warn_accuracy_m)
    }

    pub fn check(&self, fix: &RawFix) -> GateVerdict {
        if !fix.latitude.is_finite()
            || !fix.longitude.is_finite()
            || !fix.accuracy.is_finite()
            || fix.accuracy < 0.0
        {
            return GateVerdict::Reject(RejectReason::InvalidFix);
        }

        if fix.accuracy > self.max_accuracy_m {
            return GateVerdict::Reject(RejectReason::Inaccurate {
                accuracy_m: fix.accuracy,
                limit_m: self.max_accuracy_m,
            });
        }

        if fix.accuracy > self.warn_accuracy_m {
            return GateVerdict::AcceptLowAccuracy {
                accuracy_m: fix.accuracy,
            };
        }

        GateVerdict::Accept
    }
}
