use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};

use crate::position_fusion::FusionEvent;
use crate::sources::LocationError;

const DEFAULT_SILENCE_SECS: u64 = 30;

/// Fix-stream health shared between the processing task and whoever displays
/// status. Silence is measured from the last fix of any quality.
#[derive(Clone, Debug)]
pub struct FixHealth {
    last_fix: Arc<Mutex<Instant>>,
    silence_threshold: Duration,
    accepted: Arc<Mutex<u64>>,
    rejected: Arc<Mutex<u64>>,
    last_advisory: Arc<Mutex<Option<String>>>,
    last_error: Arc<Mutex<Option<LocationError>>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FixHealthReport {
    pub healthy: bool,
    pub silence_secs: f64,
    pub accepted: u64,
    pub rejected: u64,
    pub last_advisory: Option<String>,
    pub last_error: Option<LocationError>,
}

impl FixHealth {
    pub fn new() -> Self {
        Self::with_threshold(Duration::from_secs(DEFAULT_SILENCE_SECS))
    }

    pub fn with_threshold(silence_threshold: Duration) -> Self {
        FixHealth {
            last_fix: Arc::new(Mutex::new(Instant::now())),
            silence_threshold,
            accepted: Arc::new(Mutex::new(0)),
            rejected: Arc::new(Mutex::new(0)),
            last_advisory: Arc::new(Mutex::new(None)),
            last_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Record one processed fix together with what the pipeline said about it.
    pub fn record_fix(&self, events: &[FusionEvent]) {
        if let Ok(mut time) = self.last_fix.lock() {
            *time = Instant::now();
        }

        let rejected = events.iter().any(|e| {
            matches!(e, FusionEvent::FixRejected(_) | FusionEvent::DriftRejected { .. })
        });
        let counter = if rejected { &self.rejected } else { &self.accepted };
        if let Ok(mut n) = counter.lock() {
            *n += 1;
        }

        if let Some(advisory) = events.iter().find_map(advisory_text) {
            if let Ok(mut last) = self.last_advisory.lock() {
                *last = Some(advisory);
            }
        }
    }

    pub fn record_error(&self, error: LocationError) {
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(error);
        }
    }

    pub fn time_since_last_fix(&self) -> Option<Duration> {
        self.last_fix.lock().ok().map(|t| t.elapsed())
    }

    pub fn is_silent(&self) -> bool {
        self.time_since_last_fix()
            .map(|d| d > self.silence_threshold)
            .unwrap_or(false)
    }

    pub fn report(&self) -> FixHealthReport {
        FixHealthReport {
            healthy: !self.is_silent(),
            silence_secs: self
                .time_since_last_fix()
                .unwrap_or_default()
                .as_secs_f64(),
            accepted: self.accepted.lock().map(|n| *n).unwrap_or(0),
            rejected: self.rejected.lock().map(|n| *n).unwrap_or(0),
            last_advisory: self.last_advisory.lock().ok().and_then(|a| a.clone()),
            last_error: self.last_error.lock().ok().and_then(|e| *e),
        }
    }

    /// One-line status for a status display.
    pub fn format_status(&self) -> String {
        let report = self.report();

        let gps = if report.healthy {
            "✓".to_string()
        } else {
            format!("⚠ (silent {:.1}s)", report.silence_secs)
        };
        let mut line = format!(
            "GPS: {} | fixes: {} ok, {} rejected",
            gps, report.accepted, report.rejected
        );
        if let Some(advisory) = report.last_advisory {
            line.push_str(&format!(" | {}", advisory));
        }
        if let Some(error) = report.last_error {
            line.push_str(&format!(" | last error: {}", error));
        }
        line
    }

    /// Forget counters and messages; the silence clock restarts now.
    pub fn reset(&self) {
        if let Ok(mut time) = self.last_fix.lock() {
            *time = Instant::now();
        }
        for counter in [&self.accepted, &self.rejected] {
            if let Ok(mut n) = counter.lock() {
                *n = 0;
            }
        }
        if let Ok(mut a) = self.last_advisory.lock() {
            *a = None;
        }
        if let Ok(mut e) = self.last_error.lock() {
            *e = None;
        }
    }
}

impl Default for FixHealth {
    fn default() -> Self {
        Self::new()
    }
}

fn advisory_text(event: &FusionEvent) -> Option<String> {
    match event {
        FusionEvent::LowAccuracy { accuracy_m } => {
            Some(format!("low accuracy ({:.0} m)", accuracy_m))
        }
        FusionEvent::DriftRejected { distance_m, .. } => {
            Some(format!("jump ignored ({:.0} m)", distance_m))
        }
        FusionEvent::Reanchored { .. } => Some("position re-anchored".to_string()),
        _ => None,
    }
}
