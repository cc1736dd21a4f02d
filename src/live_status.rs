use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::position_fusion::PositionFusionPipeline;
use crate::status::FixHealthReport;

/// Snapshot written periodically for external status displays.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LiveStatus {
    /// RFC 3339 wall-clock time of the snapshot
    pub timestamp: String,
    pub uptime_seconds: u64,
    // Pipeline counters
    pub fixes_received: u64,
    pub fixes_accepted: u64,
    pub rejected_accuracy: u64,
    pub rejected_drift: u64,
    pub reanchors: u64,
    pub extrapolations: u64,
    // Latest output
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub speed: f64,
    pub heading_deg: Option<f64>,
    pub compass_heading_deg: Option<f64>,
    pub extrapolated: bool,
    // Health monitoring
    pub gps_healthy: bool,
    pub gps_silence_duration_secs: f64,
    pub last_advisory: Option<String>,
    pub last_error: Option<String>,
}

impl LiveStatus {
    pub fn capture(
        pipeline: &PositionFusionPipeline,
        health: &FixHealthReport,
        uptime_seconds: u64,
    ) -> Self {
        let stats = pipeline.stats();
        let output = pipeline.last_output();
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds,
            fixes_received: stats.fixes_received,
            fixes_accepted: stats.fixes_accepted,
            rejected_accuracy: stats.rejected_accuracy,
            rejected_drift: stats.rejected_drift,
            reanchors: stats.reanchors,
            extrapolations: stats.extrapolations,
            latitude: output.map(|o| o.latitude),
            longitude: output.map(|o| o.longitude),
            accuracy: output.map(|o| o.accuracy),
            speed: output.map(|o| o.speed).unwrap_or(0.0),
            heading_deg: output.and_then(|o| o.heading),
            compass_heading_deg: pipeline.compass().get(),
            extrapolated: output.map(|o| o.extrapolated).unwrap_or(false),
            gps_healthy: health.healthy,
            gps_silence_duration_secs: health.silence_secs,
            last_advisory: health.last_advisory.clone(),
            last_error: health.last_error.map(|e| e.to_string()),
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FusionConfig;
    use crate::status::FixHealth;
    use crate::types::RawFix;

    #[test]
    fn test_capture_and_save() {
        let mut pipeline = PositionFusionPipeline::new(FusionConfig::default()).unwrap();
        let health = FixHealth::new();
        let events = pipeline.feed_fix(&RawFix::new(48.85, 2.35, 4.0, 0));
        health.record_fix(&events);

        let status = LiveStatus::capture(&pipeline, &health.report(), 12);
        assert_eq!(status.fixes_accepted, 1);
        assert_eq!(status.latitude, Some(48.85));
        assert!(status.gps_healthy);

        let path = std::env::temp_dir().join(format!("live_status_{}.json", std::process::id()));
        status.save(&path).unwrap();
        let loaded: LiveStatus =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.timestamp, status.timestamp);
        assert_eq!(loaded.latitude, Some(48.85));
        assert_eq!(loaded.uptime_seconds, 12);
        let _ = std::fs::remove_file(&path);
    }
}
