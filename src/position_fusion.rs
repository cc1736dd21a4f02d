// position_fusion.rs - Pure computation layer for position tracking
//
// Everything in this module is independent of:
//   - tokio / async runtime
//   - the platform location and orientation watches
//   - File I/O, status files
//
// Fixes and compass samples go in, fused positions and events come out.
// Recorded logs, simulated routes and live sources all drive the same code.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::FusionConfig;
use crate::dead_reckoning::{resolve_heading, DeadReckoner};
use crate::drift::{DriftFilter, Rejected};
use crate::error::Result;
use crate::filters::KalmanStage;
use crate::geodesy::velocity_components;
use crate::ingest::{AccuracyGate, GateVerdict, RejectReason};
use crate::orientation::CompassHeading;
use crate::sink::{OutputSink, PositionSubscriber, SubscriptionId};
use crate::smoothing::PositionSmoother;
use crate::types::{FusedPosition, OrientationSample, PositionOutput, RawFix};

// ─── Events ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum FusionEvent {
    ColdStart { lat: f64, lng: f64 },
    LowAccuracy { accuracy_m: f64 },
    FixRejected(RejectReason),
    DriftRejected { distance_m: f64, consecutive: u32 },
    Reanchored { distance_m: f64 },
    PredictionSkipped { dt_secs: f64 },
    CorrectionSkipped,
    VelocityOverridden { v_lat: f64, v_lng: f64 },
}

impl FusionEvent {
    /// The fix was dropped and left the published position alone.
    pub fn is_rejection(&self) -> bool {
        matches!(self, FusionEvent::FixRejected(_) | FusionEvent::DriftRejected { .. })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionStats {
    pub fixes_received: u64,
    pub fixes_accepted: u64,
    pub rejected_accuracy: u64,
    pub rejected_drift: u64,
    pub reanchors: u64,
    pub low_accuracy: u64,
    pub extrapolations: u64,
}

// ─── Filter state ────────────────────────────────────────────────────────────

/// Everything that must start cold when tracking restarts.
#[derive(Clone, Debug)]
pub struct FilterState {
    last_accepted: Option<RawFix>,
    smoother: PositionSmoother,
    kalman: KalmanStage,
    reckoner: DeadReckoner,
    consecutive_drift_rejections: u32,
}

impl FilterState {
    pub fn new(config: &FusionConfig) -> Self {
        Self {
            last_accepted: None,
            smoother: PositionSmoother::new(config.smoothing_window),
            kalman: KalmanStage::from_config(config),
            reckoner: DeadReckoner::new(config.min_motion_speed_mps, config.max_extrapolation_secs),
            consecutive_drift_rejections: 0,
        }
    }

    pub fn reset(&mut self) {
        self.last_accepted = None;
        self.smoother.clear();
        self.kalman.reset();
        self.reckoner.reset();
        self.consecutive_drift_rejections = 0;
    }

    pub fn is_cold(&self) -> bool {
        self.last_accepted.is_none()
    }

    pub fn last_accepted(&self) -> Option<&RawFix> {
        self.last_accepted.as_ref()
    }

    pub fn window_len(&self) -> usize {
        self.smoother.len()
    }

    pub fn kalman(&self) -> &KalmanStage {
        &self.kalman
    }

    pub fn reckoner(&self) -> &DeadReckoner {
        &self.reckoner
    }

    pub fn consecutive_drift_rejections(&self) -> u32 {
        self.consecutive_drift_rejections
    }
}

/// Last published fix position; between-fix projection starts here.
#[derive(Clone, Copy, Debug)]
struct Anchor {
    position: FusedPosition,
    accuracy: f64,
    timestamp: i64,
}

// ─── The pipeline ────────────────────────────────────────────────────────────

pub struct PositionFusionPipeline {
    config: FusionConfig,
    gate: AccuracyGate,
    drift: DriftFilter,
    state: FilterState,
    compass: CompassHeading,
    sink: OutputSink,
    anchor: Option<Anchor>,
    last_output: Option<PositionOutput>,
    stats: FusionStats,
}

impl PositionFusionPipeline {
    pub fn new(config: FusionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            gate: AccuracyGate::from_config(&config),
            drift: DriftFilter::new(config.max_jump_m),
            state: FilterState::new(&config),
            compass: CompassHeading::new(),
            sink: OutputSink::new(),
            anchor: None,
            last_output: None,
            stats: FusionStats::default(),
            config,
        })
    }

    // ── Subscribers ──────────────────────────────────────────────────────

    pub fn subscribe<S>(&mut self, subscriber: S) -> SubscriptionId
    where
        S: PositionSubscriber + 'static,
    {
        self.sink.subscribe(subscriber)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.sink.unsubscribe(id)
    }

    // ── Inputs ───────────────────────────────────────────────────────────

    /// Ingest → drift → smoother → Kalman → dead reckoning → sink.
    ///
    /// Rejections are reported as events and leave filter state untouched.
    pub fn feed_fix(&mut self, fix: &RawFix) -> Vec<FusionEvent> {
        let mut events = Vec::new();
        self.stats.fixes_received += 1;

        match self.gate.check(fix) {
            GateVerdict::Accept => {}
            GateVerdict::AcceptLowAccuracy { accuracy_m } => {
                self.stats.low_accuracy += 1;
                events.push(FusionEvent::LowAccuracy { accuracy_m });
            }
            GateVerdict::Reject(reason) => {
                log::debug!("Fix rejected at ingest: {:?}", reason);
                self.stats.rejected_accuracy += 1;
                events.push(FusionEvent::FixRejected(reason));
                return events;
            }
        }

        if let Err(Rejected { distance_m }) = self.drift.accept(fix, self.state.last_accepted.as_ref()) {
            let limit = self.config.reanchor_after_rejections;
            if limit == 0 || self.state.consecutive_drift_rejections < limit {
                self.state.consecutive_drift_rejections += 1;
                self.stats.rejected_drift += 1;
                log::debug!(
                    "Drift rejected: {:.1} m jump (limit {:.1} m)",
                    distance_m,
                    self.drift.max_jump_m()
                );
                events.push(FusionEvent::DriftRejected {
                    distance_m,
                    consecutive: self.state.consecutive_drift_rejections,
                });
                return events;
            }
            log::warn!(
                "Re-anchoring after {} consecutive drift rejections ({:.0} m jump)",
                self.state.consecutive_drift_rejections,
                distance_m
            );
            self.state.reset();
            self.anchor = None;
            self.stats.reanchors += 1;
            events.push(FusionEvent::Reanchored { distance_m });
        }

        if self.state.is_cold() {
            log::info!("Cold start at ({:.6}, {:.6})", fix.latitude, fix.longitude);
            events.push(FusionEvent::ColdStart {
                lat: fix.latitude,
                lng: fix.longitude,
            });
        }
        self.state.consecutive_drift_rejections = 0;
        self.state.last_accepted = Some(fix.clone());
        self.stats.fixes_accepted += 1;

        let (lat, lng) = self.state.smoother.push(fix.latitude, fix.longitude);

        let compass = self.compass.get();
        let heading = resolve_heading(compass, fix.heading, self.state.reckoner.last_heading());
        let velocity_hint = fix
            .speed
            .filter(|s| s.is_finite())
            .zip(heading)
            .map(|(speed, h)| velocity_components(speed, h, lat));

        let step = self.state.kalman.update((lat, lng), fix.accuracy, fix.timestamp, velocity_hint);
        if let Some(dt_secs) = step.prediction_skipped {
            log::debug!("Prediction skipped: dt = {:.3} s", dt_secs);
            events.push(FusionEvent::PredictionSkipped { dt_secs });
        }
        if step.correction_skipped {
            log::debug!("Correction skipped: singular innovation covariance");
            events.push(FusionEvent::CorrectionSkipped);
        }
        if step.velocity_overridden {
            if let Some((v_lat, v_lng)) = velocity_hint {
                events.push(FusionEvent::VelocityOverridden { v_lat, v_lng });
            }
        }

        let speed = self.state.reckoner.effective_speed(fix.speed);
        let projected = self.state.reckoner.extrapolate(
            &step.fused,
            fix.speed,
            fix.heading,
            compass,
            fix.timestamp,
        );

        self.anchor = Some(Anchor {
            position: projected,
            accuracy: fix.accuracy,
            timestamp: fix.timestamp,
        });
        let output = PositionOutput {
            latitude: projected.latitude,
            longitude: projected.longitude,
            accuracy: fix.accuracy,
            speed,
            heading,
            velocity: step.fused.velocity,
            timestamp: fix.timestamp,
            extrapolated: false,
        };
        self.publish(output);

        events
    }

    /// Orientation stream side input; last write wins.
    pub fn feed_orientation(&mut self, sample: &OrientationSample) {
        self.compass.on_sample(sample);
    }

    // ── Between fixes ────────────────────────────────────────────────────

    /// Publish a dead-reckoned position for `now_ms`, measured from the last
    /// fix so repeated ticks never step backwards. Nothing before the first
    /// fix, nothing for a non-positive elapsed time.
    pub fn tick(&mut self, now_ms: i64) -> Option<PositionOutput> {
        let anchor = self.anchor?;
        let dt = now_ms.saturating_sub(anchor.timestamp) as f64 / 1000.0;
        if dt <= 0.0 {
            return None;
        }

        // One heading for both the motion and the published output
        let heading = resolve_heading(self.compass.get(), None, self.state.reckoner.last_heading());
        let projected = self.state.reckoner.project(&anchor.position, heading, dt);
        let output = PositionOutput {
            latitude: projected.latitude,
            longitude: projected.longitude,
            accuracy: anchor.accuracy,
            speed: self.state.reckoner.effective_speed(None),
            heading,
            velocity: projected.velocity,
            timestamp: now_ms,
            extrapolated: true,
        };
        self.stats.extrapolations += 1;
        self.publish(output.clone());
        Some(output)
    }

    /// Tick on the fix clock: `elapsed` is the time since the last accepted
    /// fix was processed. Recorded fixes keep their original timestamps, so
    /// live ticks must not mix them with wall-clock time.
    pub fn tick_after(&mut self, elapsed: Duration) -> Option<PositionOutput> {
        let anchor_ms = self.anchor?.timestamp;
        let elapsed_ms = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);
        self.tick(anchor_ms.saturating_add(elapsed_ms))
    }

    /// Back to a cold start: filter state, compass and counters are cleared.
    /// Subscribers stay registered.
    pub fn reset(&mut self) {
        self.state.reset();
        self.compass.clear();
        self.anchor = None;
        self.last_output = None;
        self.stats = FusionStats::default();
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Shared handle for writers on another task or thread.
    pub fn compass(&self) -> CompassHeading {
        self.compass.clone()
    }

    pub fn last_output(&self) -> Option<&PositionOutput> {
        self.last_output.as_ref()
    }

    pub fn stats(&self) -> &FusionStats {
        &self.stats
    }

    pub fn filter_state(&self) -> &FilterState {
        &self.state
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    fn publish(&mut self, output: PositionOutput) {
        self.sink.publish(&output);
        self.last_output = Some(output);
    }
}

impl std::fmt::Debug for PositionFusionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionFusionPipeline")
            .field("state", &self.state)
            .field("compass", &self.compass.get())
            .field("subscribers", &self.sink.len())
            .field("stats", &self.stats)
            .finish()
    }
}
