//! Push-based location and orientation sources.
//!
//! Each source runs as its own Tokio task and pushes into an mpsc channel
//! until the receiver goes away or the task is aborted.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::geodesy::offset_position;
use crate::types::{OrientationSample, RawFix};

/// Transient acquisition failure. The watch keeps running after one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable")]
    PositionUnavailable,
    #[error("location request timed out")]
    Timeout,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LocationEvent {
    Fix(RawFix),
    Error(LocationError),
}

pub trait LocationWatch: Send + 'static {
    /// False when the platform has no location facility at all.
    fn is_supported(&self) -> bool {
        true
    }

    fn spawn(self: Box<Self>, tx: Sender<LocationEvent>) -> JoinHandle<()>;
}

pub trait OrientationWatch: Send + 'static {
    fn spawn(self: Box<Self>, tx: Sender<OrientationSample>) -> JoinHandle<()>;
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

// ─── Replay ──────────────────────────────────────────────────────────────────

/// Plays back recorded location events in order, one per `period`.
#[derive(Clone, Debug)]
pub struct ReplayLocationSource {
    events: Vec<LocationEvent>,
    period: Duration,
}

impl ReplayLocationSource {
    pub fn new(events: Vec<LocationEvent>, period: Duration) -> Self {
        Self { events, period }
    }

    pub fn from_fixes(fixes: Vec<RawFix>, period: Duration) -> Self {
        Self::new(fixes.into_iter().map(LocationEvent::Fix).collect(), period)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl LocationWatch for ReplayLocationSource {
    fn spawn(self: Box<Self>, tx: Sender<LocationEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = ticker(self.period);
            let total = self.events.len();
            for (sent, event) in self.events.into_iter().enumerate() {
                ticker.tick().await;
                if tx.send(event).await.is_err() {
                    log::debug!("[gps] Channel closed after {} of {} events", sent, total);
                    return;
                }
            }
            log::info!("[gps] Replay finished ({} events)", total);
        })
    }
}

/// Plays back recorded compass samples; late samples are dropped when the
/// consumer lags, since only the newest heading matters.
#[derive(Clone, Debug)]
pub struct ReplayOrientationSource {
    samples: Vec<OrientationSample>,
    period: Duration,
}

impl ReplayOrientationSource {
    pub fn new(samples: Vec<OrientationSample>, period: Duration) -> Self {
        Self { samples, period }
    }
}

impl OrientationWatch for ReplayOrientationSource {
    fn spawn(self: Box<Self>, tx: Sender<OrientationSample>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = ticker(self.period);
            for sample in self.samples {
                ticker.tick().await;
                if let Err(TrySendError::Closed(_)) = tx.try_send(sample) {
                    return;
                }
            }
        })
    }
}

// ─── Simulation ──────────────────────────────────────────────────────────────

/// Deterministic straight-line walk or drive with position jitter, periodic
/// glitch spikes and periodic acquisition timeouts.
#[derive(Clone, Debug)]
pub struct SimulatedLocationSource {
    pub start: (f64, f64),
    pub speed_mps: f64,
    pub heading_deg: f64,
    pub period: Duration,
    /// Jitter amplitude [m]
    pub jitter_m: f64,
    /// Every n-th fix lands `glitch_m` away (0 disables)
    pub glitch_every: u64,
    pub glitch_m: f64,
    /// Every n-th attempt times out (0 disables)
    pub timeout_every: u64,
    /// Timestamp of the first fix [Unix ms]; `None` uses the wall clock
    pub start_ms: Option<i64>,
    /// Stop after this many events; `None` runs until aborted
    pub limit: Option<u64>,
}

impl Default for SimulatedLocationSource {
    fn default() -> Self {
        Self {
            start: (37.7749, -122.4194),
            speed_mps: 1.4,
            heading_deg: 45.0,
            period: Duration::from_secs(1),
            jitter_m: 3.0,
            glitch_every: 25,
            glitch_m: 400.0,
            timeout_every: 40,
            start_ms: None,
            limit: None,
        }
    }
}

impl SimulatedLocationSource {
    /// Event number `seq` (0-based) of a run whose first fix is at `start_ms`.
    pub fn event_at(&self, seq: u64, start_ms: i64) -> LocationEvent {
        let n = seq + 1;
        if self.timeout_every > 0 && n % self.timeout_every == 0 {
            return LocationEvent::Error(LocationError::Timeout);
        }

        let period_ms = self.period.as_millis() as i64;
        let elapsed = seq as f64 * self.period.as_secs_f64();
        let (lat, lng) = offset_position(
            self.start.0,
            self.start.1,
            self.speed_mps * elapsed,
            self.heading_deg,
        );

        let t = seq as f64;
        let (lat, lng) = offset_position(lat, lng, self.jitter_m * (t * 1.7).sin(), 0.0);
        let (lat, lng) = offset_position(lat, lng, self.jitter_m * (t * 2.3).cos(), 90.0);
        let (lat, lng) = if self.glitch_every > 0 && n % self.glitch_every == 0 {
            offset_position(lat, lng, self.glitch_m, self.heading_deg + 90.0)
        } else {
            (lat, lng)
        };

        let fix = RawFix {
            latitude: lat,
            longitude: lng,
            accuracy: 5.0 + 2.0 * (t * 0.1).sin(),
            speed: Some(self.speed_mps + 0.2 * (t * 0.5).sin()),
            heading: Some(self.heading_deg),
            timestamp: start_ms + seq as i64 * period_ms,
        };
        LocationEvent::Fix(fix)
    }
}

impl LocationWatch for SimulatedLocationSource {
    fn spawn(self: Box<Self>, tx: Sender<LocationEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start_ms = self.start_ms.unwrap_or_else(now_millis);
            let mut ticker = ticker(self.period);
            let mut seq = 0u64;
            while self.limit.map_or(true, |limit| seq < limit) {
                ticker.tick().await;
                if tx.send(self.event_at(seq, start_ms)).await.is_err() {
                    log::debug!("[gps] Channel closed after {} events", seq);
                    return;
                }
                seq += 1;
                if seq % 10 == 0 {
                    log::debug!("[gps] {} events", seq);
                }
            }
        })
    }
}

/// Compass slowly sweeping around a base heading. Every `dropout_every`-th
/// sample carries no heading, like an uncalibrated sensor.
#[derive(Clone, Debug)]
pub struct SimulatedCompass {
    pub base_heading_deg: f64,
    pub sweep_deg: f64,
    pub period: Duration,
    pub dropout_every: u64,
    pub limit: Option<u64>,
}

impl Default for SimulatedCompass {
    fn default() -> Self {
        Self {
            base_heading_deg: 45.0,
            sweep_deg: 5.0,
            period: Duration::from_millis(200),
            dropout_every: 0,
            limit: None,
        }
    }
}

impl SimulatedCompass {
    pub fn sample_at(&self, seq: u64) -> OrientationSample {
        if self.dropout_every > 0 && (seq + 1) % self.dropout_every == 0 {
            return OrientationSample { heading: None };
        }
        OrientationSample::new(self.base_heading_deg + self.sweep_deg * (seq as f64 * 0.05).sin())
    }
}

impl OrientationWatch for SimulatedCompass {
    fn spawn(self: Box<Self>, tx: Sender<OrientationSample>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = ticker(self.period);
            let mut seq = 0u64;
            while self.limit.map_or(true, |limit| seq < limit) {
                ticker.tick().await;
                match tx.try_send(self.sample_at(seq)) {
                    Ok(_) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Closed(_)) => {
                        log::debug!("[compass] Channel closed after {} samples", seq);
                        return;
                    }
                }
                seq += 1;
            }
        })
    }
}
