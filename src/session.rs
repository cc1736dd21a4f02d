use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

use crate::config::FusionConfig;
use crate::error::{Result, TrackingError};
use crate::live_status::LiveStatus;
use crate::position_fusion::{FusionEvent, PositionFusionPipeline};
use crate::sink::{PositionSubscriber, SubscriptionId};
use crate::sources::{LocationEvent, LocationWatch, OrientationWatch};
use crate::status::FixHealth;
use crate::types::RawFix;

/// Tracking lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Nothing subscribed, filter state cold
    Idle,
    /// Location and orientation watches running
    Tracking,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Publish dead-reckoned positions between fixes at this period
    pub tick_interval: Option<Duration>,
    /// Keep every received fix for later export
    pub record_fixes: bool,
    pub channel_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            tick_interval: None,
            record_fixes: false,
            channel_capacity: 64,
        }
    }
}

/// Owns the pipeline for the lifetime of the process and runs it against a
/// location watch (plus an optional orientation watch) between `start` and
/// `stop`. Every `stop` leaves the pipeline cold.
pub struct TrackingSession {
    pipeline: Arc<Mutex<PositionFusionPipeline>>,
    health: FixHealth,
    options: SessionOptions,
    state: SessionState,
    tasks: Vec<JoinHandle<()>>,
    started_at: Option<Instant>,
    fix_log: Arc<Mutex<Vec<RawFix>>>,
}

/// When the last accepted fix was processed; ticks measure from here.
type FixClock = Arc<Mutex<Option<Instant>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Keep serving after a panicked holder instead of cascading the panic
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TrackingSession {
    pub fn new(config: FusionConfig, options: SessionOptions) -> Result<Self> {
        Ok(TrackingSession {
            pipeline: Arc::new(Mutex::new(PositionFusionPipeline::new(config)?)),
            health: FixHealth::new(),
            options,
            state: SessionState::Idle,
            tasks: Vec::new(),
            started_at: None,
            fix_log: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Idle → Tracking. Must be called from within a Tokio runtime.
    pub fn start(
        &mut self,
        location: Box<dyn LocationWatch>,
        orientation: Option<Box<dyn OrientationWatch>>,
    ) -> Result<()> {
        if self.state == SessionState::Tracking {
            return Err(TrackingError::AlreadyTracking);
        }
        if !location.is_supported() {
            return Err(TrackingError::Unsupported(
                "no location watch on this platform".to_string(),
            ));
        }

        let capacity = self.options.channel_capacity.max(1);
        let fix_clock: FixClock = Arc::new(Mutex::new(None));

        let (loc_tx, loc_rx) = mpsc::channel(capacity);
        self.tasks.push(location.spawn(loc_tx));
        self.tasks.push(tokio::spawn(process_locations(
            loc_rx,
            Arc::clone(&self.pipeline),
            self.health.clone(),
            Arc::clone(&fix_clock),
            self.options.record_fixes.then(|| Arc::clone(&self.fix_log)),
        )));

        if let Some(orientation) = orientation {
            let (ori_tx, mut ori_rx) = mpsc::channel(capacity);
            let compass = lock(&self.pipeline).compass();
            self.tasks.push(orientation.spawn(ori_tx));
            self.tasks.push(tokio::spawn(async move {
                while let Some(sample) = ori_rx.recv().await {
                    compass.on_sample(&sample);
                }
            }));
        }

        if let Some(period) = self.options.tick_interval {
            let pipeline = Arc::clone(&self.pipeline);
            self.tasks.push(tokio::spawn(async move {
                let mut ticker = interval(period.max(Duration::from_millis(1)));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    let elapsed = lock(&fix_clock).map(|at| at.elapsed());
                    if let Some(elapsed) = elapsed {
                        lock(&pipeline).tick_after(elapsed);
                    }
                }
            }));
        }

        self.state = SessionState::Tracking;
        self.started_at = Some(Instant::now());
        log::info!("Tracking started ({} tasks)", self.tasks.len());
        Ok(())
    }

    /// Tracking → Idle. Aborts every watch and waits for them to finish, then
    /// resets the pipeline so the next `start` begins cold.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state != SessionState::Tracking {
            return Err(TrackingError::NotTracking);
        }

        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks.drain(..) {
            // Cancellation is the expected outcome here
            let _ = task.await;
        }

        lock(&self.pipeline).reset();
        self.health.reset();
        self.state = SessionState::Idle;
        self.started_at = None;
        log::info!("Tracking stopped");
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Subscribers run on the session's tasks while the pipeline is locked,
    /// so they must not call back into this session (`with_pipeline`,
    /// `live_status`, ...): that deadlocks. Hand outputs off through a
    /// `ChannelSubscriber` instead.
    pub fn subscribe<S>(&self, subscriber: S) -> SubscriptionId
    where
        S: PositionSubscriber + 'static,
    {
        lock(&self.pipeline).subscribe(subscriber)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        lock(&self.pipeline).unsubscribe(id)
    }

    /// Run `f` with exclusive access to the pipeline.
    pub fn with_pipeline<R>(&self, f: impl FnOnce(&mut PositionFusionPipeline) -> R) -> R {
        f(&mut *lock(&self.pipeline))
    }

    pub fn health(&self) -> &FixHealth {
        &self.health
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    pub fn live_status(&self) -> LiveStatus {
        let report = self.health.report();
        LiveStatus::capture(&lock(&self.pipeline), &report, self.uptime().as_secs())
    }

    /// Drain the recorded fixes (empty unless `record_fixes` is set).
    pub fn take_fix_log(&self) -> Vec<RawFix> {
        std::mem::take(&mut *lock(&self.fix_log))
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Fixes are processed strictly in delivery order, one at a time.
async fn process_locations(
    mut rx: mpsc::Receiver<LocationEvent>,
    pipeline: Arc<Mutex<PositionFusionPipeline>>,
    health: FixHealth,
    fix_clock: FixClock,
    fix_log: Option<Arc<Mutex<Vec<RawFix>>>>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            LocationEvent::Fix(fix) => {
                let events = lock(&pipeline).feed_fix(&fix);
                if !events.iter().any(FusionEvent::is_rejection) {
                    *lock(&fix_clock) = Some(Instant::now());
                }
                health.record_fix(&events);
                if let Some(log) = &fix_log {
                    lock(log).push(fix);
                }
            }
            LocationEvent::Error(error) => {
                log::warn!("Location error: {}", error);
                health.record_error(error);
            }
        }
    }
    log::debug!("Location stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ChannelSubscriber;
    use crate::sources::{LocationError, ReplayLocationSource, ReplayOrientationSource};
    use crate::geodesy::METERS_PER_DEGREE_LAT;
    use crate::types::{OrientationSample, PositionOutput};
    use approx::assert_abs_diff_eq;

    struct NoLocation;

    impl LocationWatch for NoLocation {
        fn is_supported(&self) -> bool {
            false
        }

        fn spawn(self: Box<Self>, _tx: mpsc::Sender<LocationEvent>) -> JoinHandle<()> {
            tokio::spawn(async {})
        }
    }

    fn fixes() -> Vec<RawFix> {
        (0..6)
            .map(|i| RawFix::new(52.0 + i as f64 * 1e-5, 13.0, 5.0, i * 1000).with_speed(1.1))
            .collect()
    }

    fn replay(fixes: Vec<RawFix>) -> Box<dyn LocationWatch> {
        Box::new(ReplayLocationSource::from_fixes(fixes, Duration::from_millis(1)))
    }

    fn session() -> TrackingSession {
        TrackingSession::new(FusionConfig::default(), SessionOptions::default()).unwrap()
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let mut s = session();
        assert!(matches!(s.stop().await, Err(TrackingError::NotTracking)));

        s.start(replay(fixes()), None).unwrap();
        assert_eq!(s.state(), SessionState::Tracking);
        assert!(matches!(
            s.start(replay(fixes()), None),
            Err(TrackingError::AlreadyTracking)
        ));

        s.stop().await.unwrap();
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_unsupported_location_is_fatal() {
        let mut s = session();
        let result = s.start(Box::new(NoLocation), None);
        assert!(matches!(result, Err(TrackingError::Unsupported(_))));
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_stop_resets_and_restart_is_cold() {
        let mut s = session();
        let (tx, rx) = crossbeam::channel::unbounded();
        s.subscribe(ChannelSubscriber::new(tx));

        s.start(replay(fixes()), None).unwrap();
        wait_until(|| s.with_pipeline(|p| p.stats().fixes_received) == 6).await;
        let first: Vec<PositionOutput> = rx.try_iter().collect();

        s.stop().await.unwrap();
        s.with_pipeline(|p| {
            assert!(p.filter_state().is_cold());
            assert!(p.last_output().is_none());
            assert_eq!(p.stats().fixes_received, 0);
        });

        s.start(replay(fixes()), None).unwrap();
        wait_until(|| s.with_pipeline(|p| p.stats().fixes_received) == 6).await;
        let second: Vec<PositionOutput> = rx.try_iter().collect();
        s.stop().await.unwrap();

        assert_eq!(first.len(), 6);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_orientation_feeds_compass() {
        let mut s = session();
        let samples = vec![
            OrientationSample::new(10.0),
            OrientationSample { heading: None },
            OrientationSample::new(20.0),
        ];
        let orientation = Box::new(ReplayOrientationSource::new(samples, Duration::from_millis(1)));
        s.start(replay(Vec::new()), Some(orientation)).unwrap();

        let compass = s.with_pipeline(|p| p.compass());
        wait_until(|| compass.get() == Some(20.0)).await;

        s.stop().await.unwrap();
        assert_eq!(compass.get(), None);
    }

    #[tokio::test]
    async fn test_acquisition_errors_are_not_fatal() {
        let mut s = TrackingSession::new(
            FusionConfig::default(),
            SessionOptions {
                record_fixes: true,
                ..SessionOptions::default()
            },
        )
        .unwrap();
        let events = vec![
            LocationEvent::Error(LocationError::Timeout),
            LocationEvent::Fix(RawFix::new(1.0, 1.0, 5.0, 0)),
            LocationEvent::Error(LocationError::PositionUnavailable),
            LocationEvent::Fix(RawFix::new(1.0, 1.00001, 5.0, 1_000)),
        ];
        s.start(
            Box::new(ReplayLocationSource::new(events, Duration::from_millis(1))),
            None,
        )
        .unwrap();
        wait_until(|| s.health().report().last_error == Some(LocationError::PositionUnavailable))
            .await;
        wait_until(|| s.with_pipeline(|p| p.stats().fixes_accepted) == 2).await;

        assert_eq!(s.state(), SessionState::Tracking);
        assert_eq!(s.take_fix_log().len(), 2);
        assert_eq!(s.live_status().fixes_accepted, 2);
        s.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_ticks_run_on_the_fix_clock() {
        let mut s = TrackingSession::new(
            FusionConfig::default(),
            SessionOptions {
                tick_interval: Some(Duration::from_millis(5)),
                ..SessionOptions::default()
            },
        )
        .unwrap();
        // A recorded fix from long ago: ticks must count from when it was
        // processed, not from its timestamp
        let fix = RawFix::new(0.0, 0.0, 5.0, 1_000)
            .with_speed(1.4)
            .with_heading(0.0);
        let started = Instant::now();
        s.start(replay(vec![fix]), None).unwrap();

        wait_until(|| s.with_pipeline(|p| p.stats().extrapolations) > 0).await;
        let out = s.with_pipeline(|p| p.last_output().cloned()).unwrap();
        let bound_ms = started.elapsed().as_millis() as i64;
        s.stop().await.unwrap();

        assert!(out.extrapolated);
        let ahead_ms = out.timestamp - 1_000;
        assert!(ahead_ms > 0 && ahead_ms <= bound_ms, "{ahead_ms} ms vs {bound_ms} ms");
        let expected_m = 1.4 * ahead_ms as f64 / 1000.0;
        assert_abs_diff_eq!(out.latitude, expected_m / METERS_PER_DEGREE_LAT, epsilon = 1e-12);
        assert_abs_diff_eq!(out.longitude, 0.0, epsilon = 1e-12);
    }

    #[tokio::test]
    async fn test_channel_consumer_can_query_pipeline() {
        let mut s = session();
        let (tx, rx) = crossbeam::channel::unbounded();
        s.subscribe(ChannelSubscriber::new(tx));
        s.start(replay(fixes()), None).unwrap();

        let mut seen = 0;
        for _ in 0..1000 {
            if seen == 6 {
                break;
            }
            let Ok(out) = rx.try_recv() else {
                tokio::time::sleep(Duration::from_millis(2)).await;
                continue;
            };
            // Outside the pipeline lock, so querying back is safe
            let received = s.with_pipeline(|p| p.stats().fixes_received);
            assert!(received as usize > seen);
            assert!(!out.extrapolated);
            seen += 1;
        }
        assert_eq!(seen, 6);
        s.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_no_ticks_before_first_fix() {
        let mut s = TrackingSession::new(
            FusionConfig::default(),
            SessionOptions {
                tick_interval: Some(Duration::from_millis(1)),
                ..SessionOptions::default()
            },
        )
        .unwrap();
        s.start(replay(Vec::new()), None).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(s.with_pipeline(|p| p.stats().extrapolations), 0);
        s.stop().await.unwrap();
    }
}
