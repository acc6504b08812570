//! Scan Recording
//!
//! Drives one scan from start to stop: checks device capabilities, pulls the
//! motion and location streams, scores the buffered window on a fixed
//! cadence and writes one segment per scored window through the sync engine.
//!
//! A segment runs from where the previous one ended to the latest fix, so
//! consecutive segments join up into the driven path.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::config::RoadScanConfig;
use crate::location::DistanceTracker;
use crate::roughness::{RoughnessEngine, RoughnessResult, DEFAULT_WINDOW_MS};
use crate::sensors::{AcquisitionError, LocationSource, MotionSource, SampleBuffer};
use crate::storage::StoreError;
use crate::sync::SyncEngine;
use crate::types::{
    Coordinate, LocationSample, MotionChannel, MotionReading, ScanClock, ScanSegment,
    ScanSession, TimestampMs,
};

/// How long fixes are kept for the speed estimate
const LOCATION_RETENTION_MS: i64 = 60_000;

/// Errors starting or running a scan
#[derive(Error, Debug)]
pub enum ScanError {
    /// Accelerometer or gyroscope missing
    #[error("Motion sensors are not available on this device")]
    SensorsUnavailable,

    /// Location services are switched off
    #[error("Location services are disabled")]
    LocationDisabled,

    /// Location permission refused; may be asked again
    #[error("Location permission denied")]
    PermissionDenied,

    /// A scan is already running
    #[error("A scan is already running")]
    AlreadyScanning,

    /// No scan is running
    #[error("No scan is running")]
    NotScanning,

    /// A source failed to start
    #[error("Acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),

    /// Local persistence failed
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Where the recorder is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// No session
    Idle,
    /// Recording and evaluating
    Scanning,
    /// Session open, readings dropped
    Paused,
}

/// Control messages for [`ScanRecorder::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanCommand {
    /// Suspend evaluation
    Pause,
    /// Continue after a pause
    Resume,
    /// End the session
    Stop,
}

/// Records one scan at a time
pub struct ScanRecorder<M: MotionSource, L: LocationSource> {
    sync: Arc<SyncEngine>,
    motion: M,
    location: L,
    engine: RoughnessEngine,
    window_ms: i64,
    evaluation_period: Duration,
    retention_ms: i64,
    clock: ScanClock,
    accelerometer: SampleBuffer,
    gyroscope: SampleBuffer,
    distance: DistanceTracker,
    state: ScanState,
    session: Option<ScanSession>,
    segment_start: Option<Coordinate>,
    roughness_total: f64,
    segment_count: u32,
    last_result: Option<RoughnessResult>,
    active_elapsed: Duration,
    active_since: Option<Instant>,
    motion_rx: Option<mpsc::Receiver<MotionReading>>,
    location_rx: Option<mpsc::Receiver<LocationSample>>,
}

impl<M: MotionSource, L: LocationSource> ScanRecorder<M, L> {
    /// Create an idle recorder with default timing
    pub fn new(sync: Arc<SyncEngine>, motion: M, location: L) -> Self {
        Self {
            sync,
            motion,
            location,
            engine: RoughnessEngine::new(),
            window_ms: DEFAULT_WINDOW_MS,
            evaluation_period: Duration::from_millis(DEFAULT_WINDOW_MS as u64),
            retention_ms: DEFAULT_WINDOW_MS,
            clock: ScanClock::start(),
            accelerometer: SampleBuffer::new(),
            gyroscope: SampleBuffer::new(),
            distance: DistanceTracker::new(),
            state: ScanState::Idle,
            session: None,
            segment_start: None,
            roughness_total: 0.0,
            segment_count: 0,
            last_result: None,
            active_elapsed: Duration::ZERO,
            active_since: None,
            motion_rx: None,
            location_rx: None,
        }
    }

    /// Take evaluation window and buffer retention from a config
    pub fn with_config(mut self, config: &RoadScanConfig) -> Self {
        self.window_ms = config.roughness.segment_window_ms.max(1);
        self.evaluation_period = config.roughness.period();
        self.retention_ms = config.sensors.buffer_retention_ms.max(self.window_ms);
        self
    }

    /// Time between evaluations while scanning
    pub fn evaluation_period(&self) -> Duration {
        self.evaluation_period
    }

    /// Current lifecycle state
    pub fn state(&self) -> ScanState {
        self.state
    }

    /// The session being recorded
    pub fn session(&self) -> Option<&ScanSession> {
        self.session.as_ref()
    }

    /// Result of the most recent evaluation
    pub fn last_result(&self) -> Option<RoughnessResult> {
        self.last_result
    }

    /// Distance covered so far in meters
    pub fn total_distance(&self) -> f64 {
        self.distance.total_distance()
    }

    /// Segments written so far
    pub fn segment_count(&self) -> u32 {
        self.segment_count
    }

    /// Time spent scanning, excluding pauses
    pub fn elapsed(&self) -> Duration {
        self.active_elapsed + self.active_since.map(|t| t.elapsed()).unwrap_or_default()
    }

    /// Gyroscope samples currently buffered
    pub fn gyroscope(&self) -> &SampleBuffer {
        &self.gyroscope
    }

    /// Check capabilities, start acquisition and open a session
    ///
    /// Nothing is persisted unless every check passes.
    pub async fn start(&mut self) -> Result<ScanSession, ScanError> {
        if self.state != ScanState::Idle {
            return Err(ScanError::AlreadyScanning);
        }
        if !self.motion.availability().await.all() {
            return Err(ScanError::SensorsUnavailable);
        }
        if !self.location.is_enabled().await {
            return Err(ScanError::LocationDisabled);
        }
        if !self.location.has_permission().await && !self.location.request_permission().await {
            return Err(ScanError::PermissionDenied);
        }

        let motion_rx = self.motion.start().await?;
        let location_rx = match self.location.start().await {
            Ok(rx) => rx,
            Err(e) => {
                self.motion.stop();
                return Err(e.into());
            }
        };
        let session = match self.sync.save_session(ScanSession::begin(None)).await {
            Ok(session) => session,
            Err(e) => {
                self.motion.stop();
                self.location.stop();
                return Err(e.into());
            }
        };

        self.reset();
        self.clock = ScanClock::start();
        self.motion_rx = Some(motion_rx);
        self.location_rx = Some(location_rx);
        self.session = Some(session.clone());
        self.state = ScanState::Scanning;
        self.active_since = Some(Instant::now());
        info!("Scan started: session {}", session.local_id);
        Ok(session)
    }

    /// Buffer one motion reading; ignored unless scanning
    pub fn ingest_motion(&mut self, reading: MotionReading) {
        if self.state != ScanState::Scanning {
            return;
        }
        match reading.channel {
            MotionChannel::Accelerometer => self.accelerometer.push(reading.sample),
            MotionChannel::Gyroscope => self.gyroscope.push(reading.sample),
        }
    }

    /// Track one location fix; ignored unless scanning
    pub fn ingest_location(&mut self, fix: LocationSample) {
        if self.state != ScanState::Scanning {
            return;
        }
        self.distance.record(fix);
        if self.segment_start.is_none() {
            self.segment_start = Some(fix.coordinate());
        }
    }

    /// Score the current window and write a segment if it was scoreable
    pub async fn evaluate(&mut self) -> Result<Option<ScanSegment>, ScanError> {
        let now = self.clock.now();
        self.evaluate_at(now).await
    }

    /// [`ScanRecorder::evaluate`] with an explicit notion of now
    pub async fn evaluate_at(&mut self, now: TimestampMs) -> Result<Option<ScanSegment>, ScanError> {
        if self.state != ScanState::Scanning {
            return Ok(None);
        }
        let Some(session_id) = self.session.as_ref().map(|s| s.local_id.clone()) else {
            return Ok(None);
        };

        let latest = self.distance.latest().copied();
        let result = self.engine.evaluate(
            self.accelerometer.recent_as_of(now, self.window_ms),
            latest.and_then(|fix| fix.speed),
        );
        self.last_result = Some(result);
        if !result.is_sufficient() {
            debug!("Window too small to score");
            return Ok(None);
        }

        let (Some(start), Some(end)) = (self.segment_start, latest.map(|fix| fix.coordinate()))
        else {
            debug!("No location yet; score {:.1} not recorded", result.score);
            return Ok(None);
        };

        let segment = ScanSegment::new(
            session_id,
            start,
            end,
            result.score,
            (self.window_ms / 1000) as u32,
        );
        let saved = self.sync.save_segment(segment).await?;
        self.segment_start = Some(end);
        self.roughness_total += result.score;
        self.segment_count += 1;
        debug!(
            "Segment {} scored {:.1} ({})",
            saved.id,
            result.score,
            result.category.label()
        );
        Ok(Some(saved))
    }

    /// Drop samples older than the retention period
    pub fn trim_buffers(&mut self, now: TimestampMs) {
        self.accelerometer.trim_as_of(now, self.retention_ms);
        self.gyroscope.trim_as_of(now, self.retention_ms);
        self.distance.trim_history(now, LOCATION_RETENTION_MS);
    }

    /// Suspend evaluation; readings arriving while paused are dropped
    pub async fn pause(&mut self) -> Result<(), ScanError> {
        match self.state {
            ScanState::Idle => return Err(ScanError::NotScanning),
            ScanState::Paused => return Ok(()),
            ScanState::Scanning => {}
        }
        self.state = ScanState::Paused;
        if let Some(since) = self.active_since.take() {
            self.active_elapsed += since.elapsed();
        }
        if let Some(session) = &self.session {
            self.sync.pause_session(&session.local_id).await?;
            info!("Scan paused: session {}", session.local_id);
        }
        Ok(())
    }

    /// Continue a paused scan
    pub async fn resume(&mut self) -> Result<(), ScanError> {
        match self.state {
            ScanState::Idle => return Err(ScanError::NotScanning),
            ScanState::Scanning => return Ok(()),
            ScanState::Paused => {}
        }
        self.state = ScanState::Scanning;
        self.active_since = Some(Instant::now());
        if let Some(session) = &self.session {
            self.sync.resume_session(&session.local_id).await?;
            info!("Scan resumed: session {}", session.local_id);
        }
        Ok(())
    }

    /// Stop acquisition and finalize the session
    pub async fn stop(&mut self) -> Result<ScanSession, ScanError> {
        if self.state == ScanState::Idle {
            return Err(ScanError::NotScanning);
        }
        let session = self.session.take().ok_or(ScanError::NotScanning)?;

        self.motion.stop();
        self.location.stop();
        self.motion_rx = None;
        self.location_rx = None;
        if let Some(since) = self.active_since.take() {
            self.active_elapsed += since.elapsed();
        }
        self.state = ScanState::Idle;

        let average = (self.segment_count > 0)
            .then(|| self.roughness_total / self.segment_count as f64);
        let ended = self
            .sync
            .end_session(&session.local_id, self.distance.total_distance(), average)
            .await?;
        info!(
            "Scan stopped: session {} after {:?}, {} segments",
            ended.local_id,
            self.active_elapsed,
            self.segment_count
        );
        Ok(ended)
    }

    /// Pump the acquisition streams until told to stop
    ///
    /// Evaluates every window period and trims buffers on the same cadence.
    /// Returns the finalized session once a [`ScanCommand::Stop`] arrives or
    /// the command channel closes.
    pub async fn run(
        &mut self,
        mut commands: mpsc::Receiver<ScanCommand>,
    ) -> Result<ScanSession, ScanError> {
        let motion_rx = self.motion_rx.take().ok_or(ScanError::NotScanning)?;
        let location_rx = self.location_rx.take().ok_or(ScanError::NotScanning)?;

        let outcome = self.pump(motion_rx, location_rx, &mut commands).await;
        let ended = self.stop().await;
        outcome?;
        ended
    }

    async fn pump(
        &mut self,
        mut motion_rx: mpsc::Receiver<MotionReading>,
        mut location_rx: mpsc::Receiver<LocationSample>,
        commands: &mut mpsc::Receiver<ScanCommand>,
    ) -> Result<(), ScanError> {
        let period = self.evaluation_period;
        let mut evaluation = time::interval_at(Instant::now() + period, period);
        let (mut motion_open, mut location_open) = (true, true);

        loop {
            tokio::select! {
                reading = motion_rx.recv(), if motion_open => match reading {
                    Some(reading) => self.ingest_motion(reading),
                    None => {
                        warn!("Motion stream ended");
                        motion_open = false;
                    }
                },
                fix = location_rx.recv(), if location_open => match fix {
                    Some(fix) => self.ingest_location(fix),
                    None => {
                        warn!("Location stream ended");
                        location_open = false;
                    }
                },
                _ = evaluation.tick() => {
                    self.evaluate().await?;
                    let now = self.clock.now();
                    self.trim_buffers(now);
                }
                command = commands.recv() => match command {
                    Some(ScanCommand::Pause) => self.pause().await?,
                    Some(ScanCommand::Resume) => self.resume().await?,
                    Some(ScanCommand::Stop) | None => return Ok(()),
                },
            }
        }
    }

    fn reset(&mut self) {
        self.accelerometer.clear();
        self.gyroscope.clear();
        self.distance.clear();
        self.segment_start = None;
        self.roughness_total = 0.0;
        self.segment_count = 0;
        self.last_result = None;
        self.active_elapsed = Duration::ZERO;
        self.active_since = None;
    }
}
