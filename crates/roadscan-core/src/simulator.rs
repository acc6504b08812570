//! Drive Simulator - simulated sensors and GPS for development and testing
//!
//! Produces a plausible drive without a phone in a car: straight stretches
//! broken up by turns, city speeds, and road vibration whose intensity
//! depends on the selected road quality. Accelerometer output is in g, as
//! mobile sensor APIs report it.
//!
//! A fixed seed reproduces the same drive.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::RoadScanConfig;
use crate::location::haversine_m;
use crate::roughness::GRAVITY;
use crate::sensors::{
    AcquisitionError, LocationSource, MotionSource, SensorAvailability, LOCATION_CHANNEL_DEPTH,
    MOTION_CHANNEL_DEPTH,
};
use crate::types::{
    Coordinate, LocationSample, MotionChannel, MotionReading, ScanClock, SensorSample,
    TimestampMs, UnknownVariant,
};

/// Default starting point (San Francisco)
pub const DEFAULT_START: Coordinate = Coordinate {
    lat: 37.7749,
    lng: -122.4194,
};

/// Degrees moved per fix, about 11 m
const STEP_DEG: f64 = 0.0001;

/// Probability that a motion sample carries a pothole spike
const SPIKE_PROBABILITY: f64 = 0.05;

/// Shortest delivery period a source accepts
const MIN_SOURCE_PERIOD: Duration = Duration::from_millis(1);

/// Road surface the simulator drives on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoadQuality {
    /// Fresh asphalt
    Smooth,
    /// Worn but even
    Fair,
    /// Broken surface
    Rough,
    /// Changes between smooth, fair and rough at every turn
    Variable,
    /// A fresh random intensity for every sample
    Random,
}

impl RoadQuality {
    fn fixed_level(&self) -> Option<f64> {
        match self {
            RoadQuality::Smooth => Some(0.1),
            RoadQuality::Fair => Some(0.3),
            RoadQuality::Rough => Some(0.6),
            RoadQuality::Variable | RoadQuality::Random => None,
        }
    }
}

impl FromStr for RoadQuality {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "smooth" => Ok(RoadQuality::Smooth),
            "fair" => Ok(RoadQuality::Fair),
            "rough" => Ok(RoadQuality::Rough),
            "variable" => Ok(RoadQuality::Variable),
            "random" => Ok(RoadQuality::Random),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Shape of the simulated route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutePattern {
    /// Straight stretches of 20-40 s joined by turns of up to 60°
    #[default]
    Driving,
    /// A loop of about 200 m radius around the start
    Circle,
    /// Small random steps
    RandomWalk,
}

/// Generator for one simulated drive
pub struct DriveSimulator {
    rng: StdRng,
    quality: RoadQuality,
    pattern: RoutePattern,
    start: Coordinate,
    position: Coordinate,
    heading: f64,
    altitude: f64,
    fix_index: u64,
    /// Start of the current straight stretch (sim time)
    straight_since: Option<TimestampMs>,
    straight_duration_ms: i64,
    /// Current surface for `Variable`
    variable_level: f64,
}

impl DriveSimulator {
    /// Create a reproducible simulator
    pub fn new(quality: RoadQuality, seed: u64) -> Self {
        Self::with_rng(quality, StdRng::seed_from_u64(seed))
    }

    /// Create a simulator seeded from the OS
    pub fn from_entropy(quality: RoadQuality) -> Self {
        Self::with_rng(quality, StdRng::from_entropy())
    }

    fn with_rng(quality: RoadQuality, mut rng: StdRng) -> Self {
        let heading = rng.gen_range(0.0..360.0);
        let variable_level = [0.1, 0.3, 0.6][rng.gen_range(0..3)];
        Self {
            rng,
            quality,
            pattern: RoutePattern::default(),
            start: DEFAULT_START,
            position: DEFAULT_START,
            heading,
            altitude: 50.0,
            fix_index: 0,
            straight_since: None,
            straight_duration_ms: 30_000,
            variable_level,
        }
    }

    /// Use a different route shape
    pub fn with_pattern(mut self, pattern: RoutePattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Start somewhere else
    pub fn with_start(mut self, start: Coordinate) -> Self {
        self.start = start;
        self.position = start;
        self
    }

    /// Current position
    pub fn position(&self) -> Coordinate {
        self.position
    }

    /// Vibration intensity in use right now, 0..1
    pub fn roughness_level(&mut self) -> f64 {
        match self.quality {
            RoadQuality::Variable => self.variable_level,
            RoadQuality::Random => self.rng.gen(),
            fixed => fixed.fixed_level().unwrap_or(0.3),
        }
    }

    /// Advance the route by one fix
    pub fn next_fix(&mut self, now: TimestampMs) -> LocationSample {
        self.fix_index += 1;
        let previous = self.position;

        self.position = match self.pattern {
            RoutePattern::Driving => {
                self.maybe_turn(now);
                let rad = self.heading.to_radians();
                Coordinate::new(
                    previous.lat + STEP_DEG * rad.cos(),
                    previous.lng + STEP_DEG * rad.sin(),
                )
            }
            RoutePattern::Circle => {
                let rad = ((self.fix_index * 2) % 360) as f64 * PI / 180.0;
                Coordinate::new(
                    self.start.lat + 0.002 * rad.cos(),
                    self.start.lng + 0.002 * rad.sin(),
                )
            }
            RoutePattern::RandomWalk => Coordinate::new(
                previous.lat + (self.rng.gen::<f64>() - 0.5) * STEP_DEG,
                previous.lng + (self.rng.gen::<f64>() - 0.5) * STEP_DEG,
            ),
        };

        if self.pattern != RoutePattern::Driving {
            let (d_lat, d_lng) = (
                self.position.lat - previous.lat,
                self.position.lng - previous.lng,
            );
            self.heading = d_lng.atan2(d_lat).to_degrees().rem_euclid(360.0);
        }

        // 30-50 km/h with jitter, limited to 25-55
        let base_kmh = 40.0 + (self.fix_index as f64 * 0.05).sin() * 10.0;
        let speed_kmh = (base_kmh + (self.rng.gen::<f64>() - 0.5) * 5.0).clamp(25.0, 55.0);
        self.altitude += (self.rng.gen::<f64>() - 0.5) * 2.0;

        LocationSample {
            latitude: self.position.lat,
            longitude: self.position.lng,
            altitude: Some(self.altitude),
            accuracy: Some(5.0),
            speed: Some(speed_kmh / 3.6),
            heading: Some(self.heading),
            timestamp: now,
        }
    }

    fn maybe_turn(&mut self, now: TimestampMs) {
        let since = *self.straight_since.get_or_insert(now);
        if now - since < self.straight_duration_ms {
            return;
        }

        let turn = (self.rng.gen::<f64>() - 0.5) * 120.0;
        self.heading = (self.heading + turn).rem_euclid(360.0);
        self.straight_duration_ms = self.rng.gen_range(20_000..40_000);
        self.straight_since = Some(now);
        if self.quality == RoadQuality::Variable {
            self.variable_level = [0.1, 0.3, 0.6][self.rng.gen_range(0..3)];
        }
        debug!(
            "Simulated turn: heading {:.1}°, next stretch {} ms",
            self.heading, self.straight_duration_ms
        );
    }

    /// One accelerometer and one gyroscope sample
    pub fn next_motion(&mut self, now: TimestampMs) -> (SensorSample, SensorSample) {
        let level = self.roughness_level();
        let rng = &mut self.rng;

        // m/s², converted to g below
        let intensity = level * 3.0;
        let frequency = 5.0 + rng.gen::<f64>() * 10.0;
        let t = now as f64 / 1000.0;
        let spike = if rng.gen::<f64>() < SPIKE_PROBABILITY {
            level * 5.0
        } else {
            0.0
        };

        let ax = (rng.gen::<f64>() - 0.5) * 0.5
            + (t * frequency).sin() * intensity * 0.3
            + (rng.gen::<f64>() - 0.5) * spike;
        let ay = (rng.gen::<f64>() - 0.5) * 0.5
            + (t * frequency * 1.3).sin() * intensity * 0.2
            + (rng.gen::<f64>() - 0.5) * spike;
        let az = GRAVITY
            + (rng.gen::<f64>() - 0.5) * 0.3
            + (t * frequency * 0.7).sin() * intensity
            + spike;

        let gx = (rng.gen::<f64>() - 0.5) * 0.1 + (t * frequency * 0.5).sin() * level * 0.5;
        let gy = (rng.gen::<f64>() - 0.5) * 0.1 + (t * frequency * 0.8).sin() * level * 0.5;
        let gz = (rng.gen::<f64>() - 0.5) * 0.05 + (t * frequency * 1.2).sin() * level * 0.2;

        (
            SensorSample::new(ax / GRAVITY, ay / GRAVITY, az / GRAVITY, now),
            SensorSample::new(gx, gy, gz, now),
        )
    }

    /// Split into sources timed by a config
    ///
    /// The GPS also drops fixes closer than `location.distance_interval_m`
    /// to the last delivered one.
    pub fn into_configured_sources(
        self,
        config: &RoadScanConfig,
    ) -> (SimulatedMotion, SimulatedGps) {
        let (motion, mut gps) = self.into_sources(
            Duration::from_millis(config.sensors.sample_period_ms),
            Duration::from_millis(config.location.period_ms),
        );
        gps.set_distance_interval(config.location.distance_interval_m);
        (motion, gps)
    }

    /// Split into acquisition sources sharing this drive
    ///
    /// Periods below one millisecond are raised to one millisecond.
    pub fn into_sources(
        self,
        sample_period: Duration,
        location_period: Duration,
    ) -> (SimulatedMotion, SimulatedGps) {
        let shared = Arc::new(Mutex::new(self));
        (
            SimulatedMotion {
                sim: Arc::clone(&shared),
                period: sample_period.max(MIN_SOURCE_PERIOD),
                availability: SensorAvailability {
                    accelerometer: true,
                    gyroscope: true,
                },
                task: None,
            },
            SimulatedGps {
                sim: shared,
                period: location_period.max(MIN_SOURCE_PERIOD),
                distance_interval_m: 0.0,
                enabled: true,
                permission: true,
                grant_on_request: true,
                task: None,
            },
        )
    }
}

fn lock(sim: &Mutex<DriveSimulator>) -> MutexGuard<'_, DriveSimulator> {
    sim.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn is_running(task: &Option<JoinHandle<()>>) -> bool {
    task.as_ref().is_some_and(|t| !t.is_finished())
}

/// Simulated accelerometer and gyroscope
pub struct SimulatedMotion {
    sim: Arc<Mutex<DriveSimulator>>,
    period: Duration,
    availability: SensorAvailability,
    task: Option<JoinHandle<()>>,
}

impl SimulatedMotion {
    /// Pretend some sensors are missing
    pub fn set_availability(&mut self, availability: SensorAvailability) {
        self.availability = availability;
    }
}

#[async_trait]
impl MotionSource for SimulatedMotion {
    async fn availability(&self) -> SensorAvailability {
        self.availability
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<MotionReading>, AcquisitionError> {
        if !self.availability.all() {
            return Err(AcquisitionError::Unavailable("simulated sensors disabled".to_string()));
        }
        if is_running(&self.task) {
            return Err(AcquisitionError::AlreadyStarted);
        }

        let (tx, rx) = mpsc::channel(MOTION_CHANNEL_DEPTH);
        let sim = Arc::clone(&self.sim);
        let period = self.period;
        self.task = Some(tokio::spawn(async move {
            let clock = ScanClock::start();
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let (accel, gyro) = lock(&sim).next_motion(clock.now());
                let readings = [
                    MotionReading {
                        channel: MotionChannel::Accelerometer,
                        sample: accel,
                    },
                    MotionReading {
                        channel: MotionChannel::Gyroscope,
                        sample: gyro,
                    },
                ];
                for reading in readings {
                    if tx.send(reading).await.is_err() {
                        return;
                    }
                }
            }
        }));
        debug!("Simulated motion started ({:?})", self.period);
        Ok(rx)
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Simulated motion stopped");
        }
    }
}

/// Simulated GPS receiver
pub struct SimulatedGps {
    sim: Arc<Mutex<DriveSimulator>>,
    period: Duration,
    distance_interval_m: f64,
    enabled: bool,
    permission: bool,
    grant_on_request: bool,
    task: Option<JoinHandle<()>>,
}

impl SimulatedGps {
    /// Switch location services on or off
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Only deliver a fix once it is this many meters from the last one
    pub fn set_distance_interval(&mut self, meters: f64) {
        self.distance_interval_m = meters.max(0.0);
    }

    /// Set the current permission and how a request will be answered
    pub fn set_permission(&mut self, granted: bool, grant_on_request: bool) {
        self.permission = granted;
        self.grant_on_request = grant_on_request;
    }
}

#[async_trait]
impl LocationSource for SimulatedGps {
    async fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn has_permission(&self) -> bool {
        self.permission
    }

    async fn request_permission(&mut self) -> bool {
        self.permission = self.permission || self.grant_on_request;
        self.permission
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<LocationSample>, AcquisitionError> {
        if !self.permission {
            return Err(AcquisitionError::PermissionDenied);
        }
        if is_running(&self.task) {
            return Err(AcquisitionError::AlreadyStarted);
        }

        let (tx, rx) = mpsc::channel(LOCATION_CHANNEL_DEPTH);
        let sim = Arc::clone(&self.sim);
        let period = self.period;
        let min_distance = self.distance_interval_m;
        self.task = Some(tokio::spawn(async move {
            let clock = ScanClock::start();
            let mut ticker = tokio::time::interval(period);
            let mut last_sent: Option<Coordinate> = None;
            loop {
                ticker.tick().await;
                let fix = lock(&sim).next_fix(clock.now());
                let here = fix.coordinate();
                if let Some(last) = last_sent {
                    if haversine_m(last.lat, last.lng, here.lat, here.lng) < min_distance {
                        continue;
                    }
                }
                last_sent = Some(here);
                if tx.send(fix).await.is_err() {
                    return;
                }
            }
        }));
        debug!("Simulated GPS started ({:?})", self.period);
        Ok(rx)
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Simulated GPS stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::DistanceTracker;
    use crate::roughness::RoughnessEngine;

    fn score_for(quality: RoadQuality) -> f64 {
        let mut sim = DriveSimulator::new(quality, 7);
        let samples: Vec<SensorSample> = (0..50)
            .map(|i| sim.next_motion(1_000_000 + i * 100).0)
            .collect();
        RoughnessEngine::new().evaluate(&samples, None).score
    }

    #[test]
    fn test_same_seed_same_drive() {
        let mut a = DriveSimulator::new(RoadQuality::Fair, 42);
        let mut b = DriveSimulator::new(RoadQuality::Fair, 42);
        for i in 0..20 {
            assert_eq!(a.next_fix(i * 1000), b.next_fix(i * 1000));
            assert_eq!(a.next_motion(i * 100), b.next_motion(i * 100));
        }
    }

    #[test]
    fn test_rough_road_scores_higher_than_smooth() {
        assert!(score_for(RoadQuality::Rough) > score_for(RoadQuality::Smooth));
    }

    #[test]
    fn test_accelerometer_reports_in_g() {
        let mut sim = DriveSimulator::new(RoadQuality::Smooth, 1);
        let (accel, _) = sim.next_motion(0);
        assert!((accel.z - 1.0).abs() < 0.2);
    }

    #[test]
    fn test_driving_moves_at_city_speed() {
        let mut sim = DriveSimulator::new(RoadQuality::Fair, 3);
        let mut tracker = DistanceTracker::new();
        for i in 0..60 {
            let fix = sim.next_fix(i * 1000);
            let speed = fix.speed.unwrap() * 3.6;
            assert!((25.0..=55.0).contains(&speed));
            tracker.record(fix);
        }
        // ~11 m per fix
        let total = tracker.total_distance();
        assert!(total > 500.0 && total < 800.0, "total {}", total);
    }

    #[test]
    fn test_driving_turns_after_straight() {
        let mut sim = DriveSimulator::new(RoadQuality::Variable, 9);
        let first = sim.next_fix(0).heading;
        assert_eq!(sim.next_fix(10_000).heading, first);
        let after = sim.next_fix(31_000).heading;
        assert_ne!(after, first);
    }

    #[test]
    fn test_circle_stays_near_start() {
        let mut sim = DriveSimulator::new(RoadQuality::Smooth, 5).with_pattern(RoutePattern::Circle);
        for i in 0..200 {
            let fix = sim.next_fix(i * 1000);
            assert!((fix.latitude - DEFAULT_START.lat).abs() <= 0.0021);
            assert!((fix.longitude - DEFAULT_START.lng).abs() <= 0.0021);
        }
    }

    #[test]
    fn test_quality_parses() {
        assert_eq!("Rough".parse::<RoadQuality>().unwrap(), RoadQuality::Rough);
        assert!("gravel".parse::<RoadQuality>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sources_stream_until_stopped() {
        let (mut motion, mut gps) = DriveSimulator::new(RoadQuality::Fair, 11)
            .into_sources(Duration::from_millis(100), Duration::from_millis(1000));

        let mut readings = motion.start().await.unwrap();
        let mut fixes = gps.start().await.unwrap();
        assert!(matches!(motion.start().await, Err(AcquisitionError::AlreadyStarted)));

        let first = readings.recv().await.unwrap();
        assert_eq!(first.channel, MotionChannel::Accelerometer);
        assert_eq!(readings.recv().await.unwrap().channel, MotionChannel::Gyroscope);
        assert!(fixes.recv().await.is_some());

        motion.stop();
        gps.stop();
        while readings.recv().await.is_some() {}
        while fixes.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn test_permission_request_follows_setting() {
        let (_, mut gps) = DriveSimulator::new(RoadQuality::Fair, 1)
            .into_sources(Duration::from_millis(100), Duration::from_millis(1000));
        gps.set_permission(false, false);
        assert!(!gps.request_permission().await);
        assert!(matches!(gps.start().await, Err(AcquisitionError::PermissionDenied)));

        gps.set_permission(false, true);
        assert!(gps.request_permission().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gps_drops_fixes_inside_distance_interval() {
        let mut config = RoadScanConfig::default();
        config.location.distance_interval_m = 50.0;
        let (_, mut gps) =
            DriveSimulator::new(RoadQuality::Fair, 4).into_configured_sources(&config);

        let mut fixes = gps.start().await.unwrap();
        let mut previous = fixes.recv().await.unwrap();
        for _ in 0..4 {
            let fix = fixes.recv().await.unwrap();
            let moved = haversine_m(
                previous.latitude,
                previous.longitude,
                fix.latitude,
                fix.longitude,
            );
            assert!(moved >= 50.0, "moved {}", moved);
            // At most ~15 m per one-second fix
            assert!(fix.timestamp - previous.timestamp >= 3_000);
            previous = fix;
        }
        gps.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_sources_still_run() {
        let mut config = RoadScanConfig::default();
        config.sensors.sample_period_ms = 0;
        config.location.period_ms = 0;
        let (mut motion, mut gps) =
            DriveSimulator::new(RoadQuality::Smooth, 8).into_configured_sources(&config);

        let mut readings = motion.start().await.unwrap();
        let mut fixes = gps.start().await.unwrap();
        assert!(readings.recv().await.is_some());
        assert!(fixes.recv().await.is_some());
        motion.stop();
        gps.stop();
    }
}
