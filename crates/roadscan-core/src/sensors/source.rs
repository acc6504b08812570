//! Acquisition boundary
//!
//! Platform sensor and GPS drivers sit behind these traits. Readings are
//! delivered over bounded channels so the consumer pulls in arrival order
//! and a slow consumer applies backpressure to the producer.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::{LocationSample, MotionReading};

/// Channel depth for motion readings (about 10 s at 10 Hz per channel)
pub const MOTION_CHANNEL_DEPTH: usize = 256;

/// Channel depth for location fixes
pub const LOCATION_CHANNEL_DEPTH: usize = 64;

/// Errors raised by acquisition sources
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    /// The sensor does not exist on this device
    #[error("Sensor unavailable: {0}")]
    Unavailable(String),

    /// The user refused access
    #[error("Location permission denied")]
    PermissionDenied,

    /// `start` was called twice
    #[error("Source already started")]
    AlreadyStarted,

    /// The platform reported an error
    #[error("Acquisition failed: {0}")]
    Failed(String),
}

/// Which motion sensors a device reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorAvailability {
    /// An accelerometer is present
    pub accelerometer: bool,
    /// A gyroscope is present
    pub gyroscope: bool,
}

impl SensorAvailability {
    /// Both channels are present
    pub fn all(&self) -> bool {
        self.accelerometer && self.gyroscope
    }
}

/// Accelerometer and gyroscope source
#[async_trait]
pub trait MotionSource: Send {
    /// Report which sensors exist on this device
    async fn availability(&self) -> SensorAvailability;

    /// Begin delivering readings from both channels
    async fn start(&mut self) -> Result<mpsc::Receiver<MotionReading>, AcquisitionError>;

    /// Stop delivering readings; the receiver closes once drained
    fn stop(&mut self);
}

/// GPS source
#[async_trait]
pub trait LocationSource: Send {
    /// Whether location services are switched on
    async fn is_enabled(&self) -> bool;

    /// Whether foreground location permission is granted
    async fn has_permission(&self) -> bool;

    /// Ask for permission; returns whether it was granted
    async fn request_permission(&mut self) -> bool;

    /// Begin delivering fixes
    async fn start(&mut self) -> Result<mpsc::Receiver<LocationSample>, AcquisitionError>;

    /// Stop delivering fixes
    fn stop(&mut self);
}
