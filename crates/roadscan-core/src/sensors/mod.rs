//! Motion Sensing
//!
//! Buffers raw accelerometer/gyroscope readings and defines the boundary to
//! platform acquisition drivers.

mod buffer;
mod source;

pub use buffer::SampleBuffer;
pub use source::{
    AcquisitionError, LocationSource, MotionSource, SensorAvailability, LOCATION_CHANNEL_DEPTH,
    MOTION_CHANNEL_DEPTH,
};

/// Default motion sampling period in milliseconds (10 Hz)
pub const DEFAULT_SAMPLE_PERIOD_MS: u64 = 100;

/// Default GPS fix period in milliseconds
pub const DEFAULT_LOCATION_PERIOD_MS: u64 = 1000;

/// Default GPS distance threshold in meters
pub const DEFAULT_LOCATION_DISTANCE_M: f64 = 10.0;
