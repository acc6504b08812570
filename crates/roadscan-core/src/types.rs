//! Core data model shared by the scanning pipeline and the sync engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Milliseconds since the Unix epoch, the timestamp unit of every sample
pub type TimestampMs = i64;

/// Current wall-clock time in milliseconds
pub fn now_ms() -> TimestampMs {
    Utc::now().timestamp_millis()
}

/// Epoch-millisecond clock that advances with the tokio clock
///
/// Anchored to wall time when started, so timestamps look real, but driven
/// by `tokio::time::Instant` so a paused test runtime controls it.
#[derive(Debug, Clone, Copy)]
pub struct ScanClock {
    wall_origin: TimestampMs,
    origin: tokio::time::Instant,
}

impl ScanClock {
    /// Start a clock at the current wall time
    pub fn start() -> Self {
        Self {
            wall_origin: now_ms(),
            origin: tokio::time::Instant::now(),
        }
    }

    /// Current time on this clock
    pub fn now(&self) -> TimestampMs {
        self.wall_origin + self.origin.elapsed().as_millis() as TimestampMs
    }
}

/// Generate a fresh device-local identity
pub fn new_local_id() -> String {
    Uuid::new_v4().to_string()
}

/// A single 3-axis reading from the accelerometer or gyroscope
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    /// X axis
    pub x: f64,
    /// Y axis
    pub y: f64,
    /// Z axis
    pub z: f64,
    /// Capture time in Unix milliseconds
    pub timestamp: TimestampMs,
}

impl SensorSample {
    /// Create a new sample
    pub fn new(x: f64, y: f64, z: f64, timestamp: TimestampMs) -> Self {
        Self { x, y, z, timestamp }
    }
}

/// Which motion sensor a reading came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionChannel {
    /// Linear acceleration in g
    Accelerometer,
    /// Rotation rate in rad/s
    Gyroscope,
}

/// A sample tagged with its source channel, as delivered by a motion source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionReading {
    /// Which sensor produced the sample
    pub channel: MotionChannel,
    /// The reading
    pub sample: SensorSample,
}

/// A GPS fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    /// Degrees north
    pub latitude: f64,
    /// Degrees east
    pub longitude: f64,
    /// Meters above sea level
    pub altitude: Option<f64>,
    /// Horizontal accuracy in meters
    pub accuracy: Option<f64>,
    /// Ground speed in m/s
    pub speed: Option<f64>,
    /// Degrees clockwise from north
    pub heading: Option<f64>,
    /// Capture time in Unix milliseconds
    pub timestamp: TimestampMs,
}

impl LocationSample {
    /// Create a fix with only a position and timestamp
    pub fn at(latitude: f64, longitude: f64, timestamp: TimestampMs) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            accuracy: None,
            speed: None,
            heading: None,
            timestamp,
        }
    }

    /// Set the ground speed (m/s)
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    /// Position of this fix
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// A latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lng: f64,
}

impl Coordinate {
    /// Create a coordinate
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Error returned when a stored enum column holds an unknown value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

/// Lifecycle status of a scan session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Recording
    Active,
    /// Recording suspended
    Paused,
    /// Finished; eligible for resync
    Completed,
}

impl SessionStatus {
    /// Column value used in both stores
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "paused" => Ok(SessionStatus::Paused),
            "completed" => Ok(SessionStatus::Completed),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Reconciliation state of a session against the remote store
///
/// Progresses strictly forward: `LocalOnly` -> `RemotePending` ->
/// `RemoteLinked` -> `Synced`. A failed create drops back from
/// `RemotePending` only as far as `RemotePending` itself; identity is
/// never unlinked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Never sent to the remote store
    LocalOnly,
    /// A remote create was attempted
    RemotePending,
    /// The remote row exists and its id is recorded
    RemoteLinked,
    /// Remote copy is complete
    Synced,
}

impl SyncState {
    /// Column value in the local store
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::LocalOnly => "local_only",
            SyncState::RemotePending => "remote_pending",
            SyncState::RemoteLinked => "remote_linked",
            SyncState::Synced => "synced",
        }
    }

    /// Whether the session has a remote identity segments can be pushed under
    pub fn is_linked(&self) -> bool {
        matches!(self, SyncState::RemoteLinked | SyncState::Synced)
    }
}

impl FromStr for SyncState {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local_only" => Ok(SyncState::LocalOnly),
            "remote_pending" => Ok(SyncState::RemotePending),
            "remote_linked" => Ok(SyncState::RemoteLinked),
            "synced" => Ok(SyncState::Synced),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// One scan from start to stop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSession {
    /// Device-generated identity, fixed for the lifetime of the session
    pub local_id: String,
    /// Identity assigned by the remote store once created there
    pub remote_id: Option<String>,
    /// Owner, once known
    pub user_id: Option<String>,
    /// When recording began
    pub started_at: DateTime<Utc>,
    /// When recording finished
    pub ended_at: Option<DateTime<Utc>>,
    /// Lifecycle status
    pub status: SessionStatus,
    /// Distance covered in meters
    pub total_distance_m: f64,
    /// Mean segment score; `None` without segments
    pub average_roughness: Option<f64>,
    /// How far reconciliation has progressed
    pub sync_state: SyncState,
    /// Confirmed remotely; never reverts
    pub synced: bool,
}

impl ScanSession {
    /// Start a new active session with a fresh local identity
    pub fn begin(user_id: Option<String>) -> Self {
        Self {
            local_id: new_local_id(),
            remote_id: None,
            user_id,
            started_at: Utc::now(),
            ended_at: None,
            status: SessionStatus::Active,
            total_distance_m: 0.0,
            average_roughness: None,
            sync_state: SyncState::LocalOnly,
            synced: false,
        }
    }

    /// The identity writes should currently target: remote if linked, else local
    pub fn current_id(&self) -> &str {
        self.remote_id.as_deref().unwrap_or(&self.local_id)
    }

    /// Whether `id` names this session under either identity
    pub fn is_identified_by(&self, id: &str) -> bool {
        self.local_id == id || self.remote_id.as_deref() == Some(id)
    }
}

/// The roughness measurement over one evaluation window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSegment {
    /// Device-generated id
    pub id: String,
    /// Local identity of the owning session
    pub session_id: String,
    /// Where the segment begins
    pub start: Coordinate,
    /// Where the segment ends
    pub end: Coordinate,
    /// Score of the window
    pub average_roughness: f64,
    /// Length of the scored window in seconds
    pub duration_s: u32,
    /// Confirmed remotely; never reverts
    pub synced: bool,
    /// When the segment was recorded
    pub created_at: DateTime<Utc>,
}

impl ScanSegment {
    /// Build an unsynced segment for a session
    pub fn new(
        session_id: impl Into<String>,
        start: Coordinate,
        end: Coordinate,
        average_roughness: f64,
        duration_s: u32,
    ) -> Self {
        Self {
            id: new_local_id(),
            session_id: session_id.into(),
            start,
            end,
            average_roughness,
            duration_s,
            synced: false,
            created_at: Utc::now(),
        }
    }

    /// WKT line string of the segment, longitude first
    pub fn wkt_linestring(&self) -> String {
        format!(
            "LINESTRING({} {}, {} {})",
            self.start.lng, self.start.lat, self.end.lng, self.end.lat
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_scan_clock_follows_tokio_time() {
        let clock = ScanClock::start();
        let before = clock.now();
        tokio::time::advance(std::time::Duration::from_millis(1500)).await;
        assert_eq!(clock.now() - before, 1500);
    }

    #[test]
    fn test_current_id_prefers_remote() {
        let mut session = ScanSession::begin(None);
        assert_eq!(session.current_id(), session.local_id);

        session.remote_id = Some("remote-1".into());
        assert_eq!(session.current_id(), "remote-1");
        assert!(session.is_identified_by("remote-1"));
        assert!(session.is_identified_by(&session.local_id.clone()));
        assert!(!session.is_identified_by("other"));
    }

    #[test]
    fn test_status_round_trips_through_column_value() {
        for status in [SessionStatus::Active, SessionStatus::Paused, SessionStatus::Completed] {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
        }
        assert!("stopped".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn test_sync_state_ordering() {
        assert!(SyncState::LocalOnly < SyncState::RemotePending);
        assert!(SyncState::RemoteLinked < SyncState::Synced);
        assert!(SyncState::RemoteLinked.is_linked());
        assert!(!SyncState::RemotePending.is_linked());
    }

    #[test]
    fn test_wkt_is_longitude_first() {
        let segment = ScanSegment::new(
            "s",
            Coordinate::new(37.0, -122.0),
            Coordinate::new(37.1, -122.1),
            10.0,
            5,
        );
        assert_eq!(segment.wkt_linestring(), "LINESTRING(-122 37, -122.1 37.1)");
    }
}
