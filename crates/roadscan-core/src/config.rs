//! Configuration
//!
//! `roadscan.json` holds tunables for acquisition, evaluation and sync.
//! Every field has a default, so a partial file (or none at all) is valid.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::remote::RestConfig;
use crate::roughness::DEFAULT_WINDOW_MS;
use crate::sensors::{
    DEFAULT_LOCATION_DISTANCE_M, DEFAULT_LOCATION_PERIOD_MS, DEFAULT_SAMPLE_PERIOD_MS,
};

/// Current config format version
pub const CONFIG_VERSION: &str = "1.0";

/// Errors loading or saving configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading or writing the file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid config JSON
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoadScanConfig {
    /// Config version for migrations
    pub version: String,
    /// Motion acquisition
    pub sensors: SensorSettings,
    /// GPS acquisition
    pub location: LocationSettings,
    /// Segment evaluation
    pub roughness: RoughnessSettings,
    /// Local database and remote sync
    pub sync: SyncSettings,
}

impl Default for RoadScanConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            sensors: SensorSettings::default(),
            location: LocationSettings::default(),
            roughness: RoughnessSettings::default(),
            sync: SyncSettings::default(),
        }
    }
}

impl RoadScanConfig {
    /// Read a config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        let config = serde_json::from_str(&content)?;
        debug!("Loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Read a config file, falling back to defaults if it does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if !path.as_ref().exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Write the config as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Motion acquisition settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    /// Accelerometer/gyroscope period in milliseconds
    pub sample_period_ms: u64,
    /// How long raw samples are kept before trimming
    pub buffer_retention_ms: i64,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            sample_period_ms: DEFAULT_SAMPLE_PERIOD_MS,
            buffer_retention_ms: DEFAULT_WINDOW_MS,
        }
    }
}

/// GPS settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationSettings {
    /// Time between fixes in milliseconds
    pub period_ms: u64,
    /// Minimum movement between fixes in meters
    pub distance_interval_m: f64,
}

impl Default for LocationSettings {
    fn default() -> Self {
        Self {
            period_ms: DEFAULT_LOCATION_PERIOD_MS,
            distance_interval_m: DEFAULT_LOCATION_DISTANCE_M,
        }
    }
}

/// Evaluation cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoughnessSettings {
    /// Window evaluated each cycle; also the cycle period
    pub segment_window_ms: i64,
}

impl Default for RoughnessSettings {
    fn default() -> Self {
        Self {
            segment_window_ms: DEFAULT_WINDOW_MS,
        }
    }
}

impl RoughnessSettings {
    /// Evaluation period, never shorter than one millisecond
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.segment_window_ms.max(1) as u64)
    }
}

/// Sync and persistence settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Period of the background resync
    pub resync_interval_secs: u64,
    /// Wait after the network comes back before resyncing
    pub stabilize_delay_ms: u64,
    /// SQLite file for the local store
    pub database_path: PathBuf,
    /// Hosted backend; `None` keeps everything local
    pub remote: Option<RestConfig>,
}

fn default_resync_interval_secs() -> u64 {
    300
}

fn default_stabilize_delay_ms() -> u64 {
    2000
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            resync_interval_secs: default_resync_interval_secs(),
            stabilize_delay_ms: default_stabilize_delay_ms(),
            database_path: PathBuf::from("roadscan.db"),
            remote: None,
        }
    }
}

impl SyncSettings {
    /// Period of the background resync, at least one second
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs.max(1))
    }

    /// Delay between regaining the network and resyncing
    pub fn stabilize_delay(&self) -> Duration {
        Duration::from_millis(self.stabilize_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = RoadScanConfig::default();
        assert_eq!(config.sensors.sample_period_ms, 100);
        assert_eq!(config.location.period_ms, 1000);
        assert_eq!(config.roughness.segment_window_ms, 5000);
        assert_eq!(config.sync.resync_interval(), Duration::from_secs(300));
        assert_eq!(config.sync.stabilize_delay(), Duration::from_secs(2));
        assert!(config.sync.remote.is_none());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: RoadScanConfig =
            serde_json::from_str(r#"{"sync":{"resync_interval_secs":60}}"#).unwrap();
        assert_eq!(config.sync.resync_interval_secs, 60);
        assert_eq!(config.sync.stabilize_delay_ms, 2000);
        assert_eq!(config.version, CONFIG_VERSION);
        assert_eq!(config.sensors, SensorSettings::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("roadscan.json");

        let mut config = RoadScanConfig::default();
        config.sync.database_path = dir.path().join("scans.db");
        config.sync.remote = Some(RestConfig {
            base_url: "https://example.invalid".to_string(),
            api_key: "anon".to_string(),
            timeout_ms: 5000,
        });
        config.save(&path).unwrap();

        assert_eq!(RoadScanConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(matches!(RoadScanConfig::load(&path), Err(ConfigError::Io(_))));
        assert_eq!(
            RoadScanConfig::load_or_default(&path).unwrap(),
            RoadScanConfig::default()
        );
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let settings = SyncSettings {
            resync_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(settings.resync_interval(), Duration::from_secs(1));
    }
}
