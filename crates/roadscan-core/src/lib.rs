//! # RoadScan Core Library
//!
//! Core functionality for RoadScan, a road roughness scanner.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Buffering of accelerometer/gyroscope readings
//! - Roughness scoring of a window of motion samples
//! - Great-circle distance tracking from GPS fixes
//! - Offline-first storage of scan sessions and segments (SQLite)
//! - Sync with a hosted backend, including retry after going offline
//! - A drive simulator for running without a device
//!
//! ## Example
//!
//! ```rust,ignore
//! use roadscan_core::prelude::*;
//! use std::sync::Arc;
//!
//! let config = RoadScanConfig::load_or_default("roadscan.json")?;
//! let remote = roadscan_core::remote::connect(config.sync.remote.as_ref(), None).await?;
//! let sync = Arc::new(SyncEngine::new(
//!     Arc::new(LocalStore::open(config.sync.database_path.clone())),
//!     remote,
//!     NetworkMonitor::new(true),
//! ));
//!
//! let (motion, gps) =
//!     DriveSimulator::new(RoadQuality::Variable, 42).into_configured_sources(&config);
//! let mut recorder = ScanRecorder::new(sync.clone(), motion, gps);
//! let session = recorder.start().await?;
//! ```

pub mod config;
pub mod location;
pub mod remote;
pub mod roughness;
pub mod scan;
pub mod sensors;
pub mod simulator;
pub mod storage;
pub mod sync;
pub mod types;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::RoadScanConfig;
    pub use crate::location::DistanceTracker;
    pub use crate::remote::{MemoryRemoteStore, RemoteStore, RestConfig, RestRemoteStore};
    pub use crate::roughness::{RoughnessCategory, RoughnessEngine, RoughnessResult};
    pub use crate::scan::{ScanCommand, ScanError, ScanRecorder, ScanState};
    pub use crate::sensors::{LocationSource, MotionSource, SampleBuffer};
    pub use crate::simulator::{DriveSimulator, RoadQuality, RoutePattern};
    pub use crate::storage::{LocalStore, StoreError};
    pub use crate::sync::{NetworkMonitor, SyncEngine, SyncReport};
    pub use crate::types::{LocationSample, ScanSegment, ScanSession, SensorSample, SyncState};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
