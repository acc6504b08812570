//! Remote Store
//!
//! Row-oriented access to the cloud copy of sessions and segments, scoped to
//! the authenticated user.
//!
//! Writes are keyed by the device-generated id (`client_id`) so a repeated
//! create or insert after a lost response never produces a duplicate row.

mod memory;
mod rest;

pub use memory::MemoryRemoteStore;
pub use rest::{RestConfig, RestRemoteStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::types::{Coordinate, ScanSegment, ScanSession, SessionStatus, SyncState};

/// Errors from the remote store
#[derive(Error, Debug)]
pub enum RemoteError {
    /// No signed-in user, or the token was refused
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The backend could not be reached
    #[error("Remote unreachable: {0}")]
    Unreachable(String),

    /// Any other transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with an error status
    #[error("Remote rejected request ({status}): {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },

    /// A row the request depends on does not exist
    #[error("Remote row not found: {0}")]
    NotFound(String),

    /// The response body did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Session row as stored remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSessionRow {
    /// Id assigned by the backend
    pub id: String,
    /// Local id of the device that created the row
    pub client_id: String,
    /// Owner of the row
    pub user_id: String,
    /// When recording began
    pub started_at: DateTime<Utc>,
    /// When recording finished
    pub ended_at: Option<DateTime<Utc>>,
    /// Distance covered
    pub total_distance_km: Option<f64>,
    /// Mean segment score
    pub average_roughness: Option<f64>,
    /// Lifecycle status
    pub status: SessionStatus,
}

impl RemoteSessionRow {
    /// View a remote row through the local model
    pub fn to_session(&self) -> ScanSession {
        ScanSession {
            local_id: self.client_id.clone(),
            remote_id: Some(self.id.clone()),
            user_id: Some(self.user_id.clone()),
            started_at: self.started_at,
            ended_at: self.ended_at,
            status: self.status,
            total_distance_m: self.total_distance_km.unwrap_or(0.0) * 1000.0,
            average_roughness: self.average_roughness,
            sync_state: SyncState::Synced,
            synced: true,
        }
    }
}

/// Session fields sent on create
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRemoteSession {
    /// Local id of the session
    pub client_id: String,
    /// Owner of the row
    pub user_id: String,
    /// When recording began
    pub started_at: DateTime<Utc>,
    /// Lifecycle status
    pub status: SessionStatus,
}

/// Partial update of a remote session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdate {
    /// When recording finished
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Distance covered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_distance_km: Option<f64>,
    /// Mean segment score
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_roughness: Option<f64>,
    /// New lifecycle status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
}

impl SessionUpdate {
    /// Only the status changes
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// The terminal aggregate of a finished session
    pub fn finalize(session: &ScanSession) -> Self {
        Self {
            ended_at: session.ended_at,
            total_distance_km: Some(session.total_distance_m / 1000.0),
            average_roughness: session.average_roughness,
            status: Some(SessionStatus::Completed),
        }
    }
}

/// Segment row as stored remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSegmentRow {
    /// Local id of the segment
    pub client_id: String,
    /// Remote id of the owning session
    pub session_id: String,
    /// Start latitude
    pub start_lat: f64,
    /// Start longitude
    pub start_lng: f64,
    /// End latitude
    pub end_lat: f64,
    /// End longitude
    pub end_lng: f64,
    /// WKT line string for spatial queries
    pub geometry: String,
    /// Score of the segment
    pub average_roughness: f64,
    /// Length of the scored window
    pub segment_duration_seconds: u32,
    /// When the segment was recorded
    pub created_at: DateTime<Utc>,
}

impl RemoteSegmentRow {
    /// Build the remote row for a local segment under a remote session id
    pub fn from_segment(remote_session_id: &str, segment: &ScanSegment) -> Self {
        Self {
            client_id: segment.id.clone(),
            session_id: remote_session_id.to_string(),
            start_lat: segment.start.lat,
            start_lng: segment.start.lng,
            end_lat: segment.end.lat,
            end_lng: segment.end.lng,
            geometry: segment.wkt_linestring(),
            average_roughness: segment.average_roughness,
            segment_duration_seconds: segment.duration_s,
            created_at: segment.created_at,
        }
    }

    /// View a remote row through the local model
    pub fn to_segment(&self) -> ScanSegment {
        ScanSegment {
            id: self.client_id.clone(),
            session_id: self.session_id.clone(),
            start: Coordinate::new(self.start_lat, self.start_lng),
            end: Coordinate::new(self.end_lat, self.end_lng),
            average_roughness: self.average_roughness,
            duration_s: self.segment_duration_seconds,
            synced: true,
            created_at: self.created_at,
        }
    }
}

/// Cloud persistence consumed by the sync engine
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Short name for logs
    fn backend_tag(&self) -> &'static str;

    /// Id of the authenticated user, or `None` when signed out
    async fn current_user(&self) -> Result<Option<String>, RemoteError>;

    /// Create a session row; returns the existing row if `client_id` is known
    async fn create_session(&self, session: &NewRemoteSession)
        -> Result<RemoteSessionRow, RemoteError>;

    /// Apply a partial update to a session
    async fn update_session(&self, remote_id: &str, update: &SessionUpdate)
        -> Result<(), RemoteError>;

    /// Insert a segment; a repeated `client_id` is ignored
    async fn insert_segment(&self, segment: &RemoteSegmentRow) -> Result<(), RemoteError>;

    /// The user's sessions, newest first
    async fn list_sessions(&self) -> Result<Vec<RemoteSessionRow>, RemoteError>;

    /// Segments of one session in creation order
    async fn list_segments(&self, remote_id: &str) -> Result<Vec<RemoteSegmentRow>, RemoteError>;

    /// Delete a session and its segments; deleting a missing row succeeds
    async fn delete_session(&self, remote_id: &str) -> Result<(), RemoteError>;
}

/// Build the remote store for a configured backend
///
/// Without a backend the result is an in-memory store with nobody signed
/// in. Sessions then stay `local_only`, so a backend configured later still
/// receives them on its first resync.
pub async fn connect(
    config: Option<&RestConfig>,
    access_token: Option<String>,
) -> Result<Arc<dyn RemoteStore>, RemoteError> {
    let Some(config) = config else {
        info!("No remote configured; sessions stay local");
        return Ok(Arc::new(MemoryRemoteStore::default()));
    };

    let store = RestRemoteStore::new(config.clone())?;
    if access_token.is_none() {
        warn!("No access token for {}; sync stays local", config.base_url);
    }
    store.set_access_token(access_token).await;
    Ok(Arc::new(store))
}
