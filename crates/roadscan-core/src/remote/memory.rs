//! In-process remote store
//!
//! Behaves like the hosted backend (user scoping, idempotent writes,
//! foreign keys) and can be told to fail or stall, which makes it the
//! backend for tests and the simulated CLI run.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    NewRemoteSession, RemoteError, RemoteSegmentRow, RemoteSessionRow, RemoteStore, SessionUpdate,
};

#[derive(Default)]
struct Tables {
    user: Option<String>,
    sessions: Vec<RemoteSessionRow>,
    segments: Vec<RemoteSegmentRow>,
    latency: Duration,
}

/// Remote store held in memory
#[derive(Default)]
pub struct MemoryRemoteStore {
    tables: Mutex<Tables>,
    failing: AtomicBool,
    fail_segments: AtomicBool,
    fail_deletes: AtomicBool,
    create_calls: AtomicU64,
    segment_calls: AtomicU64,
    delete_calls: AtomicU64,
}

impl MemoryRemoteStore {
    /// Empty store with a signed-in user
    pub fn with_user(user_id: impl Into<String>) -> Self {
        Self {
            tables: Mutex::new(Tables {
                user: Some(user_id.into()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Sign in or out
    pub async fn set_user(&self, user_id: Option<String>) {
        self.tables.lock().await.user = user_id;
    }

    /// Make every call fail as if the network dropped
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make only segment inserts fail
    pub fn set_fail_segments(&self, failing: bool) {
        self.fail_segments.store(failing, Ordering::SeqCst);
    }

    /// Make only session deletes fail
    pub fn set_fail_deletes(&self, failing: bool) {
        self.fail_deletes.store(failing, Ordering::SeqCst);
    }

    /// Delay every call by `latency`
    pub async fn set_latency(&self, latency: Duration) {
        self.tables.lock().await.latency = latency;
    }

    /// Number of `create_session` calls received
    pub fn create_calls(&self) -> u64 {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Number of `insert_segment` calls received
    pub fn segment_calls(&self) -> u64 {
        self.segment_calls.load(Ordering::SeqCst)
    }

    /// Number of `delete_session` calls received
    pub fn delete_calls(&self) -> u64 {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Snapshot of all session rows
    pub async fn session_rows(&self) -> Vec<RemoteSessionRow> {
        self.tables.lock().await.sessions.clone()
    }

    /// Snapshot of all segment rows
    pub async fn segment_rows(&self) -> Vec<RemoteSegmentRow> {
        self.tables.lock().await.segments.clone()
    }

    async fn enter(&self) -> Result<tokio::sync::MutexGuard<'_, Tables>, RemoteError> {
        let latency = self.tables.lock().await.latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(RemoteError::Unreachable("simulated outage".to_string()));
        }
        Ok(self.tables.lock().await)
    }

    async fn enter_as_user(
        &self,
    ) -> Result<(tokio::sync::MutexGuard<'_, Tables>, String), RemoteError> {
        let tables = self.enter().await?;
        let user = tables.user.clone().ok_or(RemoteError::NotAuthenticated)?;
        Ok((tables, user))
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn current_user(&self) -> Result<Option<String>, RemoteError> {
        Ok(self.enter().await?.user.clone())
    }

    async fn create_session(
        &self,
        session: &NewRemoteSession,
    ) -> Result<RemoteSessionRow, RemoteError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let (mut tables, user) = self.enter_as_user().await?;

        if let Some(existing) = tables
            .sessions
            .iter()
            .find(|s| s.client_id == session.client_id && s.user_id == user)
        {
            return Ok(existing.clone());
        }

        let row = RemoteSessionRow {
            id: Uuid::new_v4().to_string(),
            client_id: session.client_id.clone(),
            user_id: user,
            started_at: session.started_at,
            ended_at: None,
            total_distance_km: None,
            average_roughness: None,
            status: session.status,
        };
        tables.sessions.push(row.clone());
        Ok(row)
    }

    async fn update_session(
        &self,
        remote_id: &str,
        update: &SessionUpdate,
    ) -> Result<(), RemoteError> {
        let (mut tables, user) = self.enter_as_user().await?;
        let row = tables
            .sessions
            .iter_mut()
            .find(|s| s.id == remote_id && s.user_id == user)
            .ok_or_else(|| RemoteError::NotFound(remote_id.to_string()))?;

        if let Some(ended_at) = update.ended_at {
            row.ended_at = Some(ended_at);
        }
        if let Some(distance) = update.total_distance_km {
            row.total_distance_km = Some(distance);
        }
        if let Some(roughness) = update.average_roughness {
            row.average_roughness = Some(roughness);
        }
        if let Some(status) = update.status {
            row.status = status;
        }
        Ok(())
    }

    async fn insert_segment(&self, segment: &RemoteSegmentRow) -> Result<(), RemoteError> {
        self.segment_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_segments.load(Ordering::SeqCst) {
            return Err(RemoteError::Unreachable("simulated segment failure".to_string()));
        }
        let (mut tables, user) = self.enter_as_user().await?;

        if !tables
            .sessions
            .iter()
            .any(|s| s.id == segment.session_id && s.user_id == user)
        {
            return Err(RemoteError::Rejected {
                status: 409,
                message: format!("session {} does not exist", segment.session_id),
            });
        }
        if tables.segments.iter().any(|s| s.client_id == segment.client_id) {
            return Ok(());
        }
        tables.segments.push(segment.clone());
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<RemoteSessionRow>, RemoteError> {
        let (tables, user) = self.enter_as_user().await?;
        let mut rows: Vec<RemoteSessionRow> = tables
            .sessions
            .iter()
            .filter(|s| s.user_id == user)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(rows)
    }

    async fn list_segments(&self, remote_id: &str) -> Result<Vec<RemoteSegmentRow>, RemoteError> {
        let (tables, _) = self.enter_as_user().await?;
        let mut rows: Vec<RemoteSegmentRow> = tables
            .segments
            .iter()
            .filter(|s| s.session_id == remote_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    async fn delete_session(&self, remote_id: &str) -> Result<(), RemoteError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(RemoteError::Unreachable("simulated delete failure".to_string()));
        }
        let (mut tables, user) = self.enter_as_user().await?;
        tables
            .sessions
            .retain(|s| !(s.id == remote_id && s.user_id == user));
        tables.segments.retain(|s| s.session_id != remote_id);
        tracing::debug!("Memory remote deleted session {}", remote_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::types::{Coordinate, ScanSegment, SessionStatus};

    fn new_session(client_id: &str) -> NewRemoteSession {
        NewRemoteSession {
            client_id: client_id.to_string(),
            user_id: String::new(),
            started_at: Utc::now(),
            status: SessionStatus::Active,
        }
    }

    #[tokio::test]
    async fn test_create_is_idempotent_on_client_id() {
        let remote = MemoryRemoteStore::with_user("u");
        let a = remote.create_session(&new_session("local-1")).await.unwrap();
        let b = remote.create_session(&new_session("local-1")).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(remote.session_rows().await.len(), 1);
        assert_eq!(remote.create_calls(), 2);
    }

    #[tokio::test]
    async fn test_segment_needs_existing_session() {
        let remote = MemoryRemoteStore::with_user("u");
        let segment = ScanSegment::new(
            "x",
            Coordinate::new(0.0, 0.0),
            Coordinate::new(0.0, 1.0),
            1.0,
            5,
        );
        let err = remote
            .insert_segment(&RemoteSegmentRow::from_segment("missing", &segment))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { status: 409, .. }));
    }

    #[tokio::test]
    async fn test_signed_out_writes_are_refused() {
        let remote = MemoryRemoteStore::default();
        assert_eq!(remote.current_user().await.unwrap(), None);
        assert!(matches!(
            remote.create_session(&new_session("l")).await,
            Err(RemoteError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn test_outage_fails_every_call() {
        let remote = MemoryRemoteStore::with_user("u");
        remote.set_failing(true);
        assert!(matches!(
            remote.current_user().await,
            Err(RemoteError::Unreachable(_))
        ));
        remote.set_failing(false);
        assert!(remote.current_user().await.unwrap().is_some());
    }
}
