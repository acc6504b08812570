use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{NetworkMonitor, SyncError, SyncReport};
use crate::config::SyncSettings;
use crate::remote::{NewRemoteSession, RemoteSegmentRow, RemoteSessionRow, RemoteStore, SessionUpdate};
use crate::storage::{LocalStore, StoreError};
use crate::types::{ScanSegment, ScanSession, SessionStatus, SyncState};

/// Clears the in-flight flag when a resync pass ends, however it ends
struct ResyncGuard<'a>(&'a AtomicBool);

impl<'a> ResyncGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ResyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Local-first persistence with opportunistic remote mirroring
///
/// Shared via `Arc` between the scan recorder, the background scheduler and
/// whatever UI lists sessions.
pub struct SyncEngine {
    local: Arc<LocalStore>,
    remote: Arc<dyn RemoteStore>,
    network: NetworkMonitor,
    pub(super) settings: SyncSettings,
    resyncing: AtomicBool,
}

impl SyncEngine {
    /// Create an engine with default settings
    pub fn new(local: Arc<LocalStore>, remote: Arc<dyn RemoteStore>, network: NetworkMonitor) -> Self {
        Self {
            local,
            remote,
            network,
            settings: SyncSettings::default(),
            resyncing: AtomicBool::new(false),
        }
    }

    /// Replace the scheduler settings
    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    /// The local store
    pub fn local(&self) -> &Arc<LocalStore> {
        &self.local
    }

    /// The remote store
    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    /// The connectivity monitor
    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    /// Whether a full resync is running right now
    pub fn is_resyncing(&self) -> bool {
        self.resyncing.load(Ordering::Acquire)
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Persist a session, then try to create it remotely
    ///
    /// Returns the session as stored; `remote_id` is set if the remote
    /// create succeeded now or earlier.
    pub async fn save_session(&self, session: ScanSession) -> Result<ScanSession, StoreError> {
        self.local.upsert_session(&session).await?;
        info!("Saved session {} locally", session.local_id);

        if let Some(user_id) = self.online_user().await {
            match self.link(&session.local_id, &user_id).await {
                Ok(linked) => return Ok(linked),
                Err(SyncError::Store(e)) => return Err(e),
                Err(e) => warn!("Remote create of session {} deferred: {}", session.local_id, e),
            }
        }

        Ok(self
            .local
            .get_session(&session.local_id)
            .await?
            .unwrap_or(session))
    }

    /// Persist a segment, then push it if its session is linked
    ///
    /// `segment.session_id` may be either identity of the session. The
    /// returned segment carries the local session id.
    pub async fn save_segment(&self, segment: ScanSegment) -> Result<ScanSegment, StoreError> {
        self.local.upsert_segment(&segment).await?;
        let session = self
            .local
            .get_session(&segment.session_id)
            .await?
            .ok_or_else(|| StoreError::SessionNotFound(segment.session_id.clone()))?;
        let mut segment = ScanSegment {
            session_id: session.local_id.clone(),
            ..segment
        };

        let Some(remote_id) = session.remote_id.as_deref() else {
            debug!(
                "Segment {} deferred until session {} is linked",
                segment.id, session.local_id
            );
            return Ok(segment);
        };
        if self.online_user().await.is_none() {
            return Ok(segment);
        }

        match self
            .remote
            .insert_segment(&RemoteSegmentRow::from_segment(remote_id, &segment))
            .await
        {
            Ok(()) => {
                if self.local.mark_segment_synced(&segment.id).await? {
                    segment.synced = true;
                } else {
                    debug!("Segment {} was deleted before it could be marked", segment.id);
                }
            }
            Err(e) => warn!("Remote insert of segment {} deferred: {}", segment.id, e),
        }
        Ok(segment)
    }

    /// Record a session's final aggregate and try to sync it
    pub async fn end_session(
        &self,
        identity: &str,
        total_distance_m: f64,
        average_roughness: Option<f64>,
    ) -> Result<ScanSession, StoreError> {
        let mut session = self
            .local
            .get_session(identity)
            .await?
            .ok_or_else(|| StoreError::SessionNotFound(identity.to_string()))?;
        session.ended_at = Some(Utc::now());
        session.total_distance_m = total_distance_m;
        session.average_roughness = average_roughness;
        session.status = SessionStatus::Completed;
        self.local.upsert_session(&session).await?;
        info!(
            "Session {} completed: {:.0} m, roughness {:?}",
            session.local_id, total_distance_m, average_roughness
        );

        if let Some(user_id) = self.online_user().await {
            match self.sync_session(&session.local_id, &user_id).await {
                Ok(pushed) => info!("Session {} synced ({} segments)", session.local_id, pushed),
                Err(SyncError::Store(e)) => return Err(e),
                Err(e) => warn!("Sync of session {} deferred: {}", session.local_id, e),
            }
        }

        Ok(self
            .local
            .get_session(&session.local_id)
            .await?
            .unwrap_or(session))
    }

    /// Mark a session paused
    pub async fn pause_session(&self, identity: &str) -> Result<(), StoreError> {
        self.change_status(identity, SessionStatus::Paused).await
    }

    /// Mark a paused session active again
    pub async fn resume_session(&self, identity: &str) -> Result<(), StoreError> {
        self.change_status(identity, SessionStatus::Active).await
    }

    async fn change_status(&self, identity: &str, status: SessionStatus) -> Result<(), StoreError> {
        if !self.local.update_status(identity, status).await? {
            return Err(StoreError::SessionNotFound(identity.to_string()));
        }
        let Some(session) = self.local.get_session(identity).await? else {
            return Ok(());
        };
        debug!("Session {} is now {}", session.local_id, status.as_str());

        if let Some(remote_id) = session.remote_id.as_deref() {
            if self.online_user().await.is_some() {
                if let Err(e) = self
                    .remote
                    .update_session(remote_id, &SessionUpdate::status(status))
                    .await
                {
                    warn!("Remote status update for {} failed: {}", session.local_id, e);
                }
            }
        }
        Ok(())
    }

    /// Delete a session locally and, best effort, remotely
    ///
    /// A remote identity is queued for deletion in the same transaction as
    /// the local delete, so an offline or failed remote delete is retried by
    /// the next resync. Returns whether the session existed.
    pub async fn delete_session(&self, identity: &str) -> Result<bool, StoreError> {
        let Some(session) = self.local.delete_session(identity).await? else {
            return Ok(false);
        };
        info!("Deleted session {} locally", session.local_id);

        if let Some(remote_id) = session.remote_id.as_deref() {
            if self.online_user().await.is_some() {
                self.try_remote_delete(remote_id).await?;
            } else {
                debug!("Remote delete of {} queued", remote_id);
            }
        }
        Ok(true)
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Sessions for display: remote rows when available, otherwise local
    pub async fn sessions(&self) -> Result<Vec<ScanSession>, StoreError> {
        if self.online_user().await.is_some() {
            match self.remote.list_sessions().await {
                Ok(rows) if !rows.is_empty() => {
                    return Ok(rows.iter().map(RemoteSessionRow::to_session).collect())
                }
                Ok(_) => {}
                Err(e) => warn!("Falling back to local sessions: {}", e),
            }
        }
        self.local.list_sessions().await
    }

    /// Segments of a session: remote rows when available, otherwise local
    ///
    /// Remote rows carry the remote session id in `session_id`.
    pub async fn segments(&self, identity: &str) -> Result<Vec<ScanSegment>, StoreError> {
        let remote_id = match self.local.get_session(identity).await? {
            Some(session) => session.remote_id,
            None => Some(identity.to_string()),
        };

        if let Some(remote_id) = remote_id {
            if self.online_user().await.is_some() {
                match self.remote.list_segments(&remote_id).await {
                    Ok(rows) if !rows.is_empty() => {
                        return Ok(rows.iter().map(RemoteSegmentRow::to_segment).collect())
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Falling back to local segments: {}", e),
                }
            }
        }
        self.local.list_segments(identity).await
    }

    // ── Resync ───────────────────────────────────────────────────

    /// Push everything the local store holds that the remote store lacks
    ///
    /// Drains pending remote deletes first, then syncs every completed,
    /// unsynced session. Runs at most once at a time; a trigger that
    /// arrives while a pass is in flight returns [`SyncReport::skipped`].
    pub async fn full_resync(&self) -> Result<SyncReport, StoreError> {
        let Some(_guard) = ResyncGuard::acquire(&self.resyncing) else {
            debug!("Resync already in flight; trigger dropped");
            return Ok(SyncReport::skipped());
        };

        let Some(user_id) = self.online_user().await else {
            return Ok(SyncReport::offline());
        };

        let mut report = SyncReport::default();

        for pending in self.local.pending_remote_deletes().await? {
            if self.try_remote_delete(&pending.remote_id).await? {
                report.deletes_confirmed += 1;
            } else {
                report.failures += 1;
            }
        }

        for session in self.local.unsynced_completed_sessions().await? {
            match self.sync_session(&session.local_id, &user_id).await {
                Ok(pushed) => {
                    report.sessions_synced += 1;
                    report.segments_synced += pushed;
                }
                Err(SyncError::SessionGone(id)) => {
                    debug!("Session {} deleted during resync", id)
                }
                Err(SyncError::Store(e)) => return Err(e),
                Err(e) => {
                    report.failures += 1;
                    warn!("Resync of session {} failed: {}", session.local_id, e);
                }
            }
        }

        info!(
            "Resync via {}: {} sessions, {} segments, {} deletes, {} failures",
            self.remote.backend_tag(),
            report.sessions_synced,
            report.segments_synced,
            report.deletes_confirmed,
            report.failures
        );
        Ok(report)
    }

    // ── Internals ────────────────────────────────────────────────

    /// The signed-in user if the remote store is usable right now
    async fn online_user(&self) -> Option<String> {
        if !self.network.is_reachable() {
            debug!("Offline; staying local");
            return None;
        }
        match self.remote.current_user().await {
            Ok(Some(user_id)) => Some(user_id),
            Ok(None) => {
                debug!("Signed out; staying local");
                None
            }
            Err(e) => {
                warn!("Remote store {} unavailable: {}", self.remote.backend_tag(), e);
                None
            }
        }
    }

    /// Give a session its remote identity, creating the remote row if needed
    ///
    /// A session that is already linked is returned as is. The remote create
    /// is keyed by the local id, so repeating it after a lost response links
    /// to the same row.
    async fn link(&self, local_id: &str, user_id: &str) -> Result<ScanSession, SyncError> {
        let session = self
            .local
            .get_session(local_id)
            .await?
            .ok_or_else(|| SyncError::SessionGone(local_id.to_string()))?;
        if session.remote_id.is_some() {
            return Ok(session);
        }

        if self
            .local
            .set_sync_state(&session.local_id, SyncState::RemotePending)
            .await?
            .is_none()
        {
            return Err(SyncError::SessionGone(session.local_id));
        }

        let row = self
            .remote
            .create_session(&NewRemoteSession {
                client_id: session.local_id.clone(),
                user_id: session
                    .user_id
                    .clone()
                    .unwrap_or_else(|| user_id.to_string()),
                started_at: session.started_at,
                status: session.status,
            })
            .await?;

        match self.local.link_remote_identity(&session.local_id, &row.id).await {
            Ok(linked) => {
                info!("Session {} linked to remote {}", linked.local_id, row.id);
                Ok(linked)
            }
            Err(StoreError::SessionNotFound(_)) => {
                warn!(
                    "Session {} was deleted during remote create; queueing delete of {}",
                    session.local_id, row.id
                );
                self.local.enqueue_remote_delete(&row.id).await?;
                Err(SyncError::SessionGone(session.local_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Link, push unsynced segments, and finalize a completed session
    ///
    /// Returns the number of segments pushed. Each pushed segment is marked
    /// synced on its own, so a failure part-way keeps the progress made.
    async fn sync_session(&self, local_id: &str, user_id: &str) -> Result<usize, SyncError> {
        let linked = self.link(local_id, user_id).await?;
        let remote_id = linked
            .remote_id
            .clone()
            .ok_or_else(|| SyncError::NotLinked(linked.local_id.clone()))?;

        let mut pushed = 0;
        for segment in self.local.unsynced_segments(&linked.local_id).await? {
            self.remote
                .insert_segment(&RemoteSegmentRow::from_segment(&remote_id, &segment))
                .await?;
            if self.local.mark_segment_synced(&segment.id).await? {
                pushed += 1;
            }
        }

        if linked.status == SessionStatus::Completed {
            self.remote
                .update_session(&remote_id, &SessionUpdate::finalize(&linked))
                .await?;
            if !self.local.mark_synced(&linked.local_id).await? {
                return Err(SyncError::SessionGone(linked.local_id));
            }
        }
        Ok(pushed)
    }

    /// Attempt one queued remote delete; returns whether it was confirmed
    async fn try_remote_delete(&self, remote_id: &str) -> Result<bool, StoreError> {
        match self.remote.delete_session(remote_id).await {
            Ok(()) => {
                self.local.clear_remote_delete(remote_id).await?;
                debug!("Remote delete of {} confirmed", remote_id);
                Ok(true)
            }
            Err(e) => {
                self.local.record_delete_attempt(remote_id).await?;
                warn!("Remote delete of {} failed, will retry: {}", remote_id, e);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemoteStore;
    use crate::types::Coordinate;

    fn engine(remote: Arc<MemoryRemoteStore>, online: bool) -> SyncEngine {
        SyncEngine::new(
            Arc::new(LocalStore::in_memory()),
            remote,
            NetworkMonitor::new(online),
        )
    }

    fn segment(session_id: &str) -> ScanSegment {
        ScanSegment::new(
            session_id,
            Coordinate::new(37.7749, -122.4194),
            Coordinate::new(37.7750, -122.4193),
            12.5,
            5,
        )
    }

    #[tokio::test]
    async fn test_online_save_links_immediately() {
        let remote = Arc::new(MemoryRemoteStore::with_user("u1"));
        let sync = engine(remote.clone(), true);

        let saved = sync.save_session(ScanSession::begin(None)).await.unwrap();
        assert_eq!(saved.sync_state, SyncState::RemoteLinked);
        let rows = remote.session_rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(saved.remote_id.as_deref(), Some(rows[0].id.as_str()));
        assert_eq!(rows[0].client_id, saved.local_id);
    }

    #[tokio::test]
    async fn test_offline_save_stays_local() {
        let remote = Arc::new(MemoryRemoteStore::with_user("u1"));
        let sync = engine(remote.clone(), false);

        let saved = sync.save_session(ScanSession::begin(None)).await.unwrap();
        assert_eq!(saved.sync_state, SyncState::LocalOnly);
        assert!(saved.remote_id.is_none());
        assert_eq!(remote.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_create_leaves_session_pending() {
        let remote = Arc::new(MemoryRemoteStore::with_user("u1"));
        let sync = engine(remote.clone(), true);

        // signed out between the user check and the create
        let session = ScanSession::begin(None);
        sync.local().upsert_session(&session).await.unwrap();
        remote.set_user(None).await;
        let err = sync.link(&session.local_id, "u1").await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(_)));

        let stored = sync.local().get_session(&session.local_id).await.unwrap().unwrap();
        assert_eq!(stored.sync_state, SyncState::RemotePending);
        assert!(stored.remote_id.is_none());
    }

    #[tokio::test]
    async fn test_segment_of_linked_session_is_pushed() {
        let remote = Arc::new(MemoryRemoteStore::with_user("u1"));
        let sync = engine(remote.clone(), true);
        let session = sync.save_session(ScanSession::begin(None)).await.unwrap();

        let saved = sync.save_segment(segment(session.current_id())).await.unwrap();
        assert!(saved.synced);
        assert_eq!(saved.session_id, session.local_id);
        assert_eq!(remote.segment_rows().await.len(), 1);
    }

    #[tokio::test]
    async fn test_segment_of_unlinked_session_waits() {
        let remote = Arc::new(MemoryRemoteStore::with_user("u1"));
        let sync = engine(remote.clone(), false);
        let session = sync.save_session(ScanSession::begin(None)).await.unwrap();

        sync.network().set_reachable(true);
        let saved = sync.save_segment(segment(&session.local_id)).await.unwrap();
        assert!(!saved.synced);
        assert_eq!(remote.segment_calls(), 0);
    }

    #[tokio::test]
    async fn test_status_changes_reach_remote() {
        let remote = Arc::new(MemoryRemoteStore::with_user("u1"));
        let sync = engine(remote.clone(), true);
        let session = sync.save_session(ScanSession::begin(None)).await.unwrap();

        sync.pause_session(&session.local_id).await.unwrap();
        assert_eq!(remote.session_rows().await[0].status, SessionStatus::Paused);
        sync.resume_session(&session.local_id).await.unwrap();
        assert_eq!(remote.session_rows().await[0].status, SessionStatus::Active);

        assert!(matches!(
            sync.pause_session("missing").await,
            Err(StoreError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_resync_guard_drops_concurrent_trigger() {
        let flag = AtomicBool::new(false);
        let first = ResyncGuard::acquire(&flag);
        assert!(first.is_some());
        assert!(ResyncGuard::acquire(&flag).is_none());
        drop(first);
        assert!(ResyncGuard::acquire(&flag).is_some());
    }

    #[tokio::test]
    async fn test_reads_fall_back_to_local_offline() {
        let remote = Arc::new(MemoryRemoteStore::with_user("u1"));
        let sync = engine(remote, false);
        let session = sync.save_session(ScanSession::begin(None)).await.unwrap();
        sync.save_segment(segment(&session.local_id)).await.unwrap();

        assert_eq!(sync.sessions().await.unwrap().len(), 1);
        assert_eq!(sync.segments(&session.local_id).await.unwrap().len(), 1);
    }
}
