//! Tests for offline-first sync against an in-memory remote

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use roadscan_core::remote::{self, MemoryRemoteStore};
    use roadscan_core::storage::LocalStore;
    use roadscan_core::sync::{NetworkMonitor, SyncEngine, SyncReport};
    use roadscan_core::types::{Coordinate, ScanSegment, ScanSession, SessionStatus, SyncState};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct Harness {
        sync: Arc<SyncEngine>,
        local: Arc<LocalStore>,
        remote: Arc<MemoryRemoteStore>,
    }

    fn harness(online: bool) -> Harness {
        let local = Arc::new(LocalStore::in_memory());
        let remote = Arc::new(MemoryRemoteStore::with_user("driver-1"));
        let sync = Arc::new(SyncEngine::new(
            local.clone(),
            remote.clone(),
            NetworkMonitor::new(online),
        ));
        Harness {
            sync,
            local,
            remote,
        }
    }

    fn segment(session_id: &str, n: u32) -> ScanSegment {
        let lat = 37.7749 + n as f64 * 0.0001;
        ScanSegment::new(
            session_id,
            Coordinate::new(lat, -122.4194),
            Coordinate::new(lat + 0.0001, -122.4194),
            10.0 + n as f64,
            5,
        )
    }

    /// Record a completed session with `segments` segments
    async fn record_session(h: &Harness, segments: u32) -> ScanSession {
        let session = h.sync.save_session(ScanSession::begin(None)).await.unwrap();
        for n in 0..segments {
            h.sync
                .save_segment(segment(session.current_id(), n))
                .await
                .unwrap();
        }
        h.sync
            .end_session(&session.local_id, 250.0, Some(11.0))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_offline_session_syncs_after_reconnect() {
        let h = harness(false);
        let session = record_session(&h, 2).await;
        assert!(!session.synced);
        assert_eq!(h.remote.create_calls(), 0);

        h.sync.network().set_reachable(true);
        let report = h.sync.full_resync().await.unwrap();
        assert_eq!(report.sessions_synced, 1);
        assert_eq!(report.segments_synced, 2);
        assert!(report.is_clean());

        let rows = h.remote.session_rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].client_id, session.local_id);
        assert_eq!(rows[0].status, SessionStatus::Completed);
        assert_eq!(rows[0].total_distance_km, Some(0.25));
        assert_eq!(h.remote.segment_rows().await.len(), 2);
        assert!(h
            .remote
            .segment_rows()
            .await
            .iter()
            .all(|s| s.session_id == rows[0].id));

        let stored = h.local.get_session(&session.local_id).await.unwrap().unwrap();
        assert!(stored.synced);
        assert_eq!(stored.sync_state, SyncState::Synced);
        assert_eq!(stored.remote_id.as_deref(), Some(rows[0].id.as_str()));
        let segments = h.local.list_segments(&session.local_id).await.unwrap();
        assert_eq!(segments.len(), 2);
        assert!(segments.iter().all(|s| s.synced));
    }

    #[tokio::test]
    async fn test_online_session_syncs_without_resync() {
        let h = harness(true);
        let session = record_session(&h, 3).await;

        assert!(session.synced);
        assert_eq!(h.remote.segment_rows().await.len(), 3);
        assert_eq!(h.sync.full_resync().await.unwrap(), SyncReport::default());
    }

    #[tokio::test]
    async fn test_resync_twice_pushes_nothing_new() {
        let h = harness(false);
        record_session(&h, 2).await;
        h.sync.network().set_reachable(true);

        h.sync.full_resync().await.unwrap();
        let creates = h.remote.create_calls();
        let inserts = h.remote.segment_calls();

        let second = h.sync.full_resync().await.unwrap();
        assert_eq!(second.sessions_synced, 0);
        assert_eq!(second.segments_synced, 0);
        assert_eq!(h.remote.create_calls(), creates);
        assert_eq!(h.remote.segment_calls(), inserts);
        assert_eq!(h.remote.session_rows().await.len(), 1);
    }

    #[tokio::test]
    async fn test_resync_offline_does_nothing() {
        let h = harness(false);
        record_session(&h, 1).await;
        assert_eq!(h.sync.full_resync().await.unwrap(), SyncReport::offline());
        assert_eq!(h.remote.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_signed_out_stays_local() {
        let h = harness(true);
        h.remote.set_user(None).await;
        let session = record_session(&h, 1).await;
        assert_eq!(session.sync_state, SyncState::LocalOnly);
        assert!(h.remote.session_rows().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_segment_push_is_retried() {
        let h = harness(true);
        let session = h.sync.save_session(ScanSession::begin(None)).await.unwrap();
        assert!(session.sync_state.is_linked());

        h.remote.set_fail_segments(true);
        let saved = h
            .sync
            .save_segment(segment(session.current_id(), 0))
            .await
            .unwrap();
        assert!(!saved.synced);
        let ended = h
            .sync
            .end_session(&session.local_id, 10.0, Some(10.0))
            .await
            .unwrap();
        assert!(!ended.synced);

        h.remote.set_fail_segments(false);
        let report = h.sync.full_resync().await.unwrap();
        assert_eq!(report.sessions_synced, 1);
        assert_eq!(report.segments_synced, 1);
        assert_eq!(h.remote.create_calls(), 1);
        assert!(h.local.get_session(&session.local_id).await.unwrap().unwrap().synced);
    }

    #[tokio::test]
    async fn test_remote_outage_counts_failure_and_keeps_records() {
        let h = harness(false);
        let session = record_session(&h, 1).await;
        h.sync.network().set_reachable(true);

        h.remote.set_fail_segments(true);
        let report = h.sync.full_resync().await.unwrap();
        assert_eq!(report.sessions_synced, 0);
        assert_eq!(report.failures, 1);

        // Linked on the first attempt; the retry reuses that identity
        let stored = h.local.get_session(&session.local_id).await.unwrap().unwrap();
        assert_eq!(stored.sync_state, SyncState::RemoteLinked);
        assert!(!stored.synced);

        h.remote.set_fail_segments(false);
        assert_eq!(h.sync.full_resync().await.unwrap().sessions_synced, 1);
        assert_eq!(h.remote.session_rows().await.len(), 1);
    }

    #[tokio::test]
    async fn test_segment_saved_before_linking_waits_for_session() {
        let h = harness(false);
        let session = h.sync.save_session(ScanSession::begin(None)).await.unwrap();

        // Back online before the session was ever linked
        h.sync.network().set_reachable(true);
        h.sync
            .save_segment(segment(&session.local_id, 0))
            .await
            .unwrap();
        assert_eq!(h.remote.segment_calls(), 0);

        h.sync
            .end_session(&session.local_id, 10.0, Some(10.0))
            .await
            .unwrap();
        let rows = h.remote.session_rows().await;
        let segments = h.remote.segment_rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].session_id, rows[0].id);
    }

    #[tokio::test]
    async fn test_delete_cascades_whatever_the_remote_does() {
        let h = harness(true);
        let session = record_session(&h, 2).await;
        h.remote.set_failing(true);

        assert!(h.sync.delete_session(&session.local_id).await.unwrap());
        assert!(h.local.get_session(&session.local_id).await.unwrap().is_none());
        assert!(h.local.list_segments(&session.local_id).await.unwrap().is_empty());
        assert_eq!(h.remote.session_rows().await.len(), 1);
    }

    #[tokio::test]
    async fn test_pending_delete_retried_by_resync() {
        let h = harness(true);
        let session = record_session(&h, 1).await;
        let remote_id = session.remote_id.clone().unwrap();

        h.sync.network().set_reachable(false);
        assert!(h.sync.delete_session(remote_id.as_str()).await.unwrap());
        assert_eq!(h.local.pending_remote_deletes().await.unwrap().len(), 1);
        assert_eq!(h.remote.delete_calls(), 0);

        h.sync.network().set_reachable(true);
        let report = h.sync.full_resync().await.unwrap();
        assert_eq!(report.deletes_confirmed, 1);
        assert!(h.remote.session_rows().await.is_empty());
        assert!(h.remote.segment_rows().await.is_empty());
        assert!(h.local.pending_remote_deletes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_delete_stays_queued() {
        let h = harness(true);
        let session = record_session(&h, 0).await;
        h.remote.set_fail_deletes(true);
        h.sync.delete_session(&session.local_id).await.unwrap();

        let pending = h.local.pending_remote_deletes().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);

        let report = h.sync.full_resync().await.unwrap();
        assert_eq!(report.failures, 1);
        assert_eq!(h.local.pending_remote_deletes().await.unwrap()[0].attempts, 2);

        h.remote.set_fail_deletes(false);
        assert_eq!(h.sync.full_resync().await.unwrap().deletes_confirmed, 1);
        assert!(h.local.pending_remote_deletes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_of_unknown_session() {
        let h = harness(true);
        assert!(!h.sync.delete_session("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_resync_is_dropped() {
        let h = harness(false);
        record_session(&h, 1).await;
        h.sync.network().set_reachable(true);
        h.remote.set_latency(Duration::from_millis(50)).await;

        let (a, b) = tokio::join!(h.sync.full_resync(), h.sync.full_resync());
        let reports = [a.unwrap(), b.unwrap()];
        assert_eq!(reports.iter().filter(|r| r.skipped).count(), 1);
        assert_eq!(
            reports.iter().map(|r| r.sessions_synced).sum::<usize>(),
            1
        );
        assert!(!h.sync.is_resyncing());
    }

    #[tokio::test]
    async fn test_reads_prefer_remote_when_online() {
        let h = harness(true);
        let session = record_session(&h, 2).await;

        let sessions = h.sync.sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].remote_id, session.remote_id);
        let segments = h.sync.segments(&session.local_id).await.unwrap();
        assert_eq!(segments.len(), 2);
        assert!(segments.iter().all(|s| s.synced));

        h.sync.network().set_reachable(false);
        assert_eq!(h.sync.sessions().await.unwrap()[0].local_id, session.local_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_resync_on_reconnect() {
        let h = harness(false);
        let shutdown = CancellationToken::new();
        let task = h.sync.spawn_background(shutdown.clone());

        record_session(&h, 1).await;
        h.sync.network().set_reachable(true);

        // Nothing before the stabilization delay
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(h.remote.session_rows().await.is_empty());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(h.remote.session_rows().await.len(), 1);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_periodic_resync() {
        let h = harness(true);
        h.remote.set_failing(true);
        let session = record_session(&h, 1).await;
        assert!(!session.synced);
        h.remote.set_failing(false);

        let shutdown = CancellationToken::new();
        let task = h.sync.spawn_background(shutdown.clone());
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(h.local.get_session(&session.local_id).await.unwrap().unwrap().synced);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unconfigured_remote_keeps_sessions_for_later_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roadscan.db");

        let detached = SyncEngine::new(
            Arc::new(LocalStore::open(&path)),
            remote::connect(None, None).await.unwrap(),
            NetworkMonitor::new(true),
        );
        let session = detached
            .save_session(ScanSession::begin(None))
            .await
            .unwrap();
        detached
            .save_segment(segment(&session.local_id, 0))
            .await
            .unwrap();
        let ended = detached
            .end_session(&session.local_id, 120.0, Some(20.0))
            .await
            .unwrap();
        assert!(!ended.synced);
        assert_eq!(ended.remote_id, None);
        assert_eq!(ended.sync_state, SyncState::LocalOnly);
        drop(detached);

        let backend = Arc::new(MemoryRemoteStore::with_user("driver-1"));
        let attached = SyncEngine::new(
            Arc::new(LocalStore::open(&path)),
            backend.clone(),
            NetworkMonitor::new(true),
        );
        let report = attached.full_resync().await.unwrap();
        assert_eq!(report.sessions_synced, 1);
        assert_eq!(report.segments_synced, 1);
        assert_eq!(backend.session_rows().await.len(), 1);
        assert_eq!(backend.session_rows().await[0].client_id, session.local_id);
    }
}
