use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

use super::sqlite::LocalStore;
use super::StoreError;
use crate::types::{Coordinate, ScanSegment, ScanSession, SessionStatus, SyncState, UnknownVariant};

const SESSION_COLUMNS: &str = "id, remote_id, user_id, started_at, ended_at, total_distance_km, \
                               average_roughness, status, sync_state, synced";

const SEGMENT_COLUMNS: &str = "id, session_id, start_lat, start_lng, end_lat, end_lng, \
                               average_roughness, segment_duration_seconds, synced, created_at";

/// A remote session whose deletion has not been confirmed yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDelete {
    /// Remote session to delete
    pub remote_id: String,
    /// When the local delete happened
    pub queued_at: DateTime<Utc>,
    /// Failed attempts so far
    pub attempts: u32,
}

/// Aggregate figures over completed sessions
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LocalStats {
    /// Number of completed sessions
    pub total_sessions: u32,
    /// Distance over all completed sessions
    pub total_distance_km: f64,
    /// Mean of the per-session averages
    pub average_roughness: f64,
}

/// Fixed-width UTC timestamps so text ordering matches time ordering
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_variant<T>(idx: usize, raw: String) -> rusqlite::Result<T>
where
    T: FromStr<Err = UnknownVariant>,
{
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<ScanSession> {
    let ended_at: Option<String> = row.get(4)?;
    Ok(ScanSession {
        local_id: row.get(0)?,
        remote_id: row.get(1)?,
        user_id: row.get(2)?,
        started_at: parse_ts(3, row.get(3)?)?,
        ended_at: ended_at.map(|raw| parse_ts(4, raw)).transpose()?,
        total_distance_m: row.get::<_, f64>(5)? * 1000.0,
        average_roughness: row.get(6)?,
        status: parse_variant(7, row.get(7)?)?,
        sync_state: parse_variant(8, row.get(8)?)?,
        synced: row.get(9)?,
    })
}

fn segment_from_row(row: &Row<'_>) -> rusqlite::Result<ScanSegment> {
    Ok(ScanSegment {
        id: row.get(0)?,
        session_id: row.get(1)?,
        start: Coordinate::new(row.get(2)?, row.get(3)?),
        end: Coordinate::new(row.get(4)?, row.get(5)?),
        average_roughness: row.get(6)?,
        duration_s: row.get(7)?,
        synced: row.get(8)?,
        created_at: parse_ts(9, row.get(9)?)?,
    })
}

fn find_session(conn: &Connection, identity: &str) -> rusqlite::Result<Option<ScanSession>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM scan_sessions WHERE id = ?1 OR remote_id = ?1",
            SESSION_COLUMNS
        ),
        params![identity],
        session_from_row,
    )
    .optional()
}

/// Map either identity of a session to its local id
fn resolve_local_id(conn: &Connection, identity: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM scan_sessions WHERE id = ?1 OR remote_id = ?1",
        params![identity],
        |row| row.get(0),
    )
    .optional()
}

fn query_segments(
    conn: &Connection,
    local_id: &str,
    only_unsynced: bool,
) -> rusqlite::Result<Vec<ScanSegment>> {
    let filter = if only_unsynced { " AND synced = 0" } else { "" };
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM scan_segments WHERE session_id = ?1{} ORDER BY created_at ASC, rowid ASC",
        SEGMENT_COLUMNS, filter
    ))?;
    let rows = stmt.query_map(params![local_id], segment_from_row)?;
    rows.collect()
}

impl LocalStore {
    // ── Sessions ─────────────────────────────────────────────────

    /// Insert or update a session by local id
    ///
    /// `remote_id` is only ever filled in, never replaced, and `synced`
    /// never goes back to false. `sync_state` is owned by
    /// [`LocalStore::set_sync_state`] and [`LocalStore::link_remote_identity`].
    pub async fn upsert_session(&self, session: &ScanSession) -> Result<(), StoreError> {
        let session = session.clone();
        self.with_conn(move |conn| {
            // ON CONFLICT rather than INSERT OR REPLACE: a REPLACE deletes the
            // row first and would cascade to its segments.
            conn.execute(
                "INSERT INTO scan_sessions \
                 (id, remote_id, user_id, started_at, ended_at, total_distance_km, \
                  average_roughness, status, sync_state, synced) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
                 ON CONFLICT(id) DO UPDATE SET \
                   remote_id = COALESCE(scan_sessions.remote_id, excluded.remote_id), \
                   user_id = excluded.user_id, \
                   started_at = excluded.started_at, \
                   ended_at = excluded.ended_at, \
                   total_distance_km = excluded.total_distance_km, \
                   average_roughness = excluded.average_roughness, \
                   status = excluded.status, \
                   synced = MAX(scan_sessions.synced, excluded.synced)",
                params![
                    session.local_id,
                    session.remote_id,
                    session.user_id,
                    format_ts(&session.started_at),
                    session.ended_at.as_ref().map(format_ts),
                    session.total_distance_m / 1000.0,
                    session.average_roughness,
                    session.status.as_str(),
                    session.sync_state.as_str(),
                    session.synced,
                ],
            )?;
            debug!("Upserted session {}", session.local_id);
            Ok(())
        })
        .await
    }

    /// Look up a session by local or remote id
    pub async fn get_session(&self, identity: &str) -> Result<Option<ScanSession>, StoreError> {
        let identity = identity.to_string();
        self.with_conn(move |conn| Ok(find_session(conn, &identity)?))
            .await
    }

    /// All sessions, newest first
    pub async fn list_sessions(&self) -> Result<Vec<ScanSession>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM scan_sessions ORDER BY started_at DESC, rowid DESC",
                SESSION_COLUMNS
            ))?;
            let rows = stmt.query_map([], session_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    /// Completed sessions not yet confirmed remotely, oldest first
    pub async fn unsynced_completed_sessions(&self) -> Result<Vec<ScanSession>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM scan_sessions WHERE synced = 0 AND status = ?1 \
                 ORDER BY started_at ASC, rowid ASC",
                SESSION_COLUMNS
            ))?;
            let rows = stmt.query_map(params![SessionStatus::Completed.as_str()], session_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    /// Change a session's lifecycle status; returns whether it exists
    pub async fn update_status(
        &self,
        identity: &str,
        status: SessionStatus,
    ) -> Result<bool, StoreError> {
        let identity = identity.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE scan_sessions SET status = ?2 WHERE id = ?1 OR remote_id = ?1",
                params![identity, status.as_str()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    /// Advance the reconciliation state; never moves it backwards
    ///
    /// Returns the state after the call, or `None` if the session is gone.
    pub async fn set_sync_state(
        &self,
        identity: &str,
        state: SyncState,
    ) -> Result<Option<SyncState>, StoreError> {
        let identity = identity.to_string();
        self.with_conn(move |conn| {
            let Some(session) = find_session(conn, &identity)? else {
                return Ok(None);
            };
            if state <= session.sync_state {
                return Ok(Some(session.sync_state));
            }
            conn.execute(
                "UPDATE scan_sessions SET sync_state = ?2 WHERE id = ?1",
                params![session.local_id, state.as_str()],
            )?;
            Ok(Some(state))
        })
        .await
    }

    /// Record the remote identity of a session
    ///
    /// Linking to the same remote id again is a no-op. Linking to a
    /// different one is refused.
    pub async fn link_remote_identity(
        &self,
        identity: &str,
        remote_id: &str,
    ) -> Result<ScanSession, StoreError> {
        let identity = identity.to_string();
        let remote_id = remote_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let session = find_session(&tx, &identity)?
                .ok_or_else(|| StoreError::SessionNotFound(identity.clone()))?;

            match session.remote_id.as_deref() {
                Some(existing) if existing == remote_id.as_str() => {}
                Some(existing) => {
                    return Err(StoreError::IdentityConflict {
                        local_id: session.local_id.clone(),
                        existing: existing.to_string(),
                    });
                }
                None => {
                    let state = session.sync_state.max(SyncState::RemoteLinked);
                    tx.execute(
                        "UPDATE scan_sessions SET remote_id = ?2, sync_state = ?3 WHERE id = ?1",
                        params![session.local_id, remote_id, state.as_str()],
                    )?;
                    debug!("Linked session {} to remote {}", session.local_id, remote_id);
                }
            }

            let linked = find_session(&tx, &session.local_id)?
                .ok_or_else(|| StoreError::SessionNotFound(session.local_id.clone()))?;
            tx.commit()?;
            Ok(linked)
        })
        .await
    }

    /// Set `synced` on a session and all of its segments in one transaction
    ///
    /// Returns whether the session exists.
    pub async fn mark_synced(&self, identity: &str) -> Result<bool, StoreError> {
        let identity = identity.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let Some(local_id) = resolve_local_id(&tx, &identity)? else {
                return Ok(false);
            };
            tx.execute(
                "UPDATE scan_sessions SET synced = 1, sync_state = ?2 WHERE id = ?1",
                params![local_id, SyncState::Synced.as_str()],
            )?;
            tx.execute(
                "UPDATE scan_segments SET synced = 1 WHERE session_id = ?1",
                params![local_id],
            )?;
            tx.commit()?;
            debug!("Marked session {} synced", local_id);
            Ok(true)
        })
        .await
    }

    /// Delete a session and its segments atomically
    ///
    /// If the session had a remote identity, a pending remote delete is
    /// queued in the same transaction. Returns the deleted session.
    pub async fn delete_session(&self, identity: &str) -> Result<Option<ScanSession>, StoreError> {
        let identity = identity.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let Some(session) = find_session(&tx, &identity)? else {
                return Ok(None);
            };
            if let Some(remote_id) = &session.remote_id {
                tx.execute(
                    "INSERT OR IGNORE INTO pending_remote_deletes (remote_id, queued_at) \
                     VALUES (?1, ?2)",
                    params![remote_id, format_ts(&Utc::now())],
                )?;
            }
            tx.execute(
                "DELETE FROM scan_segments WHERE session_id = ?1",
                params![session.local_id],
            )?;
            tx.execute(
                "DELETE FROM scan_sessions WHERE id = ?1",
                params![session.local_id],
            )?;
            tx.commit()?;
            debug!("Deleted session {}", session.local_id);
            Ok(Some(session))
        })
        .await
    }

    // ── Segments ─────────────────────────────────────────────────

    /// Insert a segment, or raise its `synced` flag if it already exists
    ///
    /// `segment.session_id` may be either identity of the session; the row
    /// is always stored against the local id.
    pub async fn upsert_segment(&self, segment: &ScanSegment) -> Result<(), StoreError> {
        let segment = segment.clone();
        self.with_conn(move |conn| {
            let local_id = resolve_local_id(conn, &segment.session_id)?
                .ok_or_else(|| StoreError::SessionNotFound(segment.session_id.clone()))?;
            conn.execute(
                "INSERT INTO scan_segments \
                 (id, session_id, start_lat, start_lng, end_lat, end_lng, \
                  average_roughness, segment_duration_seconds, synced, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
                 ON CONFLICT(id) DO UPDATE SET \
                   synced = MAX(scan_segments.synced, excluded.synced)",
                params![
                    segment.id,
                    local_id,
                    segment.start.lat,
                    segment.start.lng,
                    segment.end.lat,
                    segment.end.lng,
                    segment.average_roughness,
                    segment.duration_s,
                    segment.synced,
                    format_ts(&segment.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Segments of a session in creation order; empty if the session is unknown
    pub async fn list_segments(&self, identity: &str) -> Result<Vec<ScanSegment>, StoreError> {
        let identity = identity.to_string();
        self.with_conn(move |conn| match resolve_local_id(conn, &identity)? {
            Some(local_id) => Ok(query_segments(conn, &local_id, false)?),
            None => Ok(Vec::new()),
        })
        .await
    }

    /// Segments of a session not yet pushed to the remote store
    pub async fn unsynced_segments(&self, identity: &str) -> Result<Vec<ScanSegment>, StoreError> {
        let identity = identity.to_string();
        self.with_conn(move |conn| match resolve_local_id(conn, &identity)? {
            Some(local_id) => Ok(query_segments(conn, &local_id, true)?),
            None => Ok(Vec::new()),
        })
        .await
    }

    /// Set `synced` on one segment; returns whether it exists
    pub async fn mark_segment_synced(&self, segment_id: &str) -> Result<bool, StoreError> {
        let segment_id = segment_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE scan_segments SET synced = 1 WHERE id = ?1",
                params![segment_id],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    // ── Pending remote deletes ───────────────────────────────────

    /// Queue a remote session for deletion
    pub async fn enqueue_remote_delete(&self, remote_id: &str) -> Result<(), StoreError> {
        let remote_id = remote_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO pending_remote_deletes (remote_id, queued_at) VALUES (?1, ?2)",
                params![remote_id, format_ts(&Utc::now())],
            )?;
            Ok(())
        })
        .await
    }

    /// Remote deletions still to be confirmed, oldest first
    pub async fn pending_remote_deletes(&self) -> Result<Vec<PendingDelete>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT remote_id, queued_at, attempts FROM pending_remote_deletes \
                 ORDER BY queued_at ASC, rowid ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(PendingDelete {
                    remote_id: row.get(0)?,
                    queued_at: parse_ts(1, row.get(1)?)?,
                    attempts: row.get(2)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    /// Count a failed attempt at a queued deletion
    pub async fn record_delete_attempt(&self, remote_id: &str) -> Result<(), StoreError> {
        let remote_id = remote_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE pending_remote_deletes SET attempts = attempts + 1 WHERE remote_id = ?1",
                params![remote_id],
            )?;
            Ok(())
        })
        .await
    }

    /// Drop a queued deletion once the remote side confirmed it
    pub async fn clear_remote_delete(&self, remote_id: &str) -> Result<(), StoreError> {
        let remote_id = remote_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM pending_remote_deletes WHERE remote_id = ?1",
                params![remote_id],
            )?;
            Ok(())
        })
        .await
    }

    // ── Maintenance ──────────────────────────────────────────────

    /// Totals over completed sessions
    pub async fn stats(&self) -> Result<LocalStats, StoreError> {
        self.with_conn(|conn| {
            let stats = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(total_distance_km), 0), \
                        COALESCE(AVG(average_roughness), 0) \
                 FROM scan_sessions WHERE status = ?1",
                params![SessionStatus::Completed.as_str()],
                |row| {
                    Ok(LocalStats {
                        total_sessions: row.get(0)?,
                        total_distance_km: row.get(1)?,
                        average_roughness: row.get(2)?,
                    })
                },
            )?;
            Ok(stats)
        })
        .await
    }

    /// Remove every session, segment and queued deletion
    pub async fn clear_all(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute_batch(
                "DELETE FROM scan_segments;
                 DELETE FROM scan_sessions;
                 DELETE FROM pending_remote_deletes;",
            )?;
            tx.commit()?;
            debug!("All local tables cleared");
            Ok(())
        })
        .await
    }
}
