//! Offline-first Sync
//!
//! Every write lands in the local store first. When the network is reachable
//! and a user is signed in, the write is mirrored to the remote store on a
//! best-effort basis; anything that did not make it is picked up by the next
//! full resync, which runs periodically and whenever connectivity returns.
//!
//! Sessions move through `local_only -> remote_pending -> remote_linked ->
//! synced`. Segments are only pushed once their session is `remote_linked`,
//! so a segment can never reach the remote store ahead of its session.
//!
//! Remote failures are logged and retried later; they are never returned
//! to callers. Local failures are.

mod engine;
mod network;
mod scheduler;

pub use engine::SyncEngine;
pub use network::NetworkMonitor;

use serde::Serialize;
use thiserror::Error;

use crate::remote::RemoteError;
use crate::storage::StoreError;

/// Why mirroring one session to the remote store stopped
#[derive(Error, Debug)]
pub enum SyncError {
    /// Local persistence failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The remote store refused or was unreachable
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The session was deleted locally while a remote call was in flight
    #[error("Session {0} no longer exists locally")]
    SessionGone(String),

    /// A remote write was attempted before linking
    #[error("Session {0} has no remote identity")]
    NotLinked(String),
}

/// Outcome of one full resync pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Another resync was already running; nothing was done
    pub skipped: bool,
    /// Offline or signed out; nothing was attempted
    pub offline: bool,
    /// Sessions marked synced in this pass
    pub sessions_synced: usize,
    /// Segments pushed in this pass
    pub segments_synced: usize,
    /// Pending remote deletes confirmed by the remote store
    pub deletes_confirmed: usize,
    /// Sessions or deletes left for the next pass
    pub failures: usize,
}

impl SyncReport {
    /// Report for a trigger that was dropped
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }

    /// Report for a pass that could not reach the remote store
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Default::default()
        }
    }

    /// Whether the pass ran and had nothing left over
    pub fn is_clean(&self) -> bool {
        !self.skipped && !self.offline && self.failures == 0
    }
}
