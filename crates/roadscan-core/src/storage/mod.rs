//! Local Storage
//!
//! Embedded SQLite store for scan sessions and segments. This is the source
//! of truth while offline; the sync engine reconciles it with the remote
//! store.
//!
//! The connection is opened lazily: every operation initializes the schema
//! on first use, so callers never see a missing-table error.

mod queries;
mod sqlite;

pub use queries::{LocalStats, PendingDelete};
pub use sqlite::{LocalStore, StoreLocation};

use thiserror::Error;

/// Errors from the local store
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite reported an error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The database directory could not be created
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No session has this local or remote id
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The session is already linked to another remote row
    #[error("Session {local_id} is already linked to remote id {existing}")]
    IdentityConflict {
        /// The session being linked
        local_id: String,
        /// Remote id it already has
        existing: String,
    },

    /// A row or the schema version is not what this build expects
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// The blocking task running the query panicked or was cancelled
    #[error("Storage task failed: {0}")]
    Task(String),
}
