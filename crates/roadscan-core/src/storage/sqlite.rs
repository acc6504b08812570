use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::StoreError;

const SCHEMA_VERSION: i64 = 1;

/// Where the database lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// A database file, created if missing
    File(PathBuf),
    /// A private in-memory database
    Memory,
}

/// Durable row store for sessions and segments
///
/// One connection, serialized behind an async mutex and only ever touched
/// from the blocking pool. Writes to a session and its segments share a
/// transaction wherever they must stay consistent.
pub struct LocalStore {
    location: StoreLocation,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl LocalStore {
    /// Create a store; the database is opened on first use
    pub fn new(location: StoreLocation) -> Self {
        Self {
            location,
            conn: Arc::new(Mutex::new(None)),
        }
    }

    /// Store backed by a file
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::new(StoreLocation::File(path.into()))
    }

    /// Store that lives only as long as this value
    pub fn in_memory() -> Self {
        Self::new(StoreLocation::Memory)
    }

    /// Where this store keeps its data
    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    /// Open the database and create the schema if needed
    ///
    /// Calling this is optional; every other operation does it implicitly.
    pub async fn init(&self) -> Result<(), StoreError> {
        self.with_conn(|_| Ok(())).await
    }

    /// Run `f` against the open connection, opening it first if necessary
    ///
    /// `f` runs on tokio's blocking pool while this store's lock is held.
    pub(super) async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let mut guard = Arc::clone(&self.conn).lock_owned().await;
        let location = self.location.clone();
        tokio::task::spawn_blocking(move || {
            if guard.is_none() {
                *guard = Some(connect(&location)?);
            }
            let conn = guard
                .as_mut()
                .ok_or_else(|| StoreError::Corrupt("connection unavailable".to_string()))?;
            f(conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn connect(location: &StoreLocation) -> Result<Connection, StoreError> {
    let conn = match location {
        StoreLocation::File(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open(path)?
        }
        StoreLocation::Memory => Connection::open_in_memory()?,
    };
    configure_pragmas(&conn)?;
    migrate_schema(&conn)?;
    debug!("Local store opened at {:?}", location);
    Ok(conn)
}

fn configure_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(())
}

fn migrate_schema(conn: &Connection) -> Result<(), StoreError> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version > SCHEMA_VERSION {
        return Err(StoreError::Corrupt(format!(
            "schema version {} is newer than supported version {}",
            version, SCHEMA_VERSION
        )));
    }
    conn.execute_batch(include_str!("schema.sql"))?;
    debug!("Local schema ready (version {})", SCHEMA_VERSION);
    Ok(())
}
