//! Embedded relational store.
//!
//! Owns every durable row. One SQLite connection guarded by a mutex; every
//! batch insert runs in a single transaction, so a failure leaves the store
//! exactly as before the call.

mod events;
mod fingerprints;
mod migrations;
mod network;
mod sessions;
mod snapshots;
mod types;

pub use events::NewEvent;
pub use network::NewNetworkRecord;
pub use sessions::NewSession;
pub use types::*;

use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

/// Typed storage error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether a retry with backoff may succeed (lock contention, busy
    /// database), as opposed to a constraint or corruption failure.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Process-wide persistence singleton. Created at startup, passed explicitly.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if needed) and migrate the database at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        // These pragmas return a result row; query_row discards it
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        let _timeout: i64 = conn.query_row("PRAGMA busy_timeout = 5000", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        conn.execute_batch(migrations::BOOTSTRAP)?;
        Self::apply_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Apply any migrations newer than the recorded watermark, in order.
    fn apply_migrations(conn: &Connection) -> StoreResult<()> {
        let max_applied: Option<i64> = conn.query_row(
            "SELECT MAX(script_index) FROM bridge_migrations",
            [],
            |row| row.get(0),
        )?;

        let next = max_applied.map(|m| m + 1).unwrap_or(0);
        for (index, script) in migrations::MIGRATIONS
            .iter()
            .enumerate()
            .skip(usize::try_from(next).unwrap_or(usize::MAX))
        {
            conn.execute_batch(script)?;
            conn.execute(
                "INSERT INTO bridge_migrations (script_index, applied_at) VALUES (?1, ?2)",
                rusqlite::params![index as i64, chrono::Utc::now().timestamp_millis()],
            )?;
            tracing::debug!(index, "applied store migration");
        }
        Ok(())
    }

    /// Run `f` with the locked connection.
    ///
    /// A poisoned lock is recovered: the connection itself stays valid even
    /// if a panicking thread held it.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut guard = self
            .conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard)
    }

    /// Row counts per table, served by `/stats`.
    pub fn table_counts(&self) -> StoreResult<TableCounts> {
        self.with_conn(|conn| {
            let count = |conn: &Connection, table: &str| -> StoreResult<i64> {
                let sql = format!("SELECT COUNT(*) FROM {table}");
                Ok(conn.query_row(&sql, [], |row| row.get(0))?)
            };
            Ok(TableCounts {
                sessions: count(conn, "sessions")?,
                events: count(conn, "events")?,
                network_requests: count(conn, "network_requests")?,
                error_fingerprints: count(conn, "error_fingerprints")?,
                snapshots: count(conn, "snapshots")?,
                snapshot_assets: count(conn, "snapshot_assets")?,
            })
        })
    }

    /// Bulk import of an offline-captured session: session row, events,
    /// network records, and fingerprint aggregates land in one transaction.
    pub fn import_bundle(
        &self,
        session: &NewSession,
        events: &[NewEvent],
        network: &[NewNetworkRecord],
        fingerprints: &[ImportedFingerprint],
    ) -> StoreResult<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            sessions::upsert_session_tx(&tx, session)?;
            events::insert_events_tx(&tx, &session.session_id, events)?;
            network::insert_network_tx(&tx, &session.session_id, network)?;
            for fp in fingerprints {
                let first_seen = fp.first_seen.unwrap_or(session.created_at);
                let last_seen = fp.last_seen.unwrap_or(first_seen).max(first_seen);
                tx.execute(
                    "INSERT INTO error_fingerprints
                         (hash, session_id, count, first_seen, last_seen,
                          sample_message, sample_stack)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(hash, session_id) DO UPDATE SET
                         count = count + excluded.count,
                         first_seen = MIN(first_seen, excluded.first_seen),
                         last_seen = MAX(last_seen, excluded.last_seen)",
                    rusqlite::params![
                        fp.hash,
                        session.session_id,
                        fp.count.unwrap_or(1).max(1),
                        first_seen,
                        last_seen,
                        fp.sample_message.as_deref().unwrap_or_default(),
                        fp.sample_stack.as_deref().unwrap_or_default(),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Number of sessions currently marked active, served by `/health`.
    pub fn active_session_count(&self) -> StoreResult<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM sessions WHERE status = 'active'",
                [],
                |row| row.get(0),
            )?)
        })
    }
}

/// Fingerprint aggregate accepted on the bulk import path.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ImportedFingerprint {
    pub hash: String,
    #[serde(default)]
    pub count: Option<i64>,
    #[serde(default)]
    pub first_seen: Option<i64>,
    #[serde(default)]
    pub last_seen: Option<i64>,
    #[serde(default)]
    pub sample_message: Option<String>,
    #[serde(default)]
    pub sample_stack: Option<String>,
}

/// Per-table row counts for `/stats`.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct TableCounts {
    pub sessions: i64,
    pub events: i64,
    pub network_requests: i64,
    pub error_fingerprints: i64,
    pub snapshots: i64,
    pub snapshot_assets: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bridge.db");

        {
            let store = Store::open(&path).unwrap();
            drop(store);
        }
        // Reopening applies no further migrations and keeps data intact
        let store = Store::open(&path).unwrap();
        let counts = store.table_counts().unwrap();
        assert_eq!(counts.sessions, 0);
    }

    #[test]
    fn migrations_recorded_once() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                let applied: i64 = conn
                    .query_row("SELECT COUNT(*) FROM bridge_migrations", [], |row| {
                        row.get(0)
                    })
                    .unwrap();
                assert_eq!(applied as usize, migrations::MIGRATIONS.len());
                Ok(())
            })
            .unwrap();
    }
}
