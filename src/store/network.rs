// Network request repository

use super::{NetworkErrorType, NetworkRow, Store, StoreResult};
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Fields accepted for one record in a network batch.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NewNetworkRecord {
    pub network_id: String,
    pub timestamp: i64,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default = "default_error_type")]
    pub error_type: String,
}

fn default_error_type() -> String {
    "none".to_string()
}

impl NewNetworkRecord {
    /// Enforce the invariant that `error_type != none` iff the request
    /// failed: HTTP >= 400 becomes `http_error`, and a reported transport
    /// error with a success status keeps the reported type.
    pub fn normalized_error_type(&self) -> NetworkErrorType {
        let reported = NetworkErrorType::parse(&self.error_type);
        if self.status >= 400 && !reported.is_failure() {
            NetworkErrorType::HttpError
        } else if self.status > 0 && self.status < 400 && reported == NetworkErrorType::HttpError {
            NetworkErrorType::None
        } else {
            reported
        }
    }
}

fn row_to_network(row: &Row<'_>) -> rusqlite::Result<NetworkRow> {
    let error_type: String = row.get("error_type")?;
    Ok(NetworkRow {
        network_id: row.get("network_id")?,
        session_id: row.get("session_id")?,
        timestamp: row.get("timestamp")?,
        method: row.get("method")?,
        url: row.get("url")?,
        status: row.get("status")?,
        duration_ms: row.get("duration_ms")?,
        error_type: NetworkErrorType::parse(&error_type),
    })
}

pub(super) fn insert_network_tx(
    conn: &Connection,
    session_id: &str,
    records: &[NewNetworkRecord],
) -> StoreResult<usize> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO network_requests
             (network_id, session_id, timestamp, method, url, status, duration_ms, error_type)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    let mut inserted = 0;
    for record in records {
        inserted += stmt.execute(params![
            record.network_id,
            session_id,
            record.timestamp,
            record.method,
            record.url,
            record.status,
            record.duration_ms,
            record.normalized_error_type().as_str(),
        ])?;
    }
    Ok(inserted)
}

impl Store {
    /// Insert a batch of network records in a single transaction.
    pub fn insert_network_batch(
        &self,
        session_id: &str,
        records: &[NewNetworkRecord],
    ) -> StoreResult<usize> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let inserted = insert_network_tx(&tx, session_id, records)?;
            tx.commit()?;
            Ok(inserted)
        })
    }

    /// Failed requests for a session, newest first.
    pub fn network_failures(
        &self,
        session_id: &str,
        since_ms: Option<i64>,
        limit: u32,
        offset: u32,
    ) -> StoreResult<Vec<NetworkRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT * FROM network_requests
                 WHERE session_id = ?1 AND error_type != 'none' AND timestamp >= ?2
                 ORDER BY timestamp DESC
                 LIMIT ?3 OFFSET ?4",
            )?;
            let rows = stmt.query_map(
                params![session_id, since_ms.unwrap_or(0), limit, offset],
                row_to_network,
            )?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Network records inside a closed time window, chronological.
    pub fn network_window(
        &self,
        session_id: &str,
        start_ms: i64,
        end_ms: i64,
        limit: u32,
    ) -> StoreResult<Vec<NetworkRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT * FROM network_requests
                 WHERE session_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3
                 ORDER BY timestamp ASC
                 LIMIT ?4",
            )?;
            let rows =
                stmt.query_map(params![session_id, start_ms, end_ms, limit], row_to_network)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Most recent failed request at or after `since_ms`.
    pub fn last_network_failure(
        &self,
        session_id: &str,
        since_ms: i64,
    ) -> StoreResult<Option<NetworkRow>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT * FROM network_requests
                     WHERE session_id = ?1 AND error_type != 'none' AND timestamp >= ?2
                     ORDER BY timestamp DESC
                     LIMIT 1",
                    params![session_id, since_ms],
                    row_to_network,
                )
                .optional()?)
        })
    }
}
