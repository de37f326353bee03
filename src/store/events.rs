// Event repository
// Batches land atomically; ordering within a session is (timestamp, event_id)

use super::{normalize_event_type, EventRow, Store, StoreResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

/// Fields accepted for one event in a batch.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NewEvent {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: i64,
    #[serde(default)]
    pub data: Value,
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<EventRow> {
    let data_json: String = row.get("data")?;
    Ok(EventRow {
        event_id: row.get("event_id")?,
        session_id: row.get("session_id")?,
        event_type: row.get("type")?,
        timestamp: row.get("timestamp")?,
        data: serde_json::from_str(&data_json).unwrap_or(Value::Null),
    })
}

pub(super) fn insert_events_tx(
    conn: &Connection,
    session_id: &str,
    events: &[NewEvent],
) -> StoreResult<usize> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO events (event_id, session_id, type, timestamp, data)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    let mut inserted = 0;
    for event in events {
        let data = serde_json::to_string(&event.data)?;
        inserted += stmt.execute(params![
            event.event_id,
            session_id,
            normalize_event_type(&event.event_type),
            event.timestamp,
            data,
        ])?;
    }
    Ok(inserted)
}

impl Store {
    /// Insert a batch of events in a single transaction.
    ///
    /// Duplicate event ids (agent retries) are ignored. On any failure the
    /// transaction rolls back and the store is unchanged.
    pub fn insert_events_batch(&self, session_id: &str, events: &[NewEvent]) -> StoreResult<usize> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let inserted = insert_events_tx(&tx, session_id, events)?;
            tx.commit()?;
            Ok(inserted)
        })
    }

    /// Recent events for a session, newest first.
    pub fn recent_events(
        &self,
        session_id: &str,
        since_ms: Option<i64>,
        limit: u32,
        offset: u32,
    ) -> StoreResult<Vec<EventRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT * FROM events
                 WHERE session_id = ?1 AND timestamp >= ?2
                 ORDER BY timestamp DESC, event_id DESC
                 LIMIT ?3 OFFSET ?4",
            )?;
            let rows = stmt.query_map(
                params![session_id, since_ms.unwrap_or(0), limit, offset],
                row_to_event,
            )?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Events of one type. `newest_first` controls ordering: navigation
    /// history reads chronologically, console tails read backwards.
    pub fn events_of_type(
        &self,
        session_id: &str,
        event_type: &str,
        newest_first: bool,
        limit: u32,
        offset: u32,
    ) -> StoreResult<Vec<EventRow>> {
        let order = if newest_first {
            "ORDER BY timestamp DESC, event_id DESC"
        } else {
            "ORDER BY timestamp ASC, event_id ASC"
        };
        let sql = format!(
            "SELECT * FROM events
             WHERE session_id = ?1 AND type = ?2
             {order}
             LIMIT ?3 OFFSET ?4"
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![session_id, event_type, limit, offset], row_to_event)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Element reference lookups: ui/element_ref events whose data mentions
    /// the selector.
    pub fn element_refs(
        &self,
        session_id: &str,
        selector: &str,
        limit: u32,
        offset: u32,
    ) -> StoreResult<Vec<EventRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT * FROM events
                 WHERE session_id = ?1
                   AND type IN ('ui', 'element_ref')
                   AND data LIKE '%' || ?2 || '%'
                 ORDER BY timestamp DESC, event_id DESC
                 LIMIT ?3 OFFSET ?4",
            )?;
            let rows = stmt.query_map(params![session_id, selector, limit, offset], row_to_event)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Events inside a closed time window, chronological.
    pub fn events_window(
        &self,
        session_id: &str,
        start_ms: i64,
        end_ms: i64,
        limit: u32,
    ) -> StoreResult<Vec<EventRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT * FROM events
                 WHERE session_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3
                 ORDER BY timestamp ASC, event_id ASC
                 LIMIT ?4",
            )?;
            let rows = stmt.query_map(params![session_id, start_ms, end_ms, limit], row_to_event)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Most recent event of a type at or after `since_ms`.
    pub fn last_event_of_type(
        &self,
        session_id: &str,
        event_type: &str,
        since_ms: i64,
    ) -> StoreResult<Option<EventRow>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT * FROM events
                     WHERE session_id = ?1 AND type = ?2 AND timestamp >= ?3
                     ORDER BY timestamp DESC, event_id DESC
                     LIMIT 1",
                    params![session_id, event_type, since_ms],
                    row_to_event,
                )
                .optional()?)
        })
    }

    /// Fetch one event by id.
    pub fn get_event(&self, session_id: &str, event_id: &str) -> StoreResult<Option<EventRow>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT * FROM events WHERE session_id = ?1 AND event_id = ?2",
                    params![session_id, event_id],
                    row_to_event,
                )
                .optional()?)
        })
    }
}
