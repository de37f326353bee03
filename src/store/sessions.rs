// Session repository

use super::{SessionRow, SessionStatus, SessionSummary, Store, StoreResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

/// Fields accepted by [`Store::upsert_session`].
#[derive(Debug, Clone)]
pub struct NewSession {
    pub session_id: String,
    pub created_at: i64,
    pub url: Option<String>,
    pub safe_mode: bool,
    pub allowlist: Vec<String>,
    pub snapshot_config: Option<Value>,
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    let allowlist_json: String = row.get("allowlist")?;
    let snapshot_config_json: Option<String> = row.get("snapshot_config")?;
    let status: String = row.get("status")?;
    Ok(SessionRow {
        session_id: row.get("session_id")?,
        created_at: row.get("created_at")?,
        url: row.get("url")?,
        safe_mode: row.get::<_, i64>("safe_mode")? != 0,
        allowlist: serde_json::from_str(&allowlist_json).unwrap_or_default(),
        snapshot_config: snapshot_config_json.and_then(|s| serde_json::from_str(&s).ok()),
        status: SessionStatus::parse(&status),
        ended_at: row.get("ended_at")?,
    })
}

pub(super) fn upsert_session_tx(conn: &Connection, new: &NewSession) -> StoreResult<()> {
    let allowlist = serde_json::to_string(&new.allowlist)?;
    let snapshot_config = new
        .snapshot_config
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "INSERT INTO sessions
             (session_id, created_at, url, safe_mode, allowlist, snapshot_config, status, ended_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active', NULL)
         ON CONFLICT(session_id) DO UPDATE SET
             url = excluded.url,
             safe_mode = excluded.safe_mode,
             allowlist = excluded.allowlist,
             snapshot_config = excluded.snapshot_config,
             status = 'active',
             ended_at = NULL",
        params![
            new.session_id,
            new.created_at,
            new.url,
            new.safe_mode as i64,
            allowlist,
            snapshot_config,
        ],
    )?;
    Ok(())
}

impl Store {
    /// Create or refresh a session row. A re-bind of a known session flips
    /// it back to active and clears `ended_at`.
    pub fn upsert_session(&self, new: &NewSession) -> StoreResult<()> {
        self.with_conn(|conn| upsert_session_tx(conn, new))
    }

    /// Apply a partial update from a `session_update` wire message.
    pub fn update_session(
        &self,
        session_id: &str,
        url: Option<&str>,
        safe_mode: Option<bool>,
        allowlist: Option<&[String]>,
    ) -> StoreResult<bool> {
        let allowlist_json = allowlist.map(serde_json::to_string).transpose()?;
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE sessions SET
                     url = COALESCE(?2, url),
                     safe_mode = COALESCE(?3, safe_mode),
                     allowlist = COALESCE(?4, allowlist)
                 WHERE session_id = ?1",
                params![
                    session_id,
                    url,
                    safe_mode.map(|b| b as i64),
                    allowlist_json,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    /// Close a session. `ended_at` is clamped up to `created_at` so the
    /// ordering invariant holds even with a skewed agent clock.
    pub fn close_session(&self, session_id: &str, ended_at: i64) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE sessions SET
                     status = 'closed',
                     ended_at = MAX(?2, created_at)
                 WHERE session_id = ?1 AND status = 'active'",
                params![session_id, ended_at],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn get_session(&self, session_id: &str) -> StoreResult<Option<SessionRow>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT * FROM sessions WHERE session_id = ?1",
                    params![session_id],
                    row_to_session,
                )
                .optional()?)
        })
    }

    /// Sessions created within the window, newest first.
    pub fn list_sessions(
        &self,
        since_ms: i64,
        limit: u32,
        offset: u32,
    ) -> StoreResult<Vec<SessionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM sessions
                 WHERE created_at >= ?1
                 ORDER BY created_at DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt.query_map(params![since_ms, limit, offset], row_to_session)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Aggregate summary for one session.
    pub fn session_summary(&self, session_id: &str) -> StoreResult<Option<SessionSummary>> {
        let Some(session) = self.get_session(session_id)? else {
            return Ok(None);
        };
        self.with_conn(|conn| {
            let event_counts = event_counts(conn, session_id)?;
            let (first_event_at, last_event_at) = conn.query_row(
                "SELECT MIN(timestamp), MAX(timestamp) FROM events WHERE session_id = ?1",
                params![session_id],
                |row| Ok((row.get::<_, Option<i64>>(0)?, row.get::<_, Option<i64>>(1)?)),
            )?;
            let network_failure_count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM network_requests
                 WHERE session_id = ?1 AND error_type != 'none'",
                params![session_id],
                |row| row.get(0),
            )?;
            let fingerprint_count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM error_fingerprints WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )?;
            let snapshot_count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM snapshots WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )?;

            Ok(Some(SessionSummary {
                session,
                event_counts,
                network_failure_count,
                fingerprint_count,
                snapshot_count,
                first_event_at,
                last_event_at,
            }))
        })
    }
}

fn event_counts(
    conn: &Connection,
    session_id: &str,
) -> StoreResult<std::collections::BTreeMap<String, i64>> {
    let mut stmt = conn.prepare(
        "SELECT type, COUNT(*) FROM events WHERE session_id = ?1 GROUP BY type ORDER BY type",
    )?;
    let rows = stmt.query_map(params![session_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    let mut counts = std::collections::BTreeMap::new();
    for row in rows {
        let (event_type, count) = row?;
        counts.insert(event_type, count);
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, created_at: i64) -> NewSession {
        NewSession {
            session_id: id.to_string(),
            created_at,
            url: Some("https://example.com".to_string()),
            safe_mode: false,
            allowlist: vec!["example.com".to_string()],
            snapshot_config: None,
        }
    }

    #[test]
    fn upsert_then_get_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_session(&sample("s1", 1_700_000_000_000)).unwrap();

        let row = store.get_session("s1").unwrap().unwrap();
        assert_eq!(row.session_id, "s1");
        assert_eq!(row.created_at, 1_700_000_000_000);
        assert_eq!(row.allowlist, vec!["example.com".to_string()]);
        assert_eq!(row.status, SessionStatus::Active);
        assert!(row.ended_at.is_none());
    }

    #[test]
    fn rebind_reactivates_closed_session() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_session(&sample("s1", 1_000)).unwrap();
        assert!(store.close_session("s1", 2_000).unwrap());

        let row = store.get_session("s1").unwrap().unwrap();
        assert_eq!(row.status, SessionStatus::Closed);
        assert_eq!(row.ended_at, Some(2_000));

        store.upsert_session(&sample("s1", 1_000)).unwrap();
        let row = store.get_session("s1").unwrap().unwrap();
        assert_eq!(row.status, SessionStatus::Active);
        assert!(row.ended_at.is_none());
    }

    #[test]
    fn close_clamps_ended_at_to_created_at() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_session(&sample("s1", 5_000)).unwrap();
        store.close_session("s1", 1_000).unwrap();

        let row = store.get_session("s1").unwrap().unwrap();
        assert_eq!(row.ended_at, Some(5_000));
    }

    #[test]
    fn list_sessions_window_and_pagination() {
        let store = Store::open_in_memory().unwrap();
        for (i, created) in [1_000i64, 2_000, 3_000, 4_000].iter().enumerate() {
            store
                .upsert_session(&sample(&format!("s{i}"), *created))
                .unwrap();
        }

        let rows = store.list_sessions(2_000, 10, 0).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].created_at, 4_000);

        let rows = store.list_sessions(2_000, 2, 1).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].created_at, 3_000);
    }

    #[test]
    fn partial_update_leaves_other_fields() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_session(&sample("s1", 1_000)).unwrap();

        assert!(store
            .update_session("s1", Some("https://next.example.com"), None, None)
            .unwrap());
        let row = store.get_session("s1").unwrap().unwrap();
        assert_eq!(row.url.as_deref(), Some("https://next.example.com"));
        assert!(!row.safe_mode);

        assert!(!store.update_session("missing", None, None, None).unwrap());
    }
}
