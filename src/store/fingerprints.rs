// Error fingerprint repository
// One row per (hash, session); the cross-session view aggregates at query
// time

use super::{FingerprintRow, Store, StoreResult};
use rusqlite::{params, Connection, Row};

fn row_to_fingerprint(row: &Row<'_>) -> rusqlite::Result<FingerprintRow> {
    Ok(FingerprintRow {
        hash: row.get("hash")?,
        session_id: row.get("session_id")?,
        count: row.get("count")?,
        first_seen: row.get("first_seen")?,
        last_seen: row.get("last_seen")?,
        sample_message: row.get("sample_message")?,
        sample_stack: row.get("sample_stack")?,
    })
}

pub(super) fn upsert_fingerprint_tx(
    conn: &Connection,
    session_id: &str,
    hash: &str,
    sample_message: &str,
    sample_stack: &str,
    seen_at: i64,
    increment: i64,
) -> StoreResult<()> {
    let increment = increment.max(1);
    conn.execute(
        "INSERT INTO error_fingerprints
             (hash, session_id, count, first_seen, last_seen, sample_message, sample_stack)
         VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?6)
         ON CONFLICT(hash, session_id) DO UPDATE SET
             count = count + excluded.count,
             first_seen = MIN(first_seen, excluded.first_seen),
             last_seen = MAX(last_seen, excluded.last_seen)",
        params![hash, session_id, increment, seen_at, sample_message, sample_stack],
    )?;
    Ok(())
}

impl Store {
    /// Record one or more occurrences of an error with the given hash.
    ///
    /// The first occurrence stores the samples; later ones only advance the
    /// counters, keeping `first_seen <= last_seen`.
    pub fn upsert_fingerprint(
        &self,
        session_id: &str,
        hash: &str,
        sample_message: &str,
        sample_stack: &str,
        seen_at: i64,
        increment: i64,
    ) -> StoreResult<()> {
        self.with_conn(|conn| {
            upsert_fingerprint_tx(
                conn,
                session_id,
                hash,
                sample_message,
                sample_stack,
                seen_at,
                increment,
            )
        })
    }

    /// Fingerprints for one session, most recently seen first.
    pub fn fingerprints_for_session(
        &self,
        session_id: &str,
        limit: u32,
        offset: u32,
    ) -> StoreResult<Vec<FingerprintRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT * FROM error_fingerprints
                 WHERE session_id = ?1
                 ORDER BY last_seen DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt.query_map(params![session_id, limit, offset], row_to_fingerprint)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Cross-session view: aggregates rows sharing a hash.
    pub fn fingerprints_all(&self, limit: u32, offset: u32) -> StoreResult<Vec<FingerprintRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT hash,
                        NULL AS session_id,
                        SUM(count) AS count,
                        MIN(first_seen) AS first_seen,
                        MAX(last_seen) AS last_seen,
                        MIN(sample_message) AS sample_message,
                        MIN(sample_stack) AS sample_stack
                 FROM error_fingerprints
                 GROUP BY hash
                 ORDER BY last_seen DESC
                 LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt.query_map(params![limit, offset], row_to_fingerprint)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}
