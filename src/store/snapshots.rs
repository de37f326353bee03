// Snapshot and snapshot-asset repository
// PNG blobs live in the asset table and are read back in byte-aligned chunks

use super::{
    AssetChunk, SnapshotMeta, SnapshotRow, SnapshotTrigger, Store, StoreResult, StyleMode,
    Truncation,
};
use rusqlite::{params, OptionalExtension, Row};

fn row_to_snapshot(row: &Row<'_>) -> rusqlite::Result<SnapshotRow> {
    let trigger: String = row.get("trigger_kind")?;
    let style_mode: String = row.get("style_mode")?;
    let styles_json: Option<String> = row.get("styles_payload")?;
    let redaction_json: Option<String> = row.get("redaction")?;
    Ok(SnapshotRow {
        snapshot_id: row.get("snapshot_id")?,
        session_id: row.get("session_id")?,
        timestamp: row.get("timestamp")?,
        trigger: SnapshotTrigger::parse(&trigger),
        trigger_event_id: row.get("trigger_event_id")?,
        selector: row.get("selector")?,
        url: row.get("url")?,
        dom_mode: row.get::<_, i64>("dom_mode")? != 0,
        png_mode: row.get::<_, i64>("png_mode")? != 0,
        style_mode: StyleMode::parse(&style_mode),
        dom_payload: row.get("dom_payload")?,
        styles_payload: styles_json.and_then(|s| serde_json::from_str(&s).ok()),
        truncation: Truncation {
            dom: row.get::<_, i64>("truncation_dom")? != 0,
            styles: row.get::<_, i64>("truncation_styles")? != 0,
            png: row.get::<_, i64>("truncation_png")? != 0,
        },
        redaction: redaction_json.and_then(|s| serde_json::from_str(&s).ok()),
        png_asset_id: row.get("png_asset_id")?,
    })
}

fn row_to_meta(row: &Row<'_>) -> rusqlite::Result<SnapshotMeta> {
    let full = row_to_snapshot(row)?;
    Ok(SnapshotMeta {
        snapshot_id: full.snapshot_id,
        session_id: full.session_id,
        timestamp: full.timestamp,
        trigger: full.trigger,
        selector: full.selector,
        url: full.url,
        dom_mode: full.dom_mode,
        png_mode: full.png_mode,
        style_mode: full.style_mode,
        truncation: full.truncation,
        png_asset_id: full.png_asset_id,
    })
}

impl Store {
    /// Insert one snapshot row. Asset attachment happens separately.
    pub fn insert_snapshot(&self, snapshot: &SnapshotRow) -> StoreResult<()> {
        let styles = snapshot
            .styles_payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let redaction = snapshot
            .redaction
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO snapshots
                     (snapshot_id, session_id, timestamp, trigger_kind, trigger_event_id,
                      selector, url, dom_mode, png_mode, style_mode, dom_payload,
                      styles_payload, truncation_dom, truncation_styles, truncation_png,
                      redaction, png_asset_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    snapshot.snapshot_id,
                    snapshot.session_id,
                    snapshot.timestamp,
                    snapshot.trigger.as_str(),
                    snapshot.trigger_event_id,
                    snapshot.selector,
                    snapshot.url,
                    snapshot.dom_mode as i64,
                    snapshot.png_mode as i64,
                    snapshot.style_mode.as_str(),
                    snapshot.dom_payload,
                    styles,
                    snapshot.truncation.dom as i64,
                    snapshot.truncation.styles as i64,
                    snapshot.truncation.png as i64,
                    redaction,
                    snapshot.png_asset_id,
                ],
            )?;
            Ok(())
        })
    }

    /// Store a PNG blob for a snapshot and link it. Returns the asset id.
    pub fn insert_snapshot_asset(&self, snapshot_id: &str, bytes: &[u8]) -> StoreResult<i64> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO snapshot_assets (snapshot_id, kind, bytes, size_bytes)
                 VALUES (?1, 'png', ?2, ?3)",
                params![snapshot_id, bytes, bytes.len() as i64],
            )?;
            let asset_id = tx.last_insert_rowid();
            tx.execute(
                "UPDATE snapshots SET png_asset_id = ?2 WHERE snapshot_id = ?1",
                params![snapshot_id, asset_id],
            )?;
            tx.commit()?;
            Ok(asset_id)
        })
    }

    /// Snapshot metadata for a session, newest first.
    pub fn list_snapshots(
        &self,
        session_id: &str,
        limit: u32,
        offset: u32,
    ) -> StoreResult<Vec<SnapshotMeta>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT * FROM snapshots
                 WHERE session_id = ?1
                 ORDER BY timestamp DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt.query_map(params![session_id, limit, offset], row_to_meta)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub fn get_snapshot(&self, snapshot_id: &str) -> StoreResult<Option<SnapshotRow>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT * FROM snapshots WHERE snapshot_id = ?1",
                    params![snapshot_id],
                    row_to_snapshot,
                )
                .optional()?)
        })
    }

    /// Snapshot directly linked to an event via its trigger.
    pub fn snapshot_for_trigger_event(
        &self,
        session_id: &str,
        event_id: &str,
    ) -> StoreResult<Option<SnapshotRow>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT * FROM snapshots
                     WHERE session_id = ?1 AND trigger_event_id = ?2
                     ORDER BY timestamp DESC
                     LIMIT 1",
                    params![session_id, event_id],
                    row_to_snapshot,
                )
                .optional()?)
        })
    }

    /// Nearest snapshot to a timestamp within `max_delta_ms`.
    pub fn snapshot_nearest(
        &self,
        session_id: &str,
        timestamp: i64,
        max_delta_ms: i64,
    ) -> StoreResult<Option<SnapshotRow>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT * FROM snapshots
                     WHERE session_id = ?1
                       AND timestamp >= ?2 - ?3 AND timestamp <= ?2 + ?3
                     ORDER BY ABS(timestamp - ?2) ASC
                     LIMIT 1",
                    params![session_id, timestamp, max_delta_ms],
                    row_to_snapshot,
                )
                .optional()?)
        })
    }

    /// Read a byte-aligned chunk of a snapshot's asset.
    ///
    /// Returns `None` when the snapshot has no linked asset. An offset past
    /// the end yields an empty chunk with the true `size_bytes`.
    pub fn read_snapshot_asset_chunk(
        &self,
        snapshot_id: &str,
        offset: u64,
        max_bytes: u64,
    ) -> StoreResult<Option<AssetChunk>> {
        self.with_conn(|conn| {
            let asset = conn
                .query_row(
                    "SELECT a.asset_id, a.kind, a.size_bytes,
                            substr(a.bytes, ?2 + 1, ?3) AS chunk
                     FROM snapshot_assets a
                     JOIN snapshots s ON s.png_asset_id = a.asset_id
                     WHERE s.snapshot_id = ?1",
                    params![snapshot_id, offset as i64, max_bytes as i64],
                    |row| {
                        Ok(AssetChunk {
                            asset_id: row.get(0)?,
                            snapshot_id: snapshot_id.to_string(),
                            kind: row.get(1)?,
                            offset,
                            data: row.get::<_, Vec<u8>>(3)?,
                            size_bytes: row.get::<_, i64>(2)? as u64,
                        })
                    },
                )
                .optional()?;
            Ok(asset)
        })
    }

    /// Number of PNG assets already stored for a session, for the
    /// per-session image cap.
    pub fn png_count_for_session(&self, session_id: &str) -> StoreResult<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM snapshot_assets a
                 JOIN snapshots s ON s.png_asset_id = a.asset_id
                 WHERE s.session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )?)
        })
    }

    /// Timestamp of the most recent snapshot for interval rate limiting.
    pub fn last_snapshot_at(&self, session_id: &str) -> StoreResult<Option<i64>> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT MAX(timestamp) FROM snapshots WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )?)
        })
    }
}
