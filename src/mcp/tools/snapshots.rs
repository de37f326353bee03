// Snapshot query tools: listings, event linkage, and chunked asset reads

use crate::error::BridgeError;
use crate::ingest::AppState;
use crate::mcp::envelope::envelope;
use crate::mcp::schema::Args;
use base64::Engine;
use serde_json::{json, Value};

fn require_session_id<'a>(state: &AppState, args: &'a Args) -> Result<&'a str, BridgeError> {
    let session_id = args.str("session_id").unwrap_or_default();
    match state.store.get_session(session_id)? {
        Some(_) => Ok(session_id),
        None => Err(BridgeError::validation(format!(
            "args.session_id: unknown session {session_id}"
        ))),
    }
}

pub async fn list_snapshots(state: &AppState, args: &Args) -> Result<Value, BridgeError> {
    let session_id = require_session_id(state, args)?;
    let limit = args.u32("limit").unwrap_or(20);
    let offset = args.u32("offset").unwrap_or(0);

    let snapshots = state.store.list_snapshots(session_id, limit, offset)?;
    let count = snapshots.len();
    Ok(envelope(
        Some(session_id),
        json!({ "snapshots": snapshots, "count": count }),
        Some(json!({ "limit": limit, "offset": offset })),
        false,
    ))
}

pub async fn get_snapshot_for_event(state: &AppState, args: &Args) -> Result<Value, BridgeError> {
    let session_id = require_session_id(state, args)?;
    let event_id = args.str("event_id").unwrap_or_default();
    let max_delta_ms = args.i64("max_delta_ms").unwrap_or(5_000);

    let event = state
        .store
        .get_event(session_id, event_id)?
        .ok_or_else(|| {
            BridgeError::validation(format!("args.event_id: unknown event {event_id}"))
        })?;

    // A direct trigger link wins; otherwise fall back to temporal proximity
    let (snapshot, linkage) = match state.store.snapshot_for_trigger_event(session_id, event_id)? {
        Some(snapshot) => (Some(snapshot), Some("direct")),
        None => match state
            .store
            .snapshot_nearest(session_id, event.timestamp, max_delta_ms)?
        {
            Some(snapshot) => (Some(snapshot), Some("nearest")),
            None => (None, None),
        },
    };

    let found = snapshot.is_some();
    Ok(envelope(
        Some(session_id),
        json!({ "found": found, "linkage": linkage, "snapshot": snapshot, "event_id": event_id }),
        Some(json!({ "max_delta_ms": max_delta_ms })),
        false,
    ))
}

pub async fn get_snapshot_asset(state: &AppState, args: &Args) -> Result<Value, BridgeError> {
    let snapshot_id = args.str("snapshot_id").unwrap_or_default();
    let offset = args.i64("offset").unwrap_or(0) as u64;
    let max_bytes = args.i64("max_bytes").unwrap_or(65_536) as u64;
    let encoding = args.str("encoding").unwrap_or("base64").to_string();

    let snapshot = state.store.get_snapshot(snapshot_id)?.ok_or_else(|| {
        BridgeError::validation(format!("args.snapshot_id: unknown snapshot {snapshot_id}"))
    })?;

    let Some(chunk) = state
        .store
        .read_snapshot_asset_chunk(snapshot_id, offset, max_bytes)?
    else {
        return Ok(envelope(
            Some(&snapshot.session_id),
            json!({ "found": false, "snapshot_id": snapshot_id }),
            Some(json!({ "offset": offset, "max_bytes": max_bytes })),
            false,
        ));
    };

    let data = match encoding.as_str() {
        "raw" => String::from_utf8_lossy(&chunk.data).into_owned(),
        _ => base64::engine::general_purpose::STANDARD.encode(&chunk.data),
    };
    let chunk_len = chunk.data.len() as u64;
    let eof = offset + chunk_len >= chunk.size_bytes;

    Ok(envelope(
        Some(&snapshot.session_id),
        json!({
            "found": true,
            "snapshot_id": snapshot_id,
            "asset_id": chunk.asset_id,
            "kind": chunk.kind,
            "offset": offset,
            "chunk_bytes": chunk_len,
            "size_bytes": chunk.size_bytes,
            "encoding": encoding,
            "data": data,
            "eof": eof,
        }),
        Some(json!({ "max_bytes": max_bytes })),
        false,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureDispatcher;
    use crate::config::BridgeConfig;
    use crate::mcp::registry::schema_of;
    use crate::store::{
        NewEvent, NewSession, SnapshotRow, SnapshotTrigger, Store, StyleMode, Truncation,
    };
    use std::sync::Arc;

    fn test_state() -> Arc<AppState> {
        let config = BridgeConfig {
            data_dir: std::env::temp_dir(),
            port: 0,
            startup_timeout_ms: 1_000,
            stdio_mode: true,
        };
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .upsert_session(&NewSession {
                session_id: "s1".to_string(),
                created_at: 0,
                url: None,
                safe_mode: false,
                allowlist: Vec::new(),
                snapshot_config: None,
            })
            .unwrap();
        Arc::new(AppState::new(
            config,
            store,
            Arc::new(CaptureDispatcher::new()),
        ))
    }

    fn snapshot(id: &str, timestamp: i64, trigger_event: Option<&str>) -> SnapshotRow {
        SnapshotRow {
            snapshot_id: id.to_string(),
            session_id: "s1".to_string(),
            timestamp,
            trigger: SnapshotTrigger::Click,
            trigger_event_id: trigger_event.map(str::to_string),
            selector: None,
            url: String::new(),
            dom_mode: true,
            png_mode: false,
            style_mode: StyleMode::ComputedLite,
            dom_payload: Some("<div/>".to_string()),
            styles_payload: None,
            truncation: Truncation::default(),
            redaction: None,
            png_asset_id: None,
        }
    }

    #[tokio::test]
    async fn direct_link_beats_nearest() {
        let state = test_state();
        state
            .store
            .insert_events_batch(
                "s1",
                &[NewEvent {
                    event_id: "e1".to_string(),
                    event_type: "click".to_string(),
                    timestamp: 1_000,
                    data: serde_json::Value::Null,
                }],
            )
            .unwrap();
        state
            .store
            .insert_snapshot(&snapshot("near", 1_100, None))
            .unwrap();
        state
            .store
            .insert_snapshot(&snapshot("linked", 9_000, Some("e1")))
            .unwrap();

        let schema = schema_of("get_snapshot_for_event").unwrap();
        let args = schema
            .validate(&json!({"session_id": "s1", "event_id": "e1"}))
            .unwrap();
        let out = get_snapshot_for_event(&state, &args).await.unwrap();
        assert_eq!(out["linkage"], "direct");
        assert_eq!(out["snapshot"]["snapshot_id"], "linked");
    }

    #[tokio::test]
    async fn nearest_respects_delta_window() {
        let state = test_state();
        state
            .store
            .insert_events_batch(
                "s1",
                &[NewEvent {
                    event_id: "e1".to_string(),
                    event_type: "click".to_string(),
                    timestamp: 1_000,
                    data: serde_json::Value::Null,
                }],
            )
            .unwrap();
        state
            .store
            .insert_snapshot(&snapshot("far", 60_000, None))
            .unwrap();

        let schema = schema_of("get_snapshot_for_event").unwrap();
        let args = schema
            .validate(&json!({"session_id": "s1", "event_id": "e1", "max_delta_ms": 2000}))
            .unwrap();
        let out = get_snapshot_for_event(&state, &args).await.unwrap();
        assert_eq!(out["found"], false);
        assert!(out["snapshot"].is_null());
    }

    #[tokio::test]
    async fn asset_chunking_and_encodings() {
        let state = test_state();
        state
            .store
            .insert_snapshot(&snapshot("sn1", 1_000, None))
            .unwrap();
        state
            .store
            .insert_snapshot_asset("sn1", b"hello png bytes")
            .unwrap();

        let schema = schema_of("get_snapshot_asset").unwrap();
        let args = schema
            .validate(&json!({"snapshot_id": "sn1", "max_bytes": 5, "encoding": "raw"}))
            .unwrap();
        let out = get_snapshot_asset(&state, &args).await.unwrap();
        assert_eq!(out["data"], "hello");
        assert_eq!(out["eof"], false);
        assert_eq!(out["size_bytes"], 15);

        let args = schema
            .validate(&json!({"snapshot_id": "sn1", "offset": 6, "max_bytes": 100}))
            .unwrap();
        let out = get_snapshot_asset(&state, &args).await.unwrap();
        assert_eq!(out["eof"], true);
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(out["data"].as_str().unwrap())
            .unwrap();
        assert_eq!(decoded, b"png bytes");
    }
}
