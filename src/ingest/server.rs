// Loopback HTTP/WebSocket server
// Routes: /health, /stats, /ws, /sessions/import, /sessions/{id}/snapshots
// Ingest routes answer HTTP 200 with {ok: false, error} on validation
// failures; non-loopback peers are refused outright

use super::connection::run_connection;
use super::protocol::{AllowlistWire, SnapshotWire};
use super::snapshots::{process_snapshot, DomLimitMode, SnapshotIngest};
use super::AppState;
use crate::store::{ImportedFingerprint, NewEvent, NewNetworkRecord, NewSession};
use crate::{BRIDGE_NAME, BRIDGE_VERSION};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Build the ingest router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/ws", get(ws_upgrade))
        .route("/sessions/import", axum::routing::post(import_session))
        .route(
            "/sessions/{id}/snapshots",
            get(list_snapshots).post(post_snapshot),
        )
        .layer(middleware::from_fn(require_loopback))
        .with_state(state)
}

/// Bind the listener and serve until the future is dropped or the process
/// shuts down.
pub async fn serve(state: Arc<AppState>, listener: tokio::net::TcpListener) -> std::io::Result<()> {
    let app = build_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

async fn require_loopback(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: axum::extract::Request,
    next: Next,
) -> Response {
    if addr.ip().is_loopback() {
        next.run(req).await
    } else {
        (StatusCode::FORBIDDEN, "loopback connections only").into_response()
    }
}

async fn root() -> Json<Value> {
    Json(json!({ "name": BRIDGE_NAME, "version": BRIDGE_VERSION }))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let active_sessions = state.store.active_session_count().unwrap_or(0);
    Json(json!({
        "status": "ok",
        "name": BRIDGE_NAME,
        "version": BRIDGE_VERSION,
        "pid": std::process::id(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "active_sessions": active_sessions,
        "websocket": {
            "active_connections": state.metrics.active_connections.load(Ordering::Relaxed),
            "bound_sessions": state.dispatcher.bound_count(),
        },
    }))
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<Value> {
    let tables = match state.store.table_counts() {
        Ok(counts) => serde_json::to_value(counts).unwrap_or(Value::Null),
        Err(err) => {
            return Json(json!({ "ok": false, "error": err.to_string() }));
        }
    };
    let metrics = &state.metrics;
    Json(json!({
        "ok": true,
        "tables": tables,
        "connections": {
            "active": metrics.active_connections.load(Ordering::Relaxed),
            "total": metrics.total_connections.load(Ordering::Relaxed),
            "frames_received": metrics.frames_received.load(Ordering::Relaxed),
            "batches_persisted": metrics.batches_persisted.load(Ordering::Relaxed),
            "outbound_dropped": metrics.outbound_dropped.load(Ordering::Relaxed),
            "events_dropped_safe_mode": metrics.events_dropped_safe_mode.load(Ordering::Relaxed),
            "late_results_dropped": state.dispatcher.late_results_dropped(),
            "bound_sessions": state.dispatcher.bound_count(),
        },
    }))
}

async fn ws_upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_connection(state, socket))
}

/// Everything `POST /sessions/import` accepts, pre-validated.
#[derive(Debug)]
pub(crate) struct ImportBundle {
    pub session: NewSession,
    pub events: Vec<NewEvent>,
    pub network: Vec<NewNetworkRecord>,
    pub fingerprints: Vec<ImportedFingerprint>,
}

/// Validate an import body. Kept pure so the rules are testable without a
/// listener.
pub(crate) fn parse_import(body: &Value) -> Result<ImportBundle, String> {
    let session = body
        .get("session")
        .and_then(|v| v.as_object())
        .ok_or_else(|| "session object is required".to_string())?;

    let session_id = session
        .get("session_id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| "session.session_id is required".to_string())?
        .to_string();

    let created_at = session
        .get("created_at")
        .and_then(|v| v.as_i64())
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

    // The extension's export writes safe_mode as 0/1; accept both forms
    let safe_mode = session
        .get("safe_mode")
        .map(|v| v.as_bool().unwrap_or(v.as_i64().unwrap_or(0) != 0))
        .unwrap_or(false);

    let allowlist = session
        .get("allowlist")
        .cloned()
        .and_then(|v| serde_json::from_value::<AllowlistWire>(v).ok())
        .map(|a| a.to_allowlist().patterns().to_vec())
        .unwrap_or_default();

    let new_session = NewSession {
        session_id,
        created_at,
        url: session
            .get("url")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        safe_mode,
        allowlist,
        snapshot_config: session.get("snapshot_config").cloned(),
    };

    let events: Vec<NewEvent> = parse_list(body, "events")?;
    let network: Vec<NewNetworkRecord> = parse_list(body, "network")?;
    let fingerprints: Vec<ImportedFingerprint> = parse_list(body, "fingerprints")?;

    Ok(ImportBundle {
        session: new_session,
        events,
        network,
        fingerprints,
    })
}

fn parse_list<T: serde::de::DeserializeOwned>(body: &Value, field: &str) -> Result<Vec<T>, String> {
    match body.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => {
            serde_json::from_value(value.clone()).map_err(|e| format!("{field}: {e}"))
        }
    }
}

async fn import_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let bundle = match parse_import(&body) {
        Ok(bundle) => bundle,
        Err(error) => return Json(json!({ "ok": false, "error": error })),
    };

    match state.store.import_bundle(
        &bundle.session,
        &bundle.events,
        &bundle.network,
        &bundle.fingerprints,
    ) {
        Ok(()) => Json(json!({ "ok": true, "sessionId": bundle.session.session_id })),
        Err(err) => Json(json!({ "ok": false, "error": err.to_string() })),
    }
}

#[derive(Debug, serde::Deserialize)]
struct PageQuery {
    #[serde(default)]
    limit: Option<u32>,
    #[serde(default)]
    offset: Option<u32>,
}

async fn list_snapshots(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(page): Query<PageQuery>,
) -> Json<Value> {
    let limit = page.limit.unwrap_or(20).clamp(1, 100);
    let offset = page.offset.unwrap_or(0);
    match state.store.list_snapshots(&session_id, limit, offset) {
        Ok(snapshots) => Json(json!({ "ok": true, "snapshots": snapshots })),
        Err(err) => Json(json!({ "ok": false, "error": err.to_string() })),
    }
}

async fn post_snapshot(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(wire): Json<SnapshotWire>,
) -> Json<Value> {
    let session = match state.store.get_session(&session_id) {
        Ok(Some(session)) => session,
        Ok(None) => {
            return Json(json!({ "ok": false, "error": format!("unknown session {session_id}") }));
        }
        Err(err) => return Json(json!({ "ok": false, "error": err.to_string() })),
    };

    match process_snapshot(&state.store, &session, wire, DomLimitMode::Reject) {
        Ok(SnapshotIngest::Stored { snapshot_id }) => {
            Json(json!({ "ok": true, "snapshotId": snapshot_id }))
        }
        Ok(SnapshotIngest::Rejected { error }) => Json(json!({ "ok": false, "error": error })),
        Err(err) => Json(json!({ "ok": false, "error": err.to_string() })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_requires_session_id() {
        let err = parse_import(&json!({ "session": {} })).unwrap_err();
        assert!(err.contains("session_id"));

        let err = parse_import(&json!({})).unwrap_err();
        assert!(err.contains("session"));
    }

    #[test]
    fn import_accepts_numeric_safe_mode() {
        let bundle = parse_import(&json!({
            "session": {
                "session_id": "x",
                "created_at": 1_700_000_000_000i64,
                "safe_mode": 1,
            },
            "events": [],
            "network": [],
            "fingerprints": [],
        }))
        .unwrap();
        assert!(bundle.session.safe_mode);
        assert_eq!(bundle.session.session_id, "x");
        assert_eq!(bundle.session.created_at, 1_700_000_000_000);
    }

    #[test]
    fn import_parses_payload_lists() {
        let bundle = parse_import(&json!({
            "session": { "session_id": "x" },
            "events": [
                {"event_id": "e1", "type": "console", "timestamp": 1, "data": {"m": "hi"}},
            ],
            "network": [
                {"network_id": "n1", "timestamp": 2, "method": "GET", "url": "https://a", "status": 500},
            ],
            "fingerprints": [
                {"hash": "h1", "count": 3},
            ],
        }))
        .unwrap();
        assert_eq!(bundle.events.len(), 1);
        assert_eq!(bundle.network.len(), 1);
        assert_eq!(bundle.fingerprints.len(), 1);
    }

    #[test]
    fn import_reports_bad_list_with_field_path() {
        let err = parse_import(&json!({
            "session": { "session_id": "x" },
            "events": [{"missing": "fields"}],
        }))
        .unwrap_err();
        assert!(err.starts_with("events:"), "{err}");
    }
}
