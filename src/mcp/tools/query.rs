// Read-only tools over the store: sessions, events, fingerprints, network
// failures, element refs, failure explanation, and event correlation

use crate::error::{BridgeError, ErrorKind};
use crate::fingerprint;
use crate::ingest::AppState;
use crate::mcp::envelope::envelope;
use crate::mcp::schema::Args;
use crate::store::{EventRow, NetworkRow, SessionRow};
use serde_json::{json, Value};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn unknown_session(session_id: &str) -> BridgeError {
    BridgeError::validation(format!("args.session_id: unknown session {session_id}"))
}

/// Look up the session named by `args.session_id`.
fn require_session(state: &AppState, args: &Args) -> Result<SessionRow, BridgeError> {
    let session_id = args.str("session_id").unwrap_or_default();
    state
        .store
        .get_session(session_id)?
        .ok_or_else(|| unknown_session(session_id))
}

pub async fn list_sessions(state: &AppState, args: &Args) -> Result<Value, BridgeError> {
    let since_minutes = args.i64("since_minutes").unwrap_or(60);
    let limit = args.u32("limit").unwrap_or(20);
    let offset = args.u32("offset").unwrap_or(0);
    let since_ms = now_ms() - since_minutes * 60_000;

    let sessions = state.store.list_sessions(since_ms, limit, offset)?;
    let count = sessions.len();
    Ok(envelope(
        None,
        json!({ "sessions": sessions, "count": count }),
        Some(json!({ "since_minutes": since_minutes, "limit": limit, "offset": offset })),
        false,
    ))
}

pub async fn get_session_summary(state: &AppState, args: &Args) -> Result<Value, BridgeError> {
    let session = require_session(state, args)?;
    let summary = state
        .store
        .session_summary(&session.session_id)?
        .ok_or_else(|| unknown_session(&session.session_id))?;
    Ok(envelope(
        Some(&session.session_id),
        json!({ "summary": summary }),
        None,
        false,
    ))
}

pub async fn get_recent_events(state: &AppState, args: &Args) -> Result<Value, BridgeError> {
    let session = require_session(state, args)?;
    let since_minutes = args.i64("since_minutes").unwrap_or(60);
    let limit = args.u32("limit").unwrap_or(50);
    let offset = args.u32("offset").unwrap_or(0);
    let since_ms = now_ms() - since_minutes * 60_000;

    let events = state
        .store
        .recent_events(&session.session_id, Some(since_ms), limit, offset)?;
    let count = events.len();
    Ok(envelope(
        Some(&session.session_id),
        json!({ "events": events, "count": count }),
        Some(json!({ "since_minutes": since_minutes, "limit": limit, "offset": offset })),
        false,
    ))
}

pub async fn get_navigation_history(state: &AppState, args: &Args) -> Result<Value, BridgeError> {
    let session = require_session(state, args)?;
    let limit = args.u32("limit").unwrap_or(50);
    let offset = args.u32("offset").unwrap_or(0);

    let events = state
        .store
        .events_of_type(&session.session_id, "navigation", false, limit, offset)?;
    let count = events.len();
    Ok(envelope(
        Some(&session.session_id),
        json!({ "navigation": events, "count": count }),
        Some(json!({ "limit": limit, "offset": offset })),
        false,
    ))
}

pub async fn get_console_events(state: &AppState, args: &Args) -> Result<Value, BridgeError> {
    let session = require_session(state, args)?;
    let limit = args.u32("limit").unwrap_or(50);
    let offset = args.u32("offset").unwrap_or(0);

    let events = state
        .store
        .events_of_type(&session.session_id, "console", true, limit, offset)?;
    let count = events.len();
    Ok(envelope(
        Some(&session.session_id),
        json!({ "console": events, "count": count }),
        Some(json!({ "limit": limit, "offset": offset })),
        false,
    ))
}

pub async fn get_error_fingerprints(state: &AppState, args: &Args) -> Result<Value, BridgeError> {
    let limit = args.u32("limit").unwrap_or(20);
    let offset = args.u32("offset").unwrap_or(0);

    let (session_id, fingerprints) = match args.str("session_id") {
        Some(session_id) => {
            let session = require_session(state, args)?;
            let rows = state
                .store
                .fingerprints_for_session(&session.session_id, limit, offset)?;
            (Some(session_id.to_string()), rows)
        }
        None => (None, state.store.fingerprints_all(limit, offset)?),
    };

    let count = fingerprints.len();
    Ok(envelope(
        session_id.as_deref(),
        json!({ "fingerprints": fingerprints, "count": count }),
        Some(json!({ "limit": limit, "offset": offset })),
        false,
    ))
}

pub async fn get_network_failures(state: &AppState, args: &Args) -> Result<Value, BridgeError> {
    let session = require_session(state, args)?;
    let since_minutes = args.i64("since_minutes").unwrap_or(60);
    let limit = args.u32("limit").unwrap_or(50);
    let group_by = args.str("group_by").unwrap_or("url").to_string();
    let since_ms = now_ms() - since_minutes * 60_000;

    let failures = state
        .store
        .network_failures(&session.session_id, Some(since_ms), limit, 0)?;
    let groups = group_failures(&failures, &group_by);

    Ok(envelope(
        Some(&session.session_id),
        json!({ "groups": groups, "total_failures": failures.len() }),
        Some(json!({ "since_minutes": since_minutes, "limit": limit, "group_by": group_by })),
        false,
    ))
}

fn group_failures(failures: &[NetworkRow], group_by: &str) -> Vec<Value> {
    let mut grouped: Vec<(String, Vec<&NetworkRow>)> = Vec::new();
    for failure in failures {
        let key = match group_by {
            "error_type" => failure.error_type.as_str().to_string(),
            "domain" => url::Url::parse(&failure.url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_else(|| "unknown".to_string()),
            _ => failure.url.clone(),
        };
        match grouped.iter_mut().find(|(k, _)| *k == key) {
            Some((_, rows)) => rows.push(failure),
            None => grouped.push((key, vec![failure])),
        }
    }
    grouped.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then(a.0.cmp(&b.0)));
    grouped
        .into_iter()
        .map(|(key, rows)| {
            json!({
                "key": key,
                "count": rows.len(),
                "latest_timestamp": rows.iter().map(|r| r.timestamp).max(),
                "samples": rows.iter().take(3).collect::<Vec<_>>(),
            })
        })
        .collect()
}

pub async fn get_element_refs(state: &AppState, args: &Args) -> Result<Value, BridgeError> {
    let session = require_session(state, args)?;
    let selector = args.str("selector").unwrap_or_default().to_string();
    let limit = args.u32("limit").unwrap_or(20);
    let offset = args.u32("offset").unwrap_or(0);

    let refs = state
        .store
        .element_refs(&session.session_id, &selector, limit, offset)?;
    let count = refs.len();
    Ok(envelope(
        Some(&session.session_id),
        json!({ "selector": selector, "refs": refs, "count": count }),
        Some(json!({ "limit": limit, "offset": offset })),
        false,
    ))
}

/// Correlation window used when gathering context around a failure.
const FAILURE_CONTEXT_WINDOW_MS: i64 = 5_000;

pub async fn explain_last_failure(state: &AppState, args: &Args) -> Result<Value, BridgeError> {
    let session = require_session(state, args)?;
    let lookback_seconds = args.i64("lookback_seconds").unwrap_or(30);
    let since_ms = now_ms() - lookback_seconds * 1_000;

    let last_error = state
        .store
        .last_event_of_type(&session.session_id, "error", since_ms)?;
    let last_network = state
        .store
        .last_network_failure(&session.session_id, since_ms)?;

    let anchor_ts = match (&last_error, &last_network) {
        (Some(event), Some(record)) => Some(event.timestamp.max(record.timestamp)),
        (Some(event), None) => Some(event.timestamp),
        (None, Some(record)) => Some(record.timestamp),
        (None, None) => None,
    };

    let Some(anchor_ts) = anchor_ts else {
        return Ok(envelope(
            Some(&session.session_id),
            json!({ "found": false }),
            Some(json!({ "lookback_seconds": lookback_seconds })),
            false,
        ));
    };

    // Prefer the more recent of the two failure signals as the headline
    let error_is_primary = match (&last_error, &last_network) {
        (Some(event), Some(record)) => event.timestamp >= record.timestamp,
        (Some(_), None) => true,
        _ => false,
    };

    let failure_fingerprint = last_error.as_ref().filter(|_| error_is_primary).map(|event| {
        let message = event
            .data
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let stack = event
            .data
            .get("stack")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        fingerprint::fingerprint(message, stack)
    });

    let context_events = state.store.events_window(
        &session.session_id,
        anchor_ts - FAILURE_CONTEXT_WINDOW_MS,
        anchor_ts,
        50,
    )?;
    let context_network = state.store.network_window(
        &session.session_id,
        anchor_ts - FAILURE_CONTEXT_WINDOW_MS,
        anchor_ts,
        50,
    )?;

    let payload = json!({
        "found": true,
        "kind": if error_is_primary { "error" } else { "network" },
        "error": last_error,
        "network_failure": last_network,
        "fingerprint": failure_fingerprint,
        "context_events": context_events,
        "context_network": context_network,
    });

    Ok(envelope(
        Some(&session.session_id),
        payload,
        Some(json!({ "lookback_seconds": lookback_seconds })),
        false,
    ))
}

/// Correlation score for an event at `dt_ms` from the anchor, with the
/// window in milliseconds: `1 / (1 + |dt| / window)`, clamped to [0, 1].
pub fn correlation_score(dt_ms: i64, window_ms: i64) -> f64 {
    if window_ms <= 0 {
        return 0.0;
    }
    let ratio = (dt_ms.abs() as f64) / (window_ms as f64);
    (1.0 / (1.0 + ratio)).clamp(0.0, 1.0)
}

/// Causal pairs get a tie-break preference: a click anchor links forward to
/// network activity; an error anchor links to console output.
fn is_causal(anchor: &EventRow, kind: &str, item_type: &str, dt_ms: i64) -> bool {
    match (anchor.event_type.as_str(), kind) {
        ("click", "network") => dt_ms >= 0,
        ("error", "event") => item_type == "console",
        _ => false,
    }
}

pub async fn get_event_correlation(state: &AppState, args: &Args) -> Result<Value, BridgeError> {
    let session = require_session(state, args)?;
    let event_id = args.str("event_id").unwrap_or_default();
    let window_seconds = args.i64("window_seconds").unwrap_or(5);
    let window_ms = window_seconds * 1_000;

    let anchor = state
        .store
        .get_event(&session.session_id, event_id)?
        .ok_or_else(|| {
            BridgeError::new(
                ErrorKind::Validation,
                format!("args.event_id: unknown event {event_id}"),
            )
        })?;

    let events = state.store.events_window(
        &session.session_id,
        anchor.timestamp - window_ms,
        anchor.timestamp + window_ms,
        200,
    )?;
    let network = state.store.network_window(
        &session.session_id,
        anchor.timestamp - window_ms,
        anchor.timestamp + window_ms,
        200,
    )?;

    #[derive(serde::Serialize)]
    struct Scored {
        kind: &'static str,
        score: f64,
        causal: bool,
        timestamp: i64,
        record: Value,
    }

    let mut scored = Vec::new();
    for event in events {
        if event.event_id == anchor.event_id {
            continue;
        }
        let dt = event.timestamp - anchor.timestamp;
        scored.push(Scored {
            kind: "event",
            score: correlation_score(dt, window_ms),
            causal: is_causal(&anchor, "event", &event.event_type, dt),
            timestamp: event.timestamp,
            record: serde_json::to_value(&event)?,
        });
    }
    for record in network {
        let dt = record.timestamp - anchor.timestamp;
        scored.push(Scored {
            kind: "network",
            score: correlation_score(dt, window_ms),
            causal: is_causal(&anchor, "network", "", dt),
            timestamp: record.timestamp,
            record: serde_json::to_value(&record)?,
        });
    }

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.causal.cmp(&a.causal))
            .then(a.timestamp.cmp(&b.timestamp))
    });
    scored.truncate(50);
    let count = scored.len();

    Ok(envelope(
        Some(&session.session_id),
        json!({ "anchor": anchor, "correlated": scored, "count": count }),
        Some(json!({ "window_seconds": window_seconds })),
        false,
    ))
}
