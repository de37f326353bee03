// Heavy capture tools: live DOM/style/layout/UI-snapshot requests routed
// through the capture dispatcher, with post-capture limits and degraded
// fallbacks built from the store

use crate::capture::DEFAULT_CAPTURE_TIMEOUT;
use crate::error::{BridgeError, ErrorKind};
use crate::ingest::protocol::{CaptureKind, SnapshotWire};
use crate::ingest::snapshots::{process_snapshot, DomLimitMode, SnapshotIngest};
use crate::ingest::AppState;
use crate::mcp::envelope::envelope;
use crate::mcp::schema::Args;
use crate::outline;
use crate::redact::{redact_snapshot_dom, SnapshotPolicy};
use crate::store::SessionRow;
use serde_json::{json, Value};

fn require_session(state: &AppState, args: &Args) -> Result<SessionRow, BridgeError> {
    let session_id = args.str("session_id").unwrap_or_default();
    state
        .store
        .get_session(session_id)?
        .ok_or_else(|| BridgeError::validation(format!("args.session_id: unknown session {session_id}")))
}

fn dom_policy(session: &SessionRow) -> SnapshotPolicy {
    let config = crate::ingest::snapshots::SnapshotConfig::for_session(session);
    SnapshotPolicy {
        safe_mode: session.safe_mode,
        profile: config.profile,
    }
}

/// Outline fallback for a selector, assembled from stored element refs.
fn stored_outline(state: &AppState, session_id: &str, selector: &str) -> String {
    let refs = state
        .store
        .element_refs(session_id, selector, 20, 0)
        .unwrap_or_default();
    let selectors: Vec<String> = refs
        .iter()
        .filter_map(|event| {
            event
                .data
                .get("selector")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .collect();
    if selectors.is_empty() {
        outline::outline_for_selector(selector)
    } else {
        outline::outline_from_selectors(selectors.iter().map(String::as_str))
    }
}

pub async fn get_dom_subtree(state: &AppState, args: &Args) -> Result<Value, BridgeError> {
    let session = require_session(state, args)?;
    let selector = args.str("selector").unwrap_or_default().to_string();
    let max_depth = args.i64("max_depth").unwrap_or(3);
    let max_bytes = args.i64("max_bytes").unwrap_or(50_000) as usize;

    let result = state
        .dispatcher
        .request_capture(
            &session.session_id,
            CaptureKind::DomSubtree,
            json!({ "selector": selector, "max_depth": max_depth, "max_bytes": max_bytes }),
            DEFAULT_CAPTURE_TIMEOUT,
        )
        .await;

    let limits = json!({ "max_depth": max_depth, "max_bytes": max_bytes });
    match result {
        Ok(data) => {
            let html = data.get("html").and_then(|v| v.as_str());
            let agent_outline = data
                .get("outline")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let mut truncated = data
                .get("truncated")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

            let payload = match html {
                Some(html) if html.len() > max_bytes => {
                    // Post-capture byte limit: fall back to an outline
                    truncated = true;
                    let outline = agent_outline
                        .unwrap_or_else(|| outline::outline_from_html(html, max_depth as usize));
                    json!({ "selector": selector, "outline": outline, "truncated": truncated })
                }
                Some(html) => {
                    let (masked, _) =
                        redact_snapshot_dom(html, Some(&selector), &dom_policy(&session));
                    json!({
                        "selector": selector,
                        "html": masked,
                        "outline": agent_outline,
                        "truncated": truncated,
                    })
                }
                None => json!({
                    "selector": selector,
                    "outline": agent_outline,
                    "truncated": truncated,
                }),
            };
            Ok(envelope(
                Some(&session.session_id),
                payload,
                Some(limits),
                false,
            ))
        }
        Err(err) if err.kind == ErrorKind::Timeout => {
            let outline = stored_outline(state, &session.session_id, &selector);
            Ok(envelope(
                Some(&session.session_id),
                json!({ "selector": selector, "outline": outline, "truncated": true }),
                Some(limits),
                true,
            ))
        }
        Err(err) => Err(err),
    }
}

pub async fn get_dom_document(state: &AppState, args: &Args) -> Result<Value, BridgeError> {
    let session = require_session(state, args)?;
    let mode = args.str("mode").unwrap_or("outline").to_string();

    let result = state
        .dispatcher
        .request_capture(
            &session.session_id,
            CaptureKind::DomDocument,
            json!({ "mode": mode }),
            DEFAULT_CAPTURE_TIMEOUT,
        )
        .await;

    match result {
        Ok(data) => {
            let payload = match (mode.as_str(), data.get("html").and_then(|v| v.as_str())) {
                ("html", Some(html)) => {
                    let (masked, _) = redact_snapshot_dom(html, None, &dom_policy(&session));
                    json!({ "mode": mode, "html": masked })
                }
                _ => {
                    let outline = data
                        .get("outline")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .or_else(|| {
                            data.get("html")
                                .and_then(|v| v.as_str())
                                .map(|html| outline::outline_from_html(html, 6))
                        });
                    json!({ "mode": mode, "outline": outline })
                }
            };
            Ok(envelope(Some(&session.session_id), payload, None, false))
        }
        Err(err) if err.kind == ErrorKind::Timeout => {
            // Degrade to the most recent stored snapshot's DOM channel
            let fallback = state
                .store
                .list_snapshots(&session.session_id, 1, 0)?
                .first()
                .map(|meta| meta.snapshot_id.clone())
                .and_then(|id| state.store.get_snapshot(&id).ok().flatten())
                .and_then(|row| row.dom_payload);
            match fallback {
                Some(dom) => {
                    let outline = if dom.trim_start().starts_with('<') {
                        outline::outline_from_html(&dom, 6)
                    } else {
                        dom
                    };
                    Ok(envelope(
                        Some(&session.session_id),
                        json!({ "mode": mode, "outline": outline, "truncated": true }),
                        None,
                        true,
                    ))
                }
                None => Err(err),
            }
        }
        Err(err) => Err(err),
    }
}

pub async fn get_computed_styles(state: &AppState, args: &Args) -> Result<Value, BridgeError> {
    let session = require_session(state, args)?;
    let selector = args.str("selector").unwrap_or_default().to_string();
    let style_mode = args.str("style_mode").unwrap_or("computed-lite").to_string();

    let data = state
        .dispatcher
        .request_capture(
            &session.session_id,
            CaptureKind::ComputedStyles,
            json!({ "selector": selector, "style_mode": style_mode }),
            DEFAULT_CAPTURE_TIMEOUT,
        )
        .await?;

    Ok(envelope(
        Some(&session.session_id),
        json!({ "selector": selector, "style_mode": style_mode, "styles": data }),
        None,
        false,
    ))
}

pub async fn get_layout_metrics(state: &AppState, args: &Args) -> Result<Value, BridgeError> {
    let session = require_session(state, args)?;
    let selector = args.str("selector").map(str::to_string);

    let data = state
        .dispatcher
        .request_capture(
            &session.session_id,
            CaptureKind::LayoutMetrics,
            json!({ "selector": selector }),
            DEFAULT_CAPTURE_TIMEOUT,
        )
        .await?;

    Ok(envelope(
        Some(&session.session_id),
        json!({ "selector": selector, "layout": data }),
        None,
        false,
    ))
}

pub async fn capture_ui_snapshot(state: &AppState, args: &Args) -> Result<Value, BridgeError> {
    let session = require_session(state, args)?;
    let selector = args.str("selector").map(str::to_string);
    let include_png = args.bool("include_png").unwrap_or(false);
    let profile = args.str("profile").unwrap_or("standard").to_string();

    let data = state
        .dispatcher
        .request_capture(
            &session.session_id,
            CaptureKind::UiSnapshot,
            json!({ "selector": selector, "include_png": include_png, "profile": profile }),
            DEFAULT_CAPTURE_TIMEOUT,
        )
        .await?;

    // The agent answers with a snapshot record; persist it like any other
    let mut wire: SnapshotWire = serde_json::from_value(data).map_err(|e| {
        BridgeError::internal(format!("agent returned malformed snapshot payload: {e}"))
    })?;
    wire.selector = wire.selector.or(selector);
    wire.trigger = Some("manual".to_string());
    if wire.profile.is_none() {
        wire.profile = Some(profile.clone());
    }
    if !include_png {
        wire.png_base64 = None;
    }
    if session.safe_mode && profile == "strict" {
        wire.png_base64 = None;
    }

    match process_snapshot(&state.store, &session, wire, DomLimitMode::Substitute)? {
        SnapshotIngest::Stored { snapshot_id } => {
            let row = state.store.get_snapshot(&snapshot_id)?;
            Ok(envelope(
                Some(&session.session_id),
                json!({ "snapshot": row }),
                None,
                false,
            ))
        }
        SnapshotIngest::Rejected { error } => Err(BridgeError::new(
            ErrorKind::RedactionBlocked,
            error,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureDispatcher;
    use crate::config::BridgeConfig;
    use crate::ingest::protocol::ServerMessage;
    use crate::ingest::queue::OutboundQueue;
    use crate::mcp::schema::{Args, ToolSchema};
    use crate::store::{NewSession, Store};
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
                url: Some("https://example.com".to_string()),
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

    fn args_for(schema: &ToolSchema, value: serde_json::Value) -> Args {
        schema.validate(&value).unwrap()
    }

    #[tokio::test]
    async fn no_live_connection_surfaces_immediately() {
        let state = test_state();
        static FIELDS: [crate::mcp::schema::Field; 1] = [crate::mcp::schema::Field::required(
            "session_id",
            crate::mcp::schema::FieldType::String,
        )];
        let schema = ToolSchema { fields: &FIELDS };
        let args = args_for(&schema, json!({"session_id": "s1"}));

        let err = get_layout_metrics(&state, &args).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoLiveConnection);
    }

    #[tokio::test]
    async fn dom_subtree_resolves_from_agent_result() {
        let state = test_state();
        let queue = Arc::new(OutboundQueue::default());
        state.dispatcher.bind("s1", queue.clone());

        let schema = crate::mcp::registry::schema_of("get_dom_subtree").unwrap();
        let args = args_for(&schema, json!({"session_id": "s1", "selector": "#app"}));

        let handler = {
            let state = state.clone();
            tokio::spawn(async move { get_dom_subtree(&state, &args).await })
        };

        let command_id = match queue.pop().await.unwrap() {
            ServerMessage::CaptureCommand {
                command_id, kind, ..
            } => {
                assert_eq!(kind, CaptureKind::DomSubtree);
                command_id
            }
            other => panic!("unexpected message: {other:?}"),
        };
        state.dispatcher.handle_result(
            "s1",
            command_id,
            true,
            Some(json!({"html": "<div id=\"app\"><input value=\"secret\"></div>"})),
            None,
        );

        let out = handler.await.unwrap().unwrap();
        assert_eq!(out["ok"], true);
        let html = out["html"].as_str().unwrap();
        assert!(html.contains("[REDACTED]"));
        assert!(!html.contains("secret"));
        assert!(out.get("degraded").is_none());
    }

    #[tokio::test]
    async fn oversized_capture_degrades_to_outline() {
        let state = test_state();
        let queue = Arc::new(OutboundQueue::default());
        state.dispatcher.bind("s1", queue.clone());

        let schema = crate::mcp::registry::schema_of("get_dom_subtree").unwrap();
        let args = args_for(
            &schema,
            json!({"session_id": "s1", "selector": "#app", "max_bytes": 1000}),
        );

        let handler = {
            let state = state.clone();
            tokio::spawn(async move { get_dom_subtree(&state, &args).await })
        };

        let command_id = match queue.pop().await.unwrap() {
            ServerMessage::CaptureCommand { command_id, .. } => command_id,
            other => panic!("unexpected message: {other:?}"),
        };
        let big = format!("<div id=\"app\">{}</div>", "y".repeat(5_000));
        state
            .dispatcher
            .handle_result("s1", command_id, true, Some(json!({ "html": big })), None);

        let out = handler.await.unwrap().unwrap();
        assert_eq!(out["truncated"], true);
        assert!(out.get("html").is_none());
        assert!(out["outline"].as_str().unwrap().contains("div#app"));
    }
}
