// End-to-end MCP tool dispatch against a seeded in-memory store
// Drives rpc::handle_request the way the stdio loop does, without sockets

use browser_bridge::capture::CaptureDispatcher;
use browser_bridge::config::BridgeConfig;
use browser_bridge::ingest::queue::OutboundQueue;
use browser_bridge::ingest::AppState;
use browser_bridge::mcp::rpc::{handle_request, JsonRpcRequest};
use browser_bridge::store::{NewEvent, NewNetworkRecord, NewSession, Store};
use serde_json::{json, Value};
use std::sync::Arc;

fn seeded_state() -> Arc<AppState> {
    let config = BridgeConfig {
        data_dir: std::env::temp_dir(),
        port: 0,
        startup_timeout_ms: 1_000,
        stdio_mode: true,
    };
    let store = Arc::new(Store::open_in_memory().unwrap());

    let now = chrono::Utc::now().timestamp_millis();
    store
        .upsert_session(&NewSession {
            session_id: "s1".to_string(),
            created_at: now - 60_000,
            url: Some("https://app.example.com".to_string()),
            safe_mode: false,
            allowlist: vec!["example.com".to_string()],
            snapshot_config: None,
        })
        .unwrap();

    store
        .insert_events_batch(
            "s1",
            &[
                NewEvent {
                    event_id: "click-1".to_string(),
                    event_type: "click".to_string(),
                    timestamp: now - 5_000,
                    data: json!({"selector": "#submit"}),
                },
                NewEvent {
                    event_id: "console-1".to_string(),
                    event_type: "console".to_string(),
                    timestamp: now - 4_500,
                    data: json!({"level": "error", "message": "request failed"}),
                },
                NewEvent {
                    event_id: "error-1".to_string(),
                    event_type: "error".to_string(),
                    timestamp: now - 4_000,
                    data: json!({"message": "TypeError: x is undefined", "stack": "at render (app.js:10:5)"}),
                },
                NewEvent {
                    event_id: "nav-1".to_string(),
                    event_type: "navigation".to_string(),
                    timestamp: now - 30_000,
                    data: json!({"url": "https://app.example.com/checkout"}),
                },
            ],
        )
        .unwrap();

    store
        .insert_network_batch(
            "s1",
            &[NewNetworkRecord {
                network_id: "net-1".to_string(),
                timestamp: now - 4_800,
                method: "POST".to_string(),
                url: "https://api.example.com/orders".to_string(),
                status: 500,
                duration_ms: 120,
                error_type: "none".to_string(),
            }],
        )
        .unwrap();

    Arc::new(AppState::new(
        config,
        store,
        Arc::new(CaptureDispatcher::new()),
    ))
}

async fn call(state: &AppState, id: i64, name: &str, arguments: Value) -> Value {
    let request = JsonRpcRequest {
        jsonrpc: Some("2.0".to_string()),
        id: Some(json!(id)),
        method: "call_tool".to_string(),
        params: Some(json!({"name": name, "arguments": arguments})),
    };
    handle_request(state, request).await.unwrap()
}

#[tokio::test]
async fn ingested_events_are_queryable() {
    let state = seeded_state();

    let response = call(&state, 1, "get_recent_events", json!({"session_id": "s1"})).await;
    let result = &response["result"];
    assert_eq!(result["ok"], true);
    assert_eq!(result["session_id"], "s1");
    assert_eq!(result["count"], 4);
    // Newest first
    assert_eq!(result["events"][0]["event_id"], "error-1");
    assert!(result["redaction_summary"]["total_fields"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn session_summary_aggregates() {
    let state = seeded_state();
    let response = call(&state, 2, "get_session_summary", json!({"session_id": "s1"})).await;
    let summary = &response["result"]["summary"];
    assert_eq!(summary["event_counts"]["click"], 1);
    assert_eq!(summary["event_counts"]["navigation"], 1);
    assert_eq!(summary["network_failure_count"], 1);
    assert_eq!(summary["status"], "active");
}

#[tokio::test]
async fn network_failures_group_by_domain() {
    let state = seeded_state();
    let response = call(
        &state,
        3,
        "get_network_failures",
        json!({"session_id": "s1", "group_by": "domain"}),
    )
    .await;
    let result = &response["result"];
    assert_eq!(result["groups"][0]["key"], "api.example.com");
    assert_eq!(result["groups"][0]["count"], 1);
    assert_eq!(result["limits_applied"]["group_by"], "domain");
}

#[tokio::test]
async fn correlation_prefers_causal_neighbors() {
    let state = seeded_state();
    let response = call(
        &state,
        4,
        "get_event_correlation",
        json!({"session_id": "s1", "event_id": "click-1", "window_seconds": 10}),
    )
    .await;
    let result = &response["result"];
    assert_eq!(result["anchor"]["event_id"], "click-1");

    let correlated = result["correlated"].as_array().unwrap();
    assert!(!correlated.is_empty());
    for item in correlated {
        let score = item["score"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&score));
    }
    // The network request 200ms after the click is causal
    let network = correlated
        .iter()
        .find(|item| item["kind"] == "network")
        .unwrap();
    assert_eq!(network["causal"], true);
}

#[tokio::test]
async fn explain_last_failure_finds_error() {
    let state = seeded_state();
    let response = call(
        &state,
        5,
        "explain_last_failure",
        json!({"session_id": "s1", "lookback_seconds": 300}),
    )
    .await;
    let result = &response["result"];
    assert_eq!(result["found"], true);
    assert_eq!(result["kind"], "error");
    assert_eq!(result["error"]["event_id"], "error-1");
    assert!(result["fingerprint"].as_str().unwrap().len() == 64);
    assert!(!result["context_events"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn heavy_tool_without_agent_reports_no_live_connection() {
    let state = seeded_state();
    let response = call(
        &state,
        6,
        "get_dom_subtree",
        json!({"session_id": "s1", "selector": "#app"}),
    )
    .await;
    let error = &response["error"];
    assert_eq!(error["data"]["kind"], "no_live_connection");
}

#[tokio::test]
async fn heavy_tool_round_trips_through_dispatcher() {
    let state = seeded_state();
    let queue = Arc::new(OutboundQueue::default());
    state.dispatcher.bind("s1", queue.clone());

    let handler = {
        let state = state.clone();
        tokio::spawn(async move {
            call(
                &state,
                7,
                "get_computed_styles",
                json!({"session_id": "s1", "selector": "#app"}),
            )
            .await
        })
    };

    let command_id = match queue.pop().await.unwrap() {
        browser_bridge::ingest::protocol::ServerMessage::CaptureCommand { command_id, .. } => {
            command_id
        }
        other => panic!("unexpected outbound message: {other:?}"),
    };
    state.dispatcher.handle_result(
        "s1",
        command_id,
        true,
        Some(json!({"display": "flex", "color": "rgb(0, 0, 0)"})),
        None,
    );

    let response = handler.await.unwrap();
    let result = &response["result"];
    assert_eq!(result["ok"], true);
    assert_eq!(result["styles"]["display"], "flex");
}

#[tokio::test]
async fn tool_errors_are_validation_tagged() {
    let state = seeded_state();

    let response = call(&state, 8, "get_recent_events", json!({})).await;
    assert_eq!(response["error"]["data"]["kind"], "validation");

    let response = call(
        &state,
        9,
        "get_recent_events",
        json!({"session_id": "missing"}),
    )
    .await;
    assert_eq!(response["error"]["data"]["kind"], "validation");
    assert!(response["error"]["message"]
        .as_str()
        .unwrap()
        .contains("unknown session"));
}

#[tokio::test]
async fn fingerprints_visible_across_sessions() {
    let state = seeded_state();
    state
        .store
        .upsert_fingerprint("s1", "hash-a", "boom", "stack", 1_000, 2)
        .unwrap();

    let response = call(&state, 10, "get_error_fingerprints", json!({})).await;
    let result = &response["result"];
    assert_eq!(result["ok"], true);
    let fingerprints = result["fingerprints"].as_array().unwrap();
    assert!(fingerprints.iter().any(|f| f["hash"] == "hash-a"));
}
