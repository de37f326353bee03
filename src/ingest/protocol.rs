// Ingest wire protocol - shared structs for agent <-> bridge communication
// One JSON frame per WebSocket message, discriminated by a "type" field

use crate::allowlist::Allowlist;
use crate::store::{NewEvent, NewNetworkRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Heartbeat interval for server pings.
pub const PING_INTERVAL_SECS: u64 = 30;

/// Consecutive missed pongs that close the connection.
pub const MISSED_PONG_LIMIT: u32 = 2;

/// Upper bound for one inbound frame. Snapshot frames carry base64 PNGs, so
/// this is generous; anything larger is rejected before decoding.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Capture kinds the bridge can request from the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureKind {
    DomSubtree,
    DomDocument,
    ComputedStyles,
    LayoutMetrics,
    UiSnapshot,
}

impl std::fmt::Display for CaptureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CaptureKind::DomSubtree => "dom_subtree",
            CaptureKind::DomDocument => "dom_document",
            CaptureKind::ComputedStyles => "computed_styles",
            CaptureKind::LayoutMetrics => "layout_metrics",
            CaptureKind::UiSnapshot => "ui_snapshot",
        };
        f.write_str(name)
    }
}

/// Allowlist as it appears on the wire: either pre-split patterns or one raw
/// string the extension took straight from its options page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AllowlistWire {
    Patterns(Vec<String>),
    Raw(String),
}

impl AllowlistWire {
    pub fn to_allowlist(&self) -> Allowlist {
        match self {
            AllowlistWire::Raw(raw) => Allowlist::parse(raw),
            AllowlistWire::Patterns(patterns) => Allowlist::parse(&patterns.join(",")),
        }
    }
}

/// Snapshot record as submitted by the agent (WS frame or direct POST).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotWire {
    #[serde(default)]
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub trigger: Option<String>,
    #[serde(default)]
    pub trigger_event_id: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub dom: Option<DomWire>,
    #[serde(default)]
    pub styles: Option<Value>,
    #[serde(default)]
    pub style_mode: Option<String>,
    #[serde(default)]
    pub png_base64: Option<String>,
    /// Privacy profile requested for this capture (standard|strict)
    #[serde(default)]
    pub profile: Option<String>,
}

/// DOM channel of a snapshot: full serialized HTML and/or a cheap outline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomWire {
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub outline: Option<String>,
}

// ============================================================================
// Agent -> Bridge messages
// ============================================================================

/// Inbound frame from the extension agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    /// Bind this connection to a session, creating or refreshing it
    SessionStart {
        session_id: String,
        created_at: i64,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        safe_mode: bool,
        #[serde(default)]
        allowlist: Option<AllowlistWire>,
        #[serde(default)]
        snapshot_config: Option<Value>,
    },
    /// Partial update of the bound session's mirrored config
    SessionUpdate {
        session_id: String,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        safe_mode: Option<bool>,
        #[serde(default)]
        allowlist: Option<AllowlistWire>,
    },
    /// Close the session immediately, skipping the disconnect grace window
    SessionEnd { session_id: String },
    /// Batched telemetry events (up to 200 events or 2 seconds agent-side)
    EventBatch {
        session_id: String,
        events: Vec<NewEvent>,
    },
    /// Batched network request lifecycles
    NetworkBatch {
        session_id: String,
        records: Vec<NewNetworkRecord>,
    },
    /// A UI snapshot capture
    Snapshot {
        session_id: String,
        #[serde(flatten)]
        snapshot: SnapshotWire,
    },
    /// Result of a previously issued capture command
    CaptureResult {
        command_id: u64,
        ok: bool,
        #[serde(default)]
        data: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
    /// Heartbeat probe from the agent
    Ping,
    /// Heartbeat reply to a server ping
    Pong,
}

// ============================================================================
// Bridge -> Agent messages
// ============================================================================

/// Outbound frame to the extension agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// On-demand heavy capture command
    CaptureCommand {
        command_id: u64,
        session_id: String,
        kind: CaptureKind,
        payload: Value,
    },
    /// Acknowledgement of a persisted batch
    Ack {
        kind: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        inserted: Option<u64>,
    },
    /// Protocol-level rejection; the connection usually stays open
    Error {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// Heartbeat probe
    Ping,
    /// Heartbeat reply
    Pong,
}

impl ServerMessage {
    pub fn error(reason: &str, detail: Option<String>) -> Self {
        ServerMessage::Error {
            reason: reason.to_string(),
            detail,
        }
    }
}

/// Serialize a message to a JSON text frame
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

/// Deserialize a JSON text frame, enforcing the frame size limit
pub fn decode_frame<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T, String> {
    if text.len() > MAX_FRAME_BYTES {
        return Err(format!(
            "frame too large: {} bytes (max {})",
            text.len(),
            MAX_FRAME_BYTES
        ));
    }
    serde_json::from_str(text).map_err(|e| format!("malformed frame: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_start_roundtrip() {
        let frame = json!({
            "type": "session_start",
            "session_id": "s1",
            "created_at": 1_700_000_000_000i64,
            "safe_mode": true,
            "allowlist": "example.com, *.staging.example.com",
        })
        .to_string();

        let msg: AgentMessage = decode_frame(&frame).unwrap();
        if let AgentMessage::SessionStart {
            session_id,
            safe_mode,
            allowlist,
            ..
        } = msg
        {
            assert_eq!(session_id, "s1");
            assert!(safe_mode);
            let parsed = allowlist.unwrap().to_allowlist();
            assert_eq!(parsed.patterns().len(), 2);
        } else {
            panic!("Wrong variant");
        }
    }

    #[test]
    fn test_allowlist_accepts_both_wire_shapes() {
        let raw: AllowlistWire = serde_json::from_value(json!("a.com,b.com")).unwrap();
        assert_eq!(raw.to_allowlist().patterns().len(), 2);

        let list: AllowlistWire = serde_json::from_value(json!(["a.com", "*.B.com"])).unwrap();
        assert_eq!(
            list.to_allowlist().patterns(),
            &["a.com".to_string(), "*.b.com".to_string()]
        );
    }

    #[test]
    fn test_capture_command_wire_shape() {
        let msg = ServerMessage::CaptureCommand {
            command_id: 7,
            session_id: "s1".to_string(),
            kind: CaptureKind::DomSubtree,
            payload: json!({"selector": "#app", "max_depth": 3}),
        };
        let encoded = encode_frame(&msg).unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["type"], "capture_command");
        assert_eq!(value["kind"], "dom_subtree");
        assert_eq!(value["command_id"], 7);
    }

    #[test]
    fn test_capture_result_roundtrip() {
        let frame = json!({
            "type": "capture_result",
            "command_id": 7,
            "ok": true,
            "data": {"html": "<div/>"},
        })
        .to_string();
        let msg: AgentMessage = decode_frame(&frame).unwrap();
        match msg {
            AgentMessage::CaptureResult {
                command_id,
                ok,
                data,
                error,
            } => {
                assert_eq!(command_id, 7);
                assert!(ok);
                assert_eq!(data.unwrap()["html"], "<div/>");
                assert!(error.is_none());
            }
            other => panic!("Wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let huge = "x".repeat(MAX_FRAME_BYTES + 1);
        let err = decode_frame::<AgentMessage>(&huge).unwrap_err();
        assert!(err.contains("frame too large"));
    }

    #[test]
    fn test_snapshot_frame_flattens() {
        let frame = json!({
            "type": "snapshot",
            "session_id": "s1",
            "trigger": "click",
            "url": "https://example.com",
            "dom": {"html": "<html></html>"},
        })
        .to_string();
        let msg: AgentMessage = decode_frame(&frame).unwrap();
        match msg {
            AgentMessage::Snapshot {
                session_id,
                snapshot,
            } => {
                assert_eq!(session_id, "s1");
                assert_eq!(snapshot.trigger.as_deref(), Some("click"));
                assert_eq!(snapshot.dom.unwrap().html.unwrap(), "<html></html>");
            }
            other => panic!("Wrong variant: {other:?}"),
        }
    }
}
