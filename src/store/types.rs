// Typed rows and enums shared by the store, the ingest pipeline, and the
// MCP query handlers

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Closed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "closed" => SessionStatus::Closed,
            _ => SessionStatus::Active,
        }
    }
}

/// One logical capture window bound to a single extension agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub session_id: String,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub safe_mode: bool,
    pub allowlist: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_config: Option<Value>,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
}

/// Aggregate view returned by `get_session_summary`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    #[serde(flatten)]
    pub session: SessionRow,
    pub event_counts: std::collections::BTreeMap<String, i64>,
    pub network_failure_count: i64,
    pub fingerprint_count: i64,
    pub snapshot_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_event_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<i64>,
}

/// Non-network, non-snapshot telemetry record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRow {
    pub event_id: String,
    pub session_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: i64,
    pub data: Value,
}

/// Event types accepted on the wire. Anything else is stored as `custom`.
pub const EVENT_TYPES: &[&str] = &[
    "navigation",
    "console",
    "error",
    "click",
    "scroll",
    "input",
    "change",
    "submit",
    "focus",
    "blur",
    "keydown",
    "ui",
    "element_ref",
    "custom",
];

/// Normalize a wire event type to a known value.
pub fn normalize_event_type(raw: &str) -> &str {
    if EVENT_TYPES.contains(&raw) {
        raw
    } else {
        "custom"
    }
}

/// One observed request lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRow {
    pub network_id: String,
    pub session_id: String,
    pub timestamp: i64,
    pub method: String,
    pub url: String,
    /// 0 when the request failed before a response arrived
    pub status: i64,
    pub duration_ms: i64,
    pub error_type: NetworkErrorType,
}

/// Failure classification for a network record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorType {
    Timeout,
    Cors,
    Dns,
    Blocked,
    HttpError,
    None,
}

impl NetworkErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkErrorType::Timeout => "timeout",
            NetworkErrorType::Cors => "cors",
            NetworkErrorType::Dns => "dns",
            NetworkErrorType::Blocked => "blocked",
            NetworkErrorType::HttpError => "http_error",
            NetworkErrorType::None => "none",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "timeout" => NetworkErrorType::Timeout,
            "cors" => NetworkErrorType::Cors,
            "dns" => NetworkErrorType::Dns,
            "blocked" => NetworkErrorType::Blocked,
            "http_error" => NetworkErrorType::HttpError,
            _ => NetworkErrorType::None,
        }
    }

    pub fn is_failure(self) -> bool {
        self != NetworkErrorType::None
    }
}

/// Deduplicating aggregate over error events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintRow {
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub count: i64,
    pub first_seen: i64,
    pub last_seen: i64,
    pub sample_message: String,
    pub sample_stack: String,
}

/// What triggered a snapshot capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotTrigger {
    Click,
    Manual,
    Navigation,
    Error,
}

impl SnapshotTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotTrigger::Click => "click",
            SnapshotTrigger::Manual => "manual",
            SnapshotTrigger::Navigation => "navigation",
            SnapshotTrigger::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "click" => SnapshotTrigger::Click,
            "navigation" => SnapshotTrigger::Navigation,
            "error" => SnapshotTrigger::Error,
            _ => SnapshotTrigger::Manual,
        }
    }
}

/// How computed styles were captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StyleMode {
    #[default]
    #[serde(rename = "computed-lite")]
    ComputedLite,
    #[serde(rename = "computed-full")]
    ComputedFull,
}

impl StyleMode {
    pub fn as_str(self) -> &'static str {
        match self {
            StyleMode::ComputedLite => "computed-lite",
            StyleMode::ComputedFull => "computed-full",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "computed-full" => StyleMode::ComputedFull,
            _ => StyleMode::ComputedLite,
        }
    }
}

/// Per-channel truncation flags on a stored snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Truncation {
    pub dom: bool,
    pub styles: bool,
    pub png: bool,
}

/// A UI capture at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub snapshot_id: String,
    pub session_id: String,
    pub timestamp: i64,
    pub trigger: SnapshotTrigger,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    pub url: String,
    pub dom_mode: bool,
    pub png_mode: bool,
    pub style_mode: StyleMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dom_payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub styles_payload: Option<Value>,
    pub truncation: Truncation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redaction: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub png_asset_id: Option<i64>,
}

/// Snapshot listing entry: everything but the payload bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub snapshot_id: String,
    pub session_id: String,
    pub timestamp: i64,
    pub trigger: SnapshotTrigger,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    pub url: String,
    pub dom_mode: bool,
    pub png_mode: bool,
    pub style_mode: StyleMode,
    pub truncation: Truncation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub png_asset_id: Option<i64>,
}

/// One chunk of a stored snapshot asset.
#[derive(Debug, Clone)]
pub struct AssetChunk {
    pub asset_id: i64,
    pub snapshot_id: String,
    pub kind: String,
    pub offset: u64,
    pub data: Vec<u8>,
    pub size_bytes: u64,
}
