// Error taxonomy shared by the ingest server and the MCP runtime
// Kinds carry stable wire strings; messages stay human-readable

use serde::{Deserialize, Serialize};

/// Stable error kinds surfaced over the wire.
///
/// HTTP ingest routes report these inside `{ok: false, error}` bodies; MCP
/// tool failures carry them as `data.kind` on the JSON-RPC error object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Schema violation in MCP input or HTTP body
    Validation,
    /// Requested tool not present in the registry
    UnknownTool,
    /// Heavy capture requested without a bound agent
    NoLiveConnection,
    /// Capture did not complete before the deadline
    Timeout,
    /// Storage exhausted its retries
    PersistenceFailed,
    /// A record was dropped by safe-mode policy
    RedactionBlocked,
    /// Waiter resolved because the agent connection went away
    ConnectionLost,
    /// Waiter resolved because the MCP host cancelled the call
    Cancelled,
    /// Anything else
    Internal,
}

impl ErrorKind {
    /// Stable string form used in wire payloads and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::UnknownTool => "unknown_tool",
            ErrorKind::NoLiveConnection => "no_live_connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::PersistenceFailed => "persistence_failed",
            ErrorKind::RedactionBlocked => "redaction_blocked",
            ErrorKind::ConnectionLost => "connection_lost",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }

    /// JSON-RPC error code for this kind.
    ///
    /// -32602 is the standard invalid-params code; the rest live in the
    /// server-defined range.
    pub fn rpc_code(self) -> i64 {
        match self {
            ErrorKind::Validation => -32602,
            ErrorKind::UnknownTool => -32601,
            ErrorKind::NoLiveConnection => -32010,
            ErrorKind::Timeout => -32011,
            ErrorKind::PersistenceFailed => -32012,
            ErrorKind::RedactionBlocked => -32013,
            ErrorKind::ConnectionLost => -32014,
            ErrorKind::Cancelled => -32015,
            ErrorKind::Internal => -32603,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type carried across component boundaries.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct BridgeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl BridgeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<crate::store::StoreError> for BridgeError {
    fn from(err: crate::store::StoreError) -> Self {
        Self::new(ErrorKind::PersistenceFailed, err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("serialization error: {err}"))
    }
}
