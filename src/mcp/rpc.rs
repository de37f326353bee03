// JSON-RPC 2.0 runtime over standard streams
// Newline-delimited frames on stdin/stdout; methods list_tools and call_tool

use super::registry;
use crate::error::{BridgeError, ErrorKind};
use crate::ingest::AppState;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// One parsed request frame.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Absent for notifications, which get no response
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

fn success(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn failure(id: Value, err: &BridgeError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": err.kind.rpc_code(),
            "message": err.message,
            "data": { "kind": err.kind.as_str() },
        },
    })
}

fn parse_failure(detail: String) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": null,
        "error": {
            "code": -32700,
            "message": format!("parse error: {detail}"),
            "data": { "kind": ErrorKind::Validation.as_str() },
        },
    })
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Handle one request. Returns `None` for notifications.
pub async fn handle_request(state: &AppState, request: JsonRpcRequest) -> Option<Value> {
    let id = request.id.clone()?;

    let outcome = match request.method.as_str() {
        "list_tools" => Ok(registry::list_tools()),
        "call_tool" => {
            let params: Result<CallToolParams, _> =
                serde_json::from_value(request.params.clone().unwrap_or(Value::Null));
            match params {
                Ok(params) => registry::call_tool(state, &params.name, &params.arguments).await,
                Err(err) => Err(BridgeError::validation(format!(
                    "params: expected {{name, arguments}}: {err}"
                ))),
            }
        }
        other => Err(BridgeError::validation(format!("unknown method {other}"))),
    };

    Some(match outcome {
        Ok(result) => success(id, result),
        Err(err) => failure(id, &err),
    })
}

/// Read frames from stdin until EOF, answering on stdout.
///
/// Returning means the MCP host closed its end; the caller propagates
/// shutdown from there.
pub async fn run_stdio_loop(state: Arc<AppState>) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(stdin).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => {
                let method = request.method.clone();
                let response = handle_request(&state, request).await;
                tracing::debug!(method, answered = response.is_some(), "handled mcp frame");
                response
            }
            Err(err) => Some(parse_failure(err.to_string())),
        };

        if let Some(response) = response {
            let mut frame = serde_json::to_vec(&response)?;
            frame.push(b'\n');
            stdout.write_all(&frame).await?;
            stdout.flush().await?;
        }
    }

    tracing::info!("mcp host closed stdin; beginning shutdown");
    Ok(())
}
