// Tool registry: names, descriptions, input schemas, and dispatch

use super::schema::{DefaultVal, Field, FieldType, ToolSchema};
use super::tools::{heavy, query, snapshots};
use crate::error::{BridgeError, ErrorKind};
use crate::ingest::AppState;
use serde_json::{json, Value};

/// One registered tool.
pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    pub schema: ToolSchema,
}

const SESSION_ID: Field = Field::required("session_id", FieldType::String);
const LIMIT_100: Field = Field::optional(
    "limit",
    FieldType::Integer { min: 1, max: 100 },
    Some(DefaultVal::Int(20)),
);
const LIMIT_500: Field = Field::optional(
    "limit",
    FieldType::Integer { min: 1, max: 500 },
    Some(DefaultVal::Int(50)),
);
const OFFSET: Field = Field::optional(
    "offset",
    FieldType::Integer {
        min: 0,
        max: 1_000_000,
    },
    Some(DefaultVal::Int(0)),
);
const SINCE_MINUTES: Field = Field::optional(
    "since_minutes",
    FieldType::Integer { min: 1, max: 1440 },
    Some(DefaultVal::Int(60)),
);

/// Every tool the bridge registers, in the order `list_tools` reports them.
pub const TOOLS: &[ToolDef] = &[
    ToolDef {
        name: "list_sessions",
        description: "List capture sessions seen within a recent window",
        schema: ToolSchema {
            fields: &[SINCE_MINUTES, LIMIT_100, OFFSET],
        },
    },
    ToolDef {
        name: "get_session_summary",
        description: "Aggregate counts and timestamps for one session",
        schema: ToolSchema {
            fields: &[SESSION_ID],
        },
    },
    ToolDef {
        name: "get_recent_events",
        description: "Recent telemetry events for a session, newest first",
        schema: ToolSchema {
            fields: &[SESSION_ID, SINCE_MINUTES, LIMIT_500, OFFSET],
        },
    },
    ToolDef {
        name: "get_navigation_history",
        description: "Chronological navigation events for a session",
        schema: ToolSchema {
            fields: &[SESSION_ID, LIMIT_500, OFFSET],
        },
    },
    ToolDef {
        name: "get_console_events",
        description: "Console output events for a session, newest first",
        schema: ToolSchema {
            fields: &[SESSION_ID, LIMIT_500, OFFSET],
        },
    },
    ToolDef {
        name: "get_error_fingerprints",
        description: "Deduplicated error groups, per session or across all",
        schema: ToolSchema {
            fields: &[
                Field::optional("session_id", FieldType::String, None),
                LIMIT_100,
                OFFSET,
            ],
        },
    },
    ToolDef {
        name: "get_network_failures",
        description: "Failed network requests grouped by url, error type, or domain",
        schema: ToolSchema {
            fields: &[
                SESSION_ID,
                SINCE_MINUTES,
                LIMIT_500,
                Field::optional(
                    "group_by",
                    FieldType::Enum(&["url", "error_type", "domain"]),
                    Some(DefaultVal::Str("url")),
                ),
            ],
        },
    },
    ToolDef {
        name: "get_element_refs",
        description: "Element references recorded for a CSS selector",
        schema: ToolSchema {
            fields: &[
                SESSION_ID,
                Field::required("selector", FieldType::String),
                LIMIT_100,
                OFFSET,
            ],
        },
    },
    ToolDef {
        name: "get_dom_subtree",
        description: "Live DOM subtree capture with depth and byte limits",
        schema: ToolSchema {
            fields: &[
                SESSION_ID,
                Field::required("selector", FieldType::String),
                Field::optional(
                    "max_depth",
                    FieldType::Integer { min: 1, max: 10 },
                    Some(DefaultVal::Int(3)),
                ),
                Field::optional(
                    "max_bytes",
                    FieldType::Integer {
                        min: 1_000,
                        max: 1_000_000,
                    },
                    Some(DefaultVal::Int(50_000)),
                ),
            ],
        },
    },
    ToolDef {
        name: "get_dom_document",
        description: "Live full-document capture as HTML or an outline",
        schema: ToolSchema {
            fields: &[
                SESSION_ID,
                Field::optional(
                    "mode",
                    FieldType::Enum(&["outline", "html"]),
                    Some(DefaultVal::Str("outline")),
                ),
            ],
        },
    },
    ToolDef {
        name: "get_computed_styles",
        description: "Live computed styles for a selector",
        schema: ToolSchema {
            fields: &[
                SESSION_ID,
                Field::required("selector", FieldType::String),
                Field::optional(
                    "style_mode",
                    FieldType::Enum(&["computed-lite", "computed-full"]),
                    Some(DefaultVal::Str("computed-lite")),
                ),
            ],
        },
    },
    ToolDef {
        name: "get_layout_metrics",
        description: "Live layout metrics for the page or a selector",
        schema: ToolSchema {
            fields: &[SESSION_ID, Field::optional("selector", FieldType::String, None)],
        },
    },
    ToolDef {
        name: "capture_ui_snapshot",
        description: "Trigger a UI snapshot capture and persist it",
        schema: ToolSchema {
            fields: &[
                SESSION_ID,
                Field::optional("selector", FieldType::String, None),
                Field::optional("include_png", FieldType::Bool, Some(DefaultVal::Bool(false))),
                Field::optional(
                    "profile",
                    FieldType::Enum(&["standard", "strict"]),
                    Some(DefaultVal::Str("standard")),
                ),
            ],
        },
    },
    ToolDef {
        name: "explain_last_failure",
        description: "Most recent failure with correlated context",
        schema: ToolSchema {
            fields: &[
                SESSION_ID,
                Field::optional(
                    "lookback_seconds",
                    FieldType::Integer { min: 1, max: 300 },
                    Some(DefaultVal::Int(30)),
                ),
            ],
        },
    },
    ToolDef {
        name: "get_event_correlation",
        description: "Events and requests correlated around an anchor event",
        schema: ToolSchema {
            fields: &[
                SESSION_ID,
                Field::required("event_id", FieldType::String),
                Field::optional(
                    "window_seconds",
                    FieldType::Integer { min: 1, max: 60 },
                    Some(DefaultVal::Int(5)),
                ),
            ],
        },
    },
    ToolDef {
        name: "list_snapshots",
        description: "Stored snapshot metadata for a session",
        schema: ToolSchema {
            fields: &[SESSION_ID, LIMIT_100, OFFSET],
        },
    },
    ToolDef {
        name: "get_snapshot_for_event",
        description: "Snapshot linked to an event, or the nearest in time",
        schema: ToolSchema {
            fields: &[
                SESSION_ID,
                Field::required("event_id", FieldType::String),
                Field::optional(
                    "max_delta_ms",
                    FieldType::Integer { min: 1, max: 60_000 },
                    Some(DefaultVal::Int(5_000)),
                ),
            ],
        },
    },
    ToolDef {
        name: "get_snapshot_asset",
        description: "Chunked retrieval of a snapshot's binary asset",
        schema: ToolSchema {
            fields: &[
                Field::required("snapshot_id", FieldType::String),
                Field::optional(
                    "offset",
                    FieldType::Integer {
                        min: 0,
                        max: i64::MAX,
                    },
                    Some(DefaultVal::Int(0)),
                ),
                Field::optional(
                    "max_bytes",
                    FieldType::Integer {
                        min: 1,
                        max: 262_144,
                    },
                    Some(DefaultVal::Int(65_536)),
                ),
                Field::optional(
                    "encoding",
                    FieldType::Enum(&["raw", "base64"]),
                    Some(DefaultVal::Str("base64")),
                ),
            ],
        },
    },
];

/// Schema lookup by tool name.
pub fn schema_of(name: &str) -> Option<ToolSchema> {
    TOOLS.iter().find(|t| t.name == name).map(|t| t.schema)
}

/// `list_tools` payload.
pub fn list_tools() -> Value {
    let tools: Vec<Value> = TOOLS
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.schema.describe(),
            })
        })
        .collect();
    json!({ "tools": tools })
}

/// Validate and dispatch one `call_tool` invocation.
pub async fn call_tool(
    state: &AppState,
    name: &str,
    arguments: &Value,
) -> Result<Value, BridgeError> {
    let Some(def) = TOOLS.iter().find(|t| t.name == name) else {
        return Err(BridgeError::new(
            ErrorKind::UnknownTool,
            format!("unknown tool {name}"),
        ));
    };
    let args = def.schema.validate(arguments)?;

    match name {
        "list_sessions" => query::list_sessions(state, &args).await,
        "get_session_summary" => query::get_session_summary(state, &args).await,
        "get_recent_events" => query::get_recent_events(state, &args).await,
        "get_navigation_history" => query::get_navigation_history(state, &args).await,
        "get_console_events" => query::get_console_events(state, &args).await,
        "get_error_fingerprints" => query::get_error_fingerprints(state, &args).await,
        "get_network_failures" => query::get_network_failures(state, &args).await,
        "get_element_refs" => query::get_element_refs(state, &args).await,
        "get_dom_subtree" => heavy::get_dom_subtree(state, &args).await,
        "get_dom_document" => heavy::get_dom_document(state, &args).await,
        "get_computed_styles" => heavy::get_computed_styles(state, &args).await,
        "get_layout_metrics" => heavy::get_layout_metrics(state, &args).await,
        "capture_ui_snapshot" => heavy::capture_ui_snapshot(state, &args).await,
        "explain_last_failure" => query::explain_last_failure(state, &args).await,
        "get_event_correlation" => query::get_event_correlation(state, &args).await,
        "list_snapshots" => snapshots::list_snapshots(state, &args).await,
        "get_snapshot_for_event" => snapshots::get_snapshot_for_event(state, &args).await,
        "get_snapshot_asset" => snapshots::get_snapshot_asset(state, &args).await,
        _ => Err(BridgeError::new(
            ErrorKind::UnknownTool,
            format!("unknown tool {name}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tool_dispatches() {
        // The dispatch match and the table must stay in lockstep
        let listed = list_tools();
        let names: Vec<&str> = listed["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names.len(), 18);
        assert!(names.contains(&"get_dom_subtree"));
        assert!(names.contains(&"get_snapshot_asset"));
    }

    #[test]
    fn schemas_describe_bounds() {
        let listed = list_tools();
        let subtree = listed["tools"]
            .as_array()
            .unwrap()
            .iter()
            .find(|t| t["name"] == "get_dom_subtree")
            .unwrap();
        let depth = &subtree["input_schema"]["properties"]["max_depth"];
        assert_eq!(depth["minimum"], 1);
        assert_eq!(depth["maximum"], 10);
        assert_eq!(depth["default"], 3);
    }
}
