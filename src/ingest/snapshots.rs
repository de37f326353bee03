// Snapshot ingest: limits, policy enforcement, masking, persistence
// Shared by the WebSocket frame path and the direct POST path

use super::protocol::SnapshotWire;
use crate::redact::{redact_snapshot_dom, SnapshotPolicy, SnapshotProfile};
use crate::store::{
    SessionRow, SnapshotRow, SnapshotTrigger, Store, StoreResult, StyleMode, Truncation,
};
use base64::Engine;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hard ceiling for a stored DOM payload.
pub const MAX_DOM_BYTES: usize = 512 * 1024;

/// Error string mandated for DOM byte-limit rejections.
pub const DOM_LIMIT_ERROR: &str = "Snapshot dom payload exceeds max bytes";

static SNAPSHOT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Snapshot policy mirrored from the extension at session start.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub enabled: bool,
    pub require_opt_in: bool,
    pub profile: SnapshotProfile,
    pub style_mode: String,
    pub png_policy: PngPolicy,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            require_opt_in: false,
            profile: SnapshotProfile::Standard,
            style_mode: "computed-lite".to_string(),
            png_policy: PngPolicy::default(),
        }
    }
}

/// PNG capture budget for one session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PngPolicy {
    pub max_images_per_session: i64,
    pub max_bytes_per_image: i64,
    pub min_capture_interval_ms: i64,
}

impl Default for PngPolicy {
    fn default() -> Self {
        Self {
            max_images_per_session: 20,
            max_bytes_per_image: 2 * 1024 * 1024,
            min_capture_interval_ms: 1_000,
        }
    }
}

impl SnapshotConfig {
    pub fn for_session(session: &SessionRow) -> Self {
        session
            .snapshot_config
            .as_ref()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default()
    }
}

/// How DOM byte-limit overruns are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomLimitMode {
    /// Reject the whole snapshot (direct POST path)
    Reject,
    /// Substitute an outline and set `truncation.dom` (WS frame path)
    Substitute,
}

/// Outcome of processing one inbound snapshot.
#[derive(Debug)]
pub enum SnapshotIngest {
    Stored { snapshot_id: String },
    Rejected { error: String },
}

/// Validate, mask, and persist one snapshot record.
pub fn process_snapshot(
    store: &Store,
    session: &SessionRow,
    wire: SnapshotWire,
    limit_mode: DomLimitMode,
) -> StoreResult<SnapshotIngest> {
    let config = SnapshotConfig::for_session(session);
    if !config.enabled {
        return Ok(SnapshotIngest::Rejected {
            error: "Snapshot capture is disabled for this session".to_string(),
        });
    }

    let timestamp = wire
        .timestamp
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
    let snapshot_id = wire.snapshot_id.clone().unwrap_or_else(|| {
        format!(
            "snap-{}-{}",
            timestamp,
            SNAPSHOT_SEQ.fetch_add(1, Ordering::Relaxed)
        )
    });

    let profile = match wire.profile.as_deref() {
        Some("strict") => SnapshotProfile::Strict,
        Some(_) => SnapshotProfile::Standard,
        None => config.profile,
    };
    let policy = SnapshotPolicy {
        safe_mode: session.safe_mode,
        profile,
    };

    let mut truncation = Truncation::default();
    let mut redaction_meta = None;

    // DOM channel
    let (dom_payload, dom_mode) = match wire.dom.as_ref().and_then(|d| d.html.as_deref()) {
        Some(html) if html.len() > MAX_DOM_BYTES => match limit_mode {
            DomLimitMode::Reject => {
                return Ok(SnapshotIngest::Rejected {
                    error: DOM_LIMIT_ERROR.to_string(),
                });
            }
            DomLimitMode::Substitute => {
                truncation.dom = true;
                let outline = wire
                    .dom
                    .as_ref()
                    .and_then(|d| d.outline.clone())
                    .unwrap_or_else(|| crate::outline::outline_from_html(html, 4));
                (Some(outline), true)
            }
        },
        Some(html) => {
            let (masked, outcome) = redact_snapshot_dom(html, wire.selector.as_deref(), &policy);
            redaction_meta = Some(serde_json::to_value(&outcome)?);
            (Some(masked), true)
        }
        None => {
            let outline = wire.dom.as_ref().and_then(|d| d.outline.clone());
            let has_dom = outline.is_some();
            (outline, has_dom)
        }
    };

    // PNG channel
    let mut png_bytes: Option<Vec<u8>> = None;
    let png_requested = wire.png_base64.is_some();
    if let Some(encoded) = wire.png_base64.as_deref() {
        if policy.blocks_png() {
            truncation.png = true;
        } else if store.png_count_for_session(&session.session_id)?
            >= config.png_policy.max_images_per_session
        {
            truncation.png = true;
        } else if too_soon(store, session, timestamp, &config)? {
            truncation.png = true;
        } else {
            match base64::engine::general_purpose::STANDARD.decode(encoded) {
                Ok(bytes) if bytes.len() as i64 > config.png_policy.max_bytes_per_image => {
                    truncation.png = true;
                }
                Ok(bytes) => png_bytes = Some(bytes),
                Err(_) => {
                    return Ok(SnapshotIngest::Rejected {
                        error: "Snapshot png payload is not valid base64".to_string(),
                    });
                }
            }
        }
    }

    let row = SnapshotRow {
        snapshot_id: snapshot_id.clone(),
        session_id: session.session_id.clone(),
        timestamp,
        trigger: SnapshotTrigger::parse(wire.trigger.as_deref().unwrap_or("manual")),
        trigger_event_id: wire.trigger_event_id,
        selector: wire.selector,
        url: wire
            .url
            .or_else(|| session.url.clone())
            .unwrap_or_default(),
        dom_mode,
        png_mode: png_requested,
        style_mode: StyleMode::parse(wire.style_mode.as_deref().unwrap_or(&config.style_mode)),
        dom_payload,
        styles_payload: wire.styles,
        truncation,
        redaction: redaction_meta,
        png_asset_id: None,
    };
    store.insert_snapshot(&row)?;

    if let Some(bytes) = png_bytes {
        store.insert_snapshot_asset(&snapshot_id, &bytes)?;
    }

    Ok(SnapshotIngest::Stored { snapshot_id })
}

fn too_soon(
    store: &Store,
    session: &SessionRow,
    timestamp: i64,
    config: &SnapshotConfig,
) -> StoreResult<bool> {
    let Some(last) = store.last_snapshot_at(&session.session_id)? else {
        return Ok(false);
    };
    Ok(timestamp - last < config.png_policy.min_capture_interval_ms)
}
