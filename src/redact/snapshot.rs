// Snapshot-specific masking with privacy profiles
// Masks form state inside captured DOM, rewrites sensitive attributes, and
// blocks PNG capture under strict safe mode

use once_cell::sync::Lazy;
use regex::Regex;

/// Marker written in place of a DOM payload rooted at a sensitive selector.
pub const SNAPSHOT_MARKER: &str = "[REDACTED_SNAPSHOT]";

/// Privacy profile applied on top of the session's safe-mode flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotProfile {
    #[default]
    Standard,
    Strict,
}

/// Inputs deciding how a snapshot record is masked.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotPolicy {
    pub safe_mode: bool,
    pub profile: SnapshotProfile,
}

impl SnapshotPolicy {
    /// PNG capture is blocked when safe mode is combined with the strict
    /// profile.
    pub fn blocks_png(&self) -> bool {
        self.safe_mode && self.profile == SnapshotProfile::Strict
    }
}

/// What the masking pass did, recorded in the snapshot's redaction metadata.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SnapshotRedactionOutcome {
    pub dom_replaced: bool,
    pub png_blocked: bool,
    pub reasons: Vec<String>,
}

static SENSITIVE_SELECTOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|secret|auth|session|email|card|cvv|cvc|ssn|iban|payment)")
        .expect("failed to compile sensitive selector pattern")
});

static INPUT_VALUE_DQ: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(<input\b[^>]*\bvalue\s*=\s*")[^"]*(")"#).expect("input value pattern")
});
static INPUT_VALUE_SQ: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(<input\b[^>]*\bvalue\s*=\s*')[^']*(')").expect("input value pattern")
});
static TEXTAREA_BODY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)(<textarea\b[^>]*>).*?(</textarea>)").expect("textarea pattern")
});
static SENSITIVE_ATTR_DQ: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(\bdata-(?:token|auth|secret|session|key)\s*=\s*")[^"]*(")"#)
        .expect("sensitive attribute pattern")
});
static SENSITIVE_ATTR_SQ: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\bdata-(?:token|auth|secret|session|key)\s*=\s*')[^']*(')")
        .expect("sensitive attribute pattern")
});

/// Whether a CSS selector names a sensitive subtree.
pub fn selector_is_sensitive(selector: &str) -> bool {
    SENSITIVE_SELECTOR.is_match(selector)
}

/// Mask a captured DOM payload according to the policy.
///
/// A sensitive selector replaces the whole payload with [`SNAPSHOT_MARKER`].
/// Otherwise input `value` attributes are masked, textarea bodies replaced,
/// and sensitive `data-*` attribute values rewritten.
pub fn redact_snapshot_dom(
    html: &str,
    selector: Option<&str>,
    policy: &SnapshotPolicy,
) -> (String, SnapshotRedactionOutcome) {
    let mut outcome = SnapshotRedactionOutcome::default();

    if policy.blocks_png() {
        outcome.png_blocked = true;
        outcome.reasons.push("png_blocked_strict_safe_mode".into());
    }

    if let Some(selector) = selector {
        if selector_is_sensitive(selector) {
            outcome.dom_replaced = true;
            outcome.reasons.push("sensitive_selector".into());
            return (SNAPSHOT_MARKER.to_string(), outcome);
        }
    }

    let mut masked = html.to_string();

    let with_inputs = INPUT_VALUE_DQ.replace_all(&masked, "${1}[REDACTED]${2}");
    let with_inputs = INPUT_VALUE_SQ
        .replace_all(&with_inputs, "${1}[REDACTED]${2}")
        .into_owned();
    if with_inputs != masked {
        outcome.reasons.push("input_values_masked".into());
    }
    masked = with_inputs;

    let with_textareas = TEXTAREA_BODY
        .replace_all(&masked, "${1}[REDACTED]${2}")
        .into_owned();
    if with_textareas != masked {
        outcome.reasons.push("textarea_bodies_replaced".into());
    }
    masked = with_textareas;

    let with_attrs = SENSITIVE_ATTR_DQ.replace_all(&masked, "${1}[REDACTED]${2}");
    let with_attrs = SENSITIVE_ATTR_SQ
        .replace_all(&with_attrs, "${1}[REDACTED]${2}")
        .into_owned();
    if with_attrs != masked {
        outcome.reasons.push("sensitive_attributes_rewritten".into());
    }
    masked = with_attrs;

    (masked, outcome)
}
