//! Redaction policy for persisted and returned records.
//!
//! Three layers: a pattern rule engine for strings and structured values
//! ([`rules`]), the session safe-mode payload policy ([`safe_mode`]), and
//! snapshot-specific masking with privacy profiles ([`snapshot`]).

mod rules;
mod safe_mode;
mod snapshot;

pub use rules::{redact_object, redact_string, ObjectRedaction, RedactionSummary, StringRedaction};
pub use safe_mode::{apply_safe_mode, SAFE_MODE_MARKER};
pub use snapshot::{
    redact_snapshot_dom, selector_is_sensitive, SnapshotPolicy, SnapshotProfile,
    SnapshotRedactionOutcome, SNAPSHOT_MARKER,
};
