// Error fingerprinting
// Normalizes message + stack into a stable form, then digests it, so the
// same logical error groups across runs regardless of line numbers or
// bundler hashes

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// `:line:col` (or just `:line`) suffixes on stack frame locations. The
/// trailing delimiter is captured and kept so URL ports survive.
static LINE_COL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":\d+(?::\d+)?([)\s]|$)").expect("line/col pattern"));

/// Bundler chunk hashes embedded in pathnames, e.g. `app.3f9c2ab1.js`.
static CHUNK_HASH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.[0-9a-f]{8,}\.").expect("chunk hash pattern"));

/// `webpack://` and `webpack-internal://` scheme prefixes.
static WEBPACK_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"webpack(?:-internal)?://").expect("webpack prefix pattern"));

/// Filesystem-ish path segments, lowercased during normalization.
static PATHNAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9_./\\-]*[/\\][A-Za-z0-9_./\\-]+").expect("path pattern"));

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

/// Normalize one line of an error message or stack trace.
fn normalize_line(line: &str) -> String {
    let line = WEBPACK_PREFIX.replace_all(line, "");
    let line = LINE_COL.replace_all(&line, "${1}");
    let line = CHUNK_HASH.replace_all(&line, ".");
    let line = PATHNAME.replace_all(&line, |caps: &regex::Captures| {
        caps.get(0)
            .map(|m| m.as_str().to_lowercase())
            .unwrap_or_default()
    });
    WHITESPACE.replace_all(line.trim(), " ").into_owned()
}

/// Normalized form of a message, exposed for diagnostics and tests.
pub fn normalize_message(message: &str) -> String {
    normalize_line(message)
}

/// Normalized form of a stack trace.
pub fn normalize_stack(stack: &str) -> String {
    stack
        .lines()
        .map(normalize_line)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Stable hex digest grouping recurrences of the same logical error.
pub fn fingerprint(message: &str, stack: &str) -> String {
    let normalized = format!("{}\n{}", normalize_message(message), normalize_stack(stack));
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}
