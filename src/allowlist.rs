// Host allowlist parsing and URL matching
// Entries are bare hosts with an optional leading "*." wildcard

use serde::{Deserialize, Serialize};

/// Parsed set of host patterns attached to a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allowlist(Vec<String>);

impl Allowlist {
    /// Parse raw allowlist text into normalized host patterns.
    ///
    /// Input entries are separated by commas or newlines. Each entry is
    /// trimmed and lowercased; full URLs are reduced to their host. A
    /// leading `*.` wildcard is preserved. Empty entries and entries with
    /// no recognizable host are dropped.
    pub fn parse(raw: &str) -> Self {
        let mut patterns = Vec::new();
        for entry in raw.split(|c| c == ',' || c == '\n') {
            let entry = entry.trim().to_lowercase();
            if entry.is_empty() {
                continue;
            }
            if let Some(host) = normalize_entry(&entry) {
                if !patterns.contains(&host) {
                    patterns.push(host);
                }
            }
        }
        Self(patterns)
    }

    /// Build from already-normalized patterns (e.g. a persisted session row).
    pub fn from_patterns(patterns: Vec<String>) -> Self {
        Self(patterns)
    }

    pub fn patterns(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the given URL's host matches any pattern.
    ///
    /// Plain entries match the host exactly. `*.suffix` entries match the
    /// bare suffix and any subdomain of it.
    pub fn matches_url(&self, url: &str) -> bool {
        let Some(host) = host_of(url) else {
            return false;
        };
        self.matches_host(&host)
    }

    pub fn matches_host(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        self.0.iter().any(|pattern| {
            if let Some(suffix) = pattern.strip_prefix("*.") {
                host == suffix || host.ends_with(&format!(".{}", suffix))
            } else {
                host == *pattern
            }
        })
    }
}

/// Reduce one raw entry to a host pattern, or None when no host is present.
fn normalize_entry(entry: &str) -> Option<String> {
    if let Some(rest) = entry.strip_prefix("*.") {
        return normalize_entry(rest).map(|host| format!("*.{}", host));
    }
    if entry.contains("://") {
        return host_of(entry);
    }
    // Bare host, possibly with a path suffix
    let host = entry.split('/').next().unwrap_or(entry);
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_separators_and_noise() {
        let list =
            Allowlist::parse(" Example.com\n*.Staging.Example.com,https://api.example.com/path ");
        assert_eq!(
            list.patterns(),
            &[
                "example.com".to_string(),
                "*.staging.example.com".to_string(),
                "api.example.com".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_drops_empty_and_duplicates() {
        let list = Allowlist::parse("a.com,,a.com,\n  \n");
        assert_eq!(list.patterns(), &["a.com".to_string()]);
    }

    #[test]
    fn test_url_matching() {
        let list = Allowlist::from_patterns(vec![
            "example.com".to_string(),
            "*.staging.example.com".to_string(),
        ]);

        assert!(list.matches_url("https://example.com/home"));
        assert!(list.matches_url("https://foo.staging.example.com/app"));
        assert!(!list.matches_url("https://other-site.dev"));
    }

    #[test]
    fn test_plain_entry_does_not_match_subdomain() {
        let list = Allowlist::from_patterns(vec!["example.com".to_string()]);
        assert!(!list.matches_url("https://www.example.com/"));
    }

    #[test]
    fn test_wildcard_matches_bare_suffix() {
        let list = Allowlist::from_patterns(vec!["*.example.com".to_string()]);
        assert!(list.matches_host("example.com"));
        assert!(list.matches_host("deep.a.example.com"));
        assert!(!list.matches_host("notexample.com"));
    }

    #[test]
    fn test_unparseable_url_never_matches() {
        let list = Allowlist::from_patterns(vec!["example.com".to_string()]);
        assert!(!list.matches_url("not a url"));
    }
}
