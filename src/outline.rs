//! DOM outline generation.
//!
//! An outline is the cheap structural stand-in for full HTML: one line per
//! element, indented by depth, carrying tag, id and classes. It backs the
//! degraded responses for heavy-capture timeouts and DOM byte-limit
//! overruns.

use once_cell::sync::Lazy;
use regex::Regex;

/// Hard cap on emitted outline lines.
const MAX_OUTLINE_LINES: usize = 200;

/// Elements that never contain children.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

static TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9-]*)((?:[^<>]*?))?(/?)>").expect("tag pattern")
});
static ID_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bid\s*=\s*["']([^"']+)["']"#).expect("id pattern"));
static CLASS_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bclass\s*=\s*["']([^"']+)["']"#).expect("class pattern"));

/// Summarize serialized HTML into an indented tag outline.
pub fn outline_from_html(html: &str, max_depth: usize) -> String {
    let mut lines = Vec::new();
    let mut depth: usize = 0;

    for caps in TAG.captures_iter(html) {
        if lines.len() >= MAX_OUTLINE_LINES {
            lines.push("…".to_string());
            break;
        }
        let closing = caps.get(1).map(|m| !m.as_str().is_empty()).unwrap_or(false);
        let name = caps
            .get(2)
            .map(|m| m.as_str().to_lowercase())
            .unwrap_or_default();
        let attrs = caps.get(3).map(|m| m.as_str()).unwrap_or("");
        let self_closing = caps.get(4).map(|m| !m.as_str().is_empty()).unwrap_or(false)
            || VOID_ELEMENTS.contains(&name.as_str());

        if closing {
            depth = depth.saturating_sub(1);
            continue;
        }

        if depth < max_depth {
            let mut line = format!("{}{}", "  ".repeat(depth), name);
            if let Some(id) = ID_ATTR.captures(attrs).and_then(|c| c.get(1)) {
                line.push('#');
                line.push_str(id.as_str());
            }
            if let Some(classes) = CLASS_ATTR.captures(attrs).and_then(|c| c.get(1)) {
                for class in classes.as_str().split_whitespace().take(3) {
                    line.push('.');
                    line.push_str(class);
                }
            }
            lines.push(line);
        }

        if !self_closing {
            depth += 1;
        }
    }

    lines.join("\n")
}

/// Outline assembled from stored element references when no live capture is
/// possible.
pub fn outline_from_selectors<'a>(selectors: impl Iterator<Item = &'a str>) -> String {
    let mut seen = Vec::new();
    for selector in selectors {
        if !seen.iter().any(|s| s == selector) {
            seen.push(selector.to_string());
        }
        if seen.len() >= MAX_OUTLINE_LINES {
            break;
        }
    }
    seen.join("\n")
}

/// Last-resort outline naming just the requested selector.
pub fn outline_for_selector(selector: &str) -> String {
    format!("{selector} (structure unavailable)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_structure_is_indented() {
        let html = r#"<div id="app" class="root dark"><ul class="nav"><li>one</li><li>two</li></ul></div>"#;
        let outline = outline_from_html(html, 5);
        let lines: Vec<&str> = outline.lines().collect();
        assert_eq!(lines[0], "div#app.root.dark");
        assert_eq!(lines[1], "  ul.nav");
        assert_eq!(lines[2], "    li");
        assert_eq!(lines[3], "    li");
    }

    #[test]
    fn depth_cap_prunes_deep_nodes() {
        let html = "<a><b><c><d>deep</d></c></b></a>";
        let outline = outline_from_html(html, 2);
        assert!(outline.contains('a'));
        assert!(outline.contains('b'));
        assert!(!outline.contains('c'));
    }

    #[test]
    fn void_elements_do_not_nest() {
        let html = r#"<div><img src="x.png"><input value="q"><span>t</span></div>"#;
        let outline = outline_from_html(html, 4);
        let lines: Vec<&str> = outline.lines().collect();
        assert_eq!(lines[1], "  img");
        assert_eq!(lines[2], "  input");
        assert_eq!(lines[3], "  span");
    }

    #[test]
    fn selector_outline_dedupes() {
        let outline =
            outline_from_selectors(["#app", ".nav", "#app"].into_iter());
        assert_eq!(outline, "#app\n.nav");
    }
}
