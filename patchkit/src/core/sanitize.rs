//! Allow-list HTML sanitizer for `insertHTML`.
//!
//! Dangerous containers are removed with their content, unknown tags are
//! unwrapped, comments and event-handler attributes are dropped, and URL
//! attributes are restricted to safe schemes. Output is canonical markup, so
//! sanitizing already-sanitized markup returns it unchanged.

use super::dom::{Document, NodeData, NodeId};
use super::html::{inner_html, parse_fragment};

pub const ALLOWED_TAGS: &[&str] = &[
    "a", "b", "blockquote", "br", "code", "div", "em", "figcaption", "figure", "h1", "h2", "h3",
    "h4", "h5", "h6", "hr", "i", "img", "li", "ol", "p", "pre", "section", "small", "span",
    "strong", "sub", "sup", "table", "tbody", "td", "th", "thead", "tr", "u", "ul",
];

pub const ALLOWED_ATTRIBUTES: &[&str] = &[
    "id", "class", "title", "alt", "src", "href", "width", "height", "role", "lang", "dir",
    "colspan", "rowspan", "target", "rel",
];

/// Removed together with everything inside them.
pub const STRIPPED_TAGS: &[&str] = &[
    "script", "object", "embed", "style", "link", "meta", "iframe", "template", "noscript",
    "base", "form",
];

pub const SAFE_URL_SCHEMES: &[&str] = &["http", "https", "mailto", "tel"];

/// Attributes whose values are navigable or fetchable URLs.
pub const URL_ATTRIBUTES: &[&str] = &["href", "src", "action", "formaction", "xlink:href", "poster"];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SanitizeReport {
    pub html: String,
    /// Human-readable descriptions of what was removed.
    pub stripped: Vec<String>,
}

pub fn sanitize_html(html: &str) -> String {
    sanitize_report(html).html
}

pub fn sanitize_report(html: &str) -> SanitizeReport {
    let mut doc = Document::new();
    let holder = doc.create_element("div");
    for node in parse_fragment(&mut doc, html) {
        // A fresh holder always accepts children.
        let _ = doc.append_child(holder, node);
    }
    let mut stripped = Vec::new();
    clean_children(&mut doc, holder, &mut stripped);
    SanitizeReport {
        html: inner_html(&doc, holder),
        stripped,
    }
}

/// True for `on*` attribute names.
pub fn is_event_handler(name: &str) -> bool {
    name.len() > 2 && name.get(..2).is_some_and(|prefix| prefix.eq_ignore_ascii_case("on"))
}

/// Accepts relative URLs and the allow-listed schemes. Whitespace and control
/// characters are ignored when detecting the scheme, as browsers do.
pub fn is_safe_url(value: &str) -> bool {
    let normalized: String = value
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && !c.is_control())
        .collect();
    let Some(colon) = normalized.find(':') else {
        return true;
    };
    let candidate = &normalized[..colon];
    let looks_like_scheme = candidate
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic())
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !looks_like_scheme {
        // A colon after a path, query or fragment delimiter is not a scheme.
        return true;
    }
    SAFE_URL_SCHEMES.contains(&candidate.to_ascii_lowercase().as_str())
}

fn is_allowed_attribute(name: &str) -> bool {
    if ALLOWED_ATTRIBUTES.contains(&name) {
        return true;
    }
    ["aria-", "data-"].iter().any(|prefix| {
        name.strip_prefix(prefix).is_some_and(|rest| {
            !rest.is_empty()
                && rest
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'))
        })
    })
}

fn clean_children(doc: &mut Document, parent: NodeId, stripped: &mut Vec<String>) {
    for child in doc.children(parent).to_vec() {
        let name = match doc.data(child) {
            NodeData::Text(_) => continue,
            NodeData::Comment(_) | NodeData::Document => {
                doc.detach(child);
                stripped.push("comment".to_string());
                continue;
            }
            NodeData::Element(element) => element.name.clone(),
        };

        if STRIPPED_TAGS.contains(&name.as_str()) {
            doc.detach(child);
            stripped.push(format!("<{name}>"));
            continue;
        }

        clean_children(doc, child, stripped);

        if !ALLOWED_TAGS.contains(&name.as_str()) {
            for grandchild in doc.children(child).to_vec() {
                let _ = doc.insert_before(parent, grandchild, Some(child));
            }
            doc.detach(child);
            stripped.push(format!("<{name}> (unwrapped)"));
            continue;
        }

        clean_attributes(doc, child, stripped);
    }
}

fn clean_attributes(doc: &mut Document, node: NodeId, stripped: &mut Vec<String>) {
    let attrs: Vec<(String, String)> = doc
        .element(node)
        .map(|element| {
            element
                .attrs
                .iter()
                .map(|attr| (attr.name.clone(), attr.value.clone()))
                .collect()
        })
        .unwrap_or_default();

    for (name, value) in attrs {
        let reason = if is_event_handler(&name) {
            Some(format!("{name} event handler"))
        } else if !is_allowed_attribute(&name) {
            Some(format!("{name} attribute"))
        } else if URL_ATTRIBUTES.contains(&name.as_str()) && !is_safe_url(&value) {
            Some(format!("unsafe {name} url"))
        } else {
            None
        };
        if let Some(reason) = reason {
            let _ = doc.remove_attribute(node, &name);
            stripped.push(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_and_event_handlers() {
        let report = sanitize_report(r#"<p onclick="x()">Hi<script>alert(1)</script></p>"#);
        assert_eq!(report.html, "<p>Hi</p>");
        assert_eq!(report.stripped, vec!["<script>", "onclick event handler"]);
    }

    #[test]
    fn unwraps_unknown_tags_and_drops_comments() {
        let html = sanitize_html("<custom-card><b>bold</b><!-- note --></custom-card><font>x</font>");
        assert_eq!(html, "<b>bold</b>x");
    }

    #[test]
    fn removes_dangerous_containers_with_content() {
        let html = sanitize_html(
            "<div><form><input name=a></form><iframe src=x></iframe><style>p{}</style>ok</div>",
        );
        assert_eq!(html, "<div>ok</div>");
    }

    #[test]
    fn restricts_url_schemes() {
        let html = sanitize_html(
            r#"<a href="javascript:alert(1)">a</a><a href=" JaVa&#x09;script:x">b</a><a href="https://ok.test/x">c</a><img src="/rel.png"><a href="mailto:a@b.c">d</a><img src="data:image/png;base64,AA">"#,
        );
        assert_eq!(
            html,
            r#"<a>a</a><a>b</a><a href="https://ok.test/x">c</a><img src="/rel.png"><a href="mailto:a@b.c">d</a><img>"#
        );
    }

    #[test]
    fn keeps_aria_and_data_attributes() {
        let html = sanitize_html(r#"<span aria-label="x" data-track-id="7" style="color:red" data-="y">t</span>"#);
        assert_eq!(html, r#"<span aria-label="x" data-track-id="7">t</span>"#);
    }

    #[test]
    fn sanitizing_twice_is_stable() {
        let inputs = [
            r#"<div><p>a<p>b</div><x-y><li>c</x-y><script>"#,
            "<<a href='tel:1'>t</a>>&amp;",
            "<table><tr><td>1</td><custom><td>2</td></custom></tr></table>",
            "<textarea><b>raw</b></textarea>",
        ];
        for input in inputs {
            let once = sanitize_html(input);
            assert_eq!(sanitize_html(&once), once, "input {input:?}");
        }
    }

    #[test]
    fn url_safety_ignores_colons_after_path() {
        assert!(is_safe_url("/path?time=10:30"));
        assert!(is_safe_url("#a:b"));
        assert!(!is_safe_url("vbscript:msgbox"));
        assert!(!is_safe_url("\u{1}javascript:x"));
    }
}
