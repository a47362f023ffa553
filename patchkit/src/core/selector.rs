//! Stable selector generation with stability diagnostics.
//!
//! Strategies are tried from most to least stable; a candidate is accepted
//! only when resolving it against the document yields the element itself as
//! the first match, so generated selectors always round-trip.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::css::{escape_ident, escape_string, parse_selector, query_selector_all};
use super::dom::{Document, NodeId};

/// Test and automation attributes, most specific first.
pub const STABLE_DATA_ATTRIBUTES: &[&str] = &[
    "data-testid",
    "data-test",
    "data-test-id",
    "data-cy",
    "data-qa",
    "data-patch-id",
];

const ARIA_ATTRIBUTES: &[&str] = &["aria-label", "aria-labelledby", "role"];

const SEMANTIC_CLASS_PREFIXES: &[&str] = &[
    "btn", "button", "card", "nav", "header", "footer", "hero", "feature", "cta", "menu", "modal",
    "banner", "logo", "title", "pricing", "product",
];

const GENERATED_ID_PREFIXES: &[&str] = &[
    "ember", "react-", "radix-", "headlessui-", "mui-", ":r", "ng-", "vue-", "svelte-", "yui_",
    "ext-gen",
];

static UUID_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[0-9a-f]{8}-?[0-9a-f]{4}-?[0-9a-f]{4}-?[0-9a-f]{4}-?[0-9a-f]{12}")
        .expect("uuid regex")
});

static OPAQUE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{12,}$").expect("opaque regex"));

static LONG_DIGIT_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{5,}").expect("digit run regex"));

/// Generated or hashed class names such as `css-1x2y3z` or `sc-AxjAm`.
static HASHED_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(css|sc|jsx|emotion|styled)-|_[a-zA-Z0-9]{5,}$|__[a-zA-Z0-9]{5,}")
        .expect("hashed class regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    TestAttribute,
    Id,
    Aria,
    SemanticClass,
    TagAttribute,
    AncestorAnchored,
    BareTag,
    StructuralPath,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectorDiagnostics {
    /// 0 to 100; higher survives re-renders better.
    pub stability: u8,
    pub match_count: usize,
    pub unique: bool,
    pub resolves: bool,
    pub position_based: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedSelector {
    pub selector: String,
    pub strategy: Strategy,
    /// Strategy of the anchor for ancestor-anchored selectors.
    pub anchor: Option<Strategy>,
    pub diagnostics: SelectorDiagnostics,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// How far up the ancestor-anchored strategy searches for an anchor.
    pub max_ancestor_depth: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            max_ancestor_depth: 5,
        }
    }
}

/// True when an id looks hand-written rather than machine-generated.
pub fn is_stable_id(id: &str) -> bool {
    if id.trim().is_empty() || id.contains("__") {
        return false;
    }
    if id.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    if GENERATED_ID_PREFIXES.iter().any(|prefix| id.starts_with(prefix)) {
        return false;
    }
    if UUID_LIKE.is_match(id) || LONG_DIGIT_RUN.is_match(id) {
        return false;
    }
    let digits = id.chars().filter(char::is_ascii_digit).count();
    !(OPAQUE_TOKEN.is_match(id) && digits >= 3)
}

pub fn is_semantic_class(class: &str) -> bool {
    let lower = class.to_ascii_lowercase();
    !HASHED_CLASS.is_match(class)
        && SEMANTIC_CLASS_PREFIXES
            .iter()
            .any(|prefix| lower.starts_with(prefix))
}

fn attribute_selector(tag: Option<&str>, name: &str, value: &str) -> String {
    format!("{}[{}={}]", tag.unwrap_or(""), name, escape_string(value))
}

/// Stable, non-positional selectors for `node` on its own.
fn anchor_candidates(doc: &Document, node: NodeId) -> Vec<(String, Strategy)> {
    let mut candidates: Vec<(String, Strategy)> = STABLE_DATA_ATTRIBUTES
        .iter()
        .filter_map(|attr| {
            let value = doc.attribute(node, attr)?;
            (!value.trim().is_empty())
                .then(|| (attribute_selector(None, attr, value), Strategy::TestAttribute))
        })
        .collect();
    if let Some(id) = doc.attribute(node, "id")
        && is_stable_id(id)
    {
        candidates.push((format!("#{}", escape_ident(id)), Strategy::Id));
    }
    candidates
}

fn resolves_to(doc: &Document, selector: &str, node: NodeId) -> Option<usize> {
    let parsed = parse_selector(selector).ok()?;
    let matches = query_selector_all(doc, &parsed);
    (matches.first() == Some(&node)).then_some(matches.len())
}

pub fn generate_selector(doc: &Document, node: NodeId) -> GeneratedSelector {
    generate_selector_with(doc, node, &SelectorConfig::default())
}

pub fn generate_selector_with(doc: &Document, node: NodeId, config: &SelectorConfig) -> GeneratedSelector {
    let Some(tag) = doc.tag_name(node).map(str::to_string) else {
        return unresolvable("*".to_string(), "node is not an element");
    };
    if !doc.is_connected(node) {
        return unresolvable(tag, "element is not connected to the document");
    }

    let mut candidates: Vec<(String, Strategy, Option<Strategy>)> = Vec::new();

    for (selector, strategy) in anchor_candidates(doc, node) {
        candidates.push((selector, strategy, None));
    }

    for attr in ARIA_ATTRIBUTES {
        if let Some(value) = doc.attribute(node, attr)
            && value.chars().count() > 2
        {
            candidates.push((attribute_selector(Some(&tag), attr, value), Strategy::Aria, None));
        }
    }

    let semantic: Vec<&str> = doc
        .classes(node)
        .into_iter()
        .filter(|class| is_semantic_class(class))
        .collect();
    if !semantic.is_empty() {
        let classes: String = semantic
            .iter()
            .map(|class| format!(".{}", escape_ident(class)))
            .collect();
        candidates.push((format!("{tag}{classes}"), Strategy::SemanticClass, None));
    }

    for attr in ["type", "name", "role"] {
        if let Some(value) = doc.attribute(node, attr)
            && !value.is_empty()
        {
            candidates.push((attribute_selector(Some(&tag), attr, value), Strategy::TagAttribute, None));
        }
    }

    if let Some((selector, anchor)) = ancestor_anchored(doc, node, config.max_ancestor_depth) {
        candidates.push((selector, Strategy::AncestorAnchored, Some(anchor)));
    }

    candidates.push((tag.clone(), Strategy::BareTag, None));
    candidates.push((structural_path(doc, node), Strategy::StructuralPath, None));

    for (selector, strategy, anchor) in candidates {
        if resolves_to(doc, &selector, node).is_some() {
            let diagnostics = diagnose(doc, node, &selector, strategy, anchor);
            return GeneratedSelector {
                selector,
                strategy,
                anchor,
                diagnostics,
            };
        }
    }

    // Structural paths resolve for every connected element.
    unresolvable(tag, "no candidate selector resolved to the element")
}

fn unresolvable(selector: String, reason: &str) -> GeneratedSelector {
    warn!(%selector, reason, "generated selector does not resolve to its element");
    GeneratedSelector {
        selector,
        strategy: Strategy::BareTag,
        anchor: None,
        diagnostics: SelectorDiagnostics {
            stability: 0,
            match_count: 0,
            unique: false,
            resolves: false,
            position_based: false,
            warnings: vec![reason.to_string()],
        },
    }
}

fn nth_child_path(doc: &Document, from: NodeId, to: NodeId) -> String {
    let mut steps = Vec::new();
    let mut current = to;
    while current != from {
        steps.push(format!(":nth-child({})", doc.element_index(current)));
        match doc.parent(current) {
            Some(parent) => current = parent,
            None => break,
        }
    }
    steps.reverse();
    steps.join(" > ")
}

fn ancestor_anchored(doc: &Document, node: NodeId, max_depth: usize) -> Option<(String, Strategy)> {
    doc.ancestors(node)
        .take_while(|ancestor| doc.is_element(*ancestor))
        .take(max_depth)
        .find_map(|ancestor| {
            let (anchor, strategy) = anchor_candidates(doc, ancestor)
                .into_iter()
                .find(|(anchor, _)| resolves_to(doc, anchor, ancestor).is_some())?;
            Some((
                format!("{anchor} > {}", nth_child_path(doc, ancestor, node)),
                strategy,
            ))
        })
}

fn structural_path(doc: &Document, node: NodeId) -> String {
    let top = doc
        .ancestors(node)
        .filter(|ancestor| doc.is_element(*ancestor))
        .last()
        .unwrap_or(node);
    let root = if doc.document_element() == Some(top) {
        ":root".to_string()
    } else {
        format!(
            "{}:nth-child({})",
            doc.tag_name(top).unwrap_or("*"),
            doc.element_index(top)
        )
    };
    if top == node {
        return root;
    }
    format!("{root} > {}", nth_child_path(doc, top, node))
}

fn strategy_bonus(strategy: Strategy) -> i32 {
    match strategy {
        Strategy::TestAttribute => 40,
        Strategy::Id => 35,
        Strategy::Aria => 30,
        Strategy::SemanticClass => 20,
        _ => 0,
    }
}

/// Scores `selector` for `node`.
pub fn diagnose(
    doc: &Document,
    node: NodeId,
    selector: &str,
    strategy: Strategy,
    anchor: Option<Strategy>,
) -> SelectorDiagnostics {
    let parsed = match parse_selector(selector) {
        Ok(parsed) => parsed,
        Err(err) => {
            return SelectorDiagnostics {
                stability: 0,
                match_count: 0,
                unique: false,
                resolves: false,
                position_based: false,
                warnings: vec![format!("selector does not parse: {err}")],
            };
        }
    };
    let matches = query_selector_all(doc, &parsed);
    let match_count = matches.len();
    let resolves = matches.first() == Some(&node);
    let unique = match_count == 1;
    let position_based = parsed.is_position_based();
    let mut warnings = Vec::new();

    let stability = if !resolves {
        warn!(selector, match_count, "selector does not resolve back to its element");
        warnings.push("selector does not resolve back to the element".to_string());
        0
    } else if strategy == Strategy::BareTag {
        warnings.push("bare tag selector is unstable".to_string());
        10
    } else {
        let mut score = 50 + strategy_bonus(anchor.unwrap_or(strategy));
        if position_based {
            score -= 20;
        }
        if unique {
            score += 10;
        }
        if match_count > 10 {
            score -= 20;
            warnings.push(format!("selector matches {match_count} elements"));
        }
        score.clamp(0, 100) as u8
    };

    if resolves && position_based {
        warnings.push("selector depends on element position".to_string());
    }

    SelectorDiagnostics {
        stability,
        match_count,
        unique,
        resolves,
        position_based,
        warnings,
    }
}
