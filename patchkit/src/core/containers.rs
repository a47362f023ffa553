//! Element classification for drag and drop.

use serde::Serialize;

use super::dom::{Document, NodeId};
use super::geometry::{Display, Geometry, Rect};
use super::html::is_void;
use super::selector::generate_selector;

/// Authoring attribute that marks (or with `"false"` unmarks) a container.
pub const SAFE_CONTAINER_ATTRIBUTE: &str = "data-safe-container";

pub const CONTAINER_TAGS: &[&str] = &[
    "main", "section", "article", "aside", "nav", "header", "footer", "ul", "ol", "figure", "form",
    "fieldset", "details", "dialog", "body",
];

/// Form controls and replaced elements; never drop targets.
const NON_ACCEPTING_TAGS: &[&str] = &[
    "input", "textarea", "select", "button", "option", "optgroup", "img", "video", "audio",
    "iframe", "canvas", "svg", "object", "embed", "picture", "meter", "progress", "script",
    "style", "template",
];

pub const NON_DRAGGABLE_TAGS: &[&str] = &[
    "html", "head", "body", "script", "style", "meta", "link", "title", "base", "noscript",
    "template",
];

const LABELABLE_TAGS: &[&str] = &[
    "button", "input", "meter", "output", "progress", "select", "textarea",
];

pub fn is_labelable(doc: &Document, node: NodeId) -> bool {
    match doc.tag_name(node) {
        Some("input") => doc.attribute(node, "type") != Some("hidden"),
        Some(tag) => LABELABLE_TAGS.contains(&tag),
        None => false,
    }
}

/// Control a `<label>` is associated with: the `for` target, else the first
/// labelable descendant.
pub fn associated_control(doc: &Document, label: NodeId) -> Option<NodeId> {
    if doc.tag_name(label) != Some("label") {
        return None;
    }
    if let Some(target) = doc.attribute(label, "for") {
        return doc
            .get_element_by_id(target)
            .filter(|control| is_labelable(doc, *control));
    }
    doc.descendants(label)
        .find(|candidate| is_labelable(doc, *candidate))
}

pub fn is_container(doc: &Document, geometry: &dyn Geometry, node: NodeId) -> bool {
    let Some(tag) = doc.tag_name(node) else {
        return false;
    };
    match doc.attribute(node, SAFE_CONTAINER_ATTRIBUTE) {
        Some("false") => return false,
        Some(_) => return true,
        None => {}
    }
    CONTAINER_TAGS.contains(&tag) || geometry.display(doc, node).is_flex_or_grid()
}

pub fn can_accept_drop(doc: &Document, geometry: &dyn Geometry, node: NodeId) -> bool {
    let Some(tag) = doc.tag_name(node) else {
        return false;
    };
    if NON_ACCEPTING_TAGS.contains(&tag) || is_void(tag) {
        return false;
    }
    if is_container(doc, geometry, node) {
        return true;
    }
    let display = geometry.display(doc, node);
    !(display.is_inline() || display == Display::None)
}

pub fn can_drag(doc: &Document, node: NodeId) -> bool {
    let Some(tag) = doc.tag_name(node) else {
        return false;
    };
    if NON_DRAGGABLE_TAGS.contains(&tag) {
        return false;
    }
    if tag == "label" && associated_control(doc, node).is_some() {
        return false;
    }
    true
}

/// Per-frame snapshot of an element during a drag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementRef {
    #[serde(skip)]
    pub node: NodeId,
    pub selector: String,
    pub stability: u8,
    pub bounds: Option<Rect>,
    pub is_container: bool,
    pub can_drag: bool,
    pub can_accept_drop: bool,
}

impl ElementRef {
    pub fn capture(doc: &Document, geometry: &dyn Geometry, node: NodeId) -> Self {
        let generated = generate_selector(doc, node);
        Self {
            node,
            selector: generated.selector,
            stability: generated.diagnostics.stability,
            bounds: geometry.bounds(doc, node),
            is_container: is_container(doc, geometry, node),
            can_drag: can_drag(doc, node),
            can_accept_drop: can_accept_drop(doc, geometry, node),
        }
    }
}
