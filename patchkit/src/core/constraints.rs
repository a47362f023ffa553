//! Structural-safety validation for proposed moves.
//!
//! Checks run in a fixed order and the first violation wins: cycles, anchor
//! placement, table structure, label/control association, ARIA references,
//! then drag and drop capability. The label and ARIA checks are heuristics:
//! after the move the destination must contain, or be contained by, every
//! partner that stays behind.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::containers::{associated_control, can_accept_drop, can_drag, is_labelable};
use super::dom::{Document, NodeId};
use super::geometry::Geometry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropPosition {
    Before,
    After,
    Inside,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    CircularMove,
    InvalidAnchor,
    TableStructure,
    FormLabel,
    AriaReference,
    NotDraggable,
    NotAccepting,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{reason}")]
pub struct ConstraintViolation {
    pub kind: ViolationKind,
    pub reason: String,
}

impl ConstraintViolation {
    fn new(kind: ViolationKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

const TABLE_SECTIONS: &[&str] = &["thead", "tbody", "tfoot"];
const TABLE_PARTS: &[&str] = &[
    "thead", "tbody", "tfoot", "tr", "td", "th", "caption", "colgroup", "col",
];
/// Slots that only accept table parts.
const TABLE_SLOTS: &[&str] = &["table", "thead", "tbody", "tfoot", "tr", "colgroup"];

const ARIA_REFERENCE_ATTRIBUTES: &[&str] = &["aria-labelledby", "aria-describedby"];

fn describe(doc: &Document, node: NodeId) -> String {
    let tag = doc.tag_name(node).unwrap_or("node");
    match doc.attribute(node, "id") {
        Some(id) if !id.is_empty() => format!("<{tag}#{id}>"),
        _ => format!("<{tag}>"),
    }
}

/// Full validation, including drag/drop capability of the elements.
pub fn validate_drop(
    doc: &Document,
    geometry: &dyn Geometry,
    dragged: NodeId,
    container: NodeId,
    position: DropPosition,
    sibling: Option<NodeId>,
) -> Result<(), ConstraintViolation> {
    validate_move(doc, dragged, container, position, sibling)?;
    if !can_drag(doc, dragged) {
        return Err(ConstraintViolation::new(
            ViolationKind::NotDraggable,
            format!("{} cannot be dragged", describe(doc, dragged)),
        ));
    }
    if !can_accept_drop(doc, geometry, container) {
        return Err(ConstraintViolation::new(
            ViolationKind::NotAccepting,
            format!("{} does not accept dropped elements", describe(doc, container)),
        ));
    }
    Ok(())
}

/// Structural validation of moving `dragged` into `container`.
///
/// For `Before`/`After` the `sibling` anchor must be a child of `container`.
pub fn validate_move(
    doc: &Document,
    dragged: NodeId,
    container: NodeId,
    position: DropPosition,
    sibling: Option<NodeId>,
) -> Result<(), ConstraintViolation> {
    if doc.contains(dragged, container) {
        return Err(ConstraintViolation::new(
            ViolationKind::CircularMove,
            format!(
                "cannot move {} into itself or its own descendants",
                describe(doc, dragged)
            ),
        ));
    }
    check_anchor(doc, dragged, container, position, sibling)?;
    check_table(doc, dragged, container)?;
    check_labels(doc, dragged, container)?;
    check_aria(doc, dragged, container)?;
    Ok(())
}

fn check_anchor(
    doc: &Document,
    dragged: NodeId,
    container: NodeId,
    position: DropPosition,
    sibling: Option<NodeId>,
) -> Result<(), ConstraintViolation> {
    if position == DropPosition::Inside {
        return Ok(());
    }
    let Some(sibling) = sibling else {
        return Err(ConstraintViolation::new(
            ViolationKind::InvalidAnchor,
            "before/after drops need a sibling anchor",
        ));
    };
    if sibling == dragged {
        return Err(ConstraintViolation::new(
            ViolationKind::InvalidAnchor,
            "an element cannot be anchored to itself",
        ));
    }
    if doc.parent(sibling) != Some(container) {
        return Err(ConstraintViolation::new(
            ViolationKind::InvalidAnchor,
            format!(
                "{} is not a child of {}",
                describe(doc, sibling),
                describe(doc, container)
            ),
        ));
    }
    Ok(())
}

/// Nearest `<table>` at or above `node`.
fn table_of(doc: &Document, node: NodeId) -> Option<NodeId> {
    std::iter::once(node)
        .chain(doc.ancestors(node))
        .find(|candidate| doc.tag_name(*candidate) == Some("table"))
}

fn check_table(doc: &Document, dragged: NodeId, container: NodeId) -> Result<(), ConstraintViolation> {
    let dragged_tag = doc.tag_name(dragged).unwrap_or("");
    let container_tag = doc.tag_name(container).unwrap_or("");
    let violation = |reason: String| Err(ConstraintViolation::new(ViolationKind::TableStructure, reason));

    if !TABLE_PARTS.contains(&dragged_tag) {
        if TABLE_SLOTS.contains(&container_tag) {
            return violation(format!(
                "<{dragged_tag}> cannot be placed directly inside <{container_tag}>"
            ));
        }
        return Ok(());
    }

    let source_table = doc.parent(dragged).and_then(|parent| table_of(doc, parent));
    let destination_table = table_of(doc, container);
    if source_table.is_some() && source_table != destination_table {
        return violation(format!("<{dragged_tag}> cannot leave its table"));
    }

    let parent_ok = match dragged_tag {
        "td" | "th" => container_tag == "tr",
        "tr" => TABLE_SECTIONS.contains(&container_tag) || container_tag == "table",
        "col" => container_tag == "colgroup" || container_tag == "table",
        _ => container_tag == "table",
    };
    if !parent_ok {
        return violation(format!(
            "<{dragged_tag}> cannot be placed inside <{container_tag}>"
        ));
    }
    Ok(())
}

/// Checks that moving the subtree of `dragged` under `destination` keeps it
/// related to `partner`, which stays behind.
fn stays_related(doc: &Document, destination: NodeId, partner: NodeId) -> bool {
    doc.contains(destination, partner) || doc.contains(partner, destination)
}

fn check_labels(doc: &Document, dragged: NodeId, container: NodeId) -> Result<(), ConstraintViolation> {
    let moving = |node: NodeId| doc.contains(dragged, node);

    for label in doc.elements().filter(|node| doc.tag_name(*node) == Some("label")) {
        let Some(control) = associated_control(doc, label) else {
            continue;
        };
        let (inside, outside) = match (moving(label), moving(control)) {
            (true, false) => (label, control),
            (false, true) => (control, label),
            _ => continue,
        };
        let implicit = doc.attribute(label, "for").is_none();
        let keeps_association = if implicit {
            // A wrapping label only works while it still contains the control.
            inside == control && doc.contains(label, container)
        } else {
            stays_related(doc, container, outside)
        };
        if !keeps_association {
            return Err(ConstraintViolation::new(
                ViolationKind::FormLabel,
                format!(
                    "moving {} would separate {} from {}",
                    describe(doc, dragged),
                    describe(doc, inside),
                    describe(doc, outside)
                ),
            ));
        }
    }

    if is_labelable(doc, dragged) {
        let wrapping = doc
            .ancestors(dragged)
            .find(|ancestor| doc.tag_name(*ancestor) == Some("label"));
        if let Some(label) = wrapping
            && associated_control(doc, label) == Some(dragged)
            && !doc.contains(label, container)
        {
            return Err(ConstraintViolation::new(
                ViolationKind::FormLabel,
                format!(
                    "moving {} out of {} would drop its label",
                    describe(doc, dragged),
                    describe(doc, label)
                ),
            ));
        }
    }
    Ok(())
}

fn check_aria(doc: &Document, dragged: NodeId, container: NodeId) -> Result<(), ConstraintViolation> {
    for referrer in doc.elements() {
        for attr in ARIA_REFERENCE_ATTRIBUTES {
            let Some(ids) = doc.attribute(referrer, attr) else {
                continue;
            };
            for id in ids.split_ascii_whitespace() {
                let Some(referenced) = doc.get_element_by_id(id) else {
                    continue;
                };
                let referrer_moves = doc.contains(dragged, referrer);
                let referenced_moves = doc.contains(dragged, referenced);
                let reason = match (referrer_moves, referenced_moves) {
                    (true, false) if !stays_related(doc, container, referenced) => format!(
                        "{} would lose the element its {attr} points to (#{id})",
                        describe(doc, referrer)
                    ),
                    (false, true) if !stays_related(doc, container, referrer) => format!(
                        "#{id} would move away from {} which references it via {attr}",
                        describe(doc, referrer)
                    ),
                    _ => continue,
                };
                return Err(ConstraintViolation::new(ViolationKind::AriaReference, reason));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::css::select_first;
    use crate::core::geometry::StaticGeometry;
    use crate::core::html::parse_document;

    fn node(doc: &Document, selector: &str) -> NodeId {
        select_first(doc, selector).expect("parse").expect("node")
    }

    fn kind_of(result: Result<(), ConstraintViolation>) -> Option<ViolationKind> {
        result.err().map(|violation| violation.kind)
    }

    #[test]
    fn rejects_dropping_into_own_subtree() {
        let doc = parse_document(r#"<section id="outer"><div id="inner"></div></section>"#);
        let result = validate_move(&doc, node(&doc, "#outer"), node(&doc, "#inner"), DropPosition::Inside, None);
        assert_eq!(kind_of(result), Some(ViolationKind::CircularMove));
    }

    #[test]
    fn anchors_must_be_children_of_the_container() {
        let doc = parse_document(r#"<main><ul id="a"><li id="x"></li></ul><ul id="b"><li id="y"></li></ul><p id="p"></p></main>"#);
        let p = node(&doc, "#p");
        let result = validate_move(&doc, p, node(&doc, "#a"), DropPosition::Before, Some(node(&doc, "#y")));
        assert_eq!(kind_of(result), Some(ViolationKind::InvalidAnchor));
        let result = validate_move(&doc, p, node(&doc, "#a"), DropPosition::After, None);
        assert_eq!(kind_of(result), Some(ViolationKind::InvalidAnchor));
        assert!(validate_move(&doc, p, node(&doc, "#a"), DropPosition::Before, Some(node(&doc, "#x"))).is_ok());
    }

    #[test]
    fn explicit_label_cannot_leave_its_control() {
        let doc = parse_document(
            r#"<main><form id="f"><label id="l" for="x">X</label><input id="x"></form><div id="elsewhere"></div></main>"#,
        );
        let label = node(&doc, "#l");
        let result = validate_move(&doc, label, node(&doc, "#elsewhere"), DropPosition::Inside, None);
        let violation = result.expect_err("separated");
        assert_eq!(violation.kind, ViolationKind::FormLabel);
        assert!(violation.reason.contains("#x"));

        assert!(validate_move(&doc, label, node(&doc, "#f"), DropPosition::Inside, None).is_ok());
    }

    #[test]
    fn control_cannot_leave_wrapping_label() {
        let doc = parse_document(
            r#"<main><label id="l">Name <span id="wrap"></span><input id="n"></label><div id="out"></div></main>"#,
        );
        let input = node(&doc, "#n");
        let result = validate_move(&doc, input, node(&doc, "#out"), DropPosition::Inside, None);
        assert_eq!(kind_of(result), Some(ViolationKind::FormLabel));
        assert!(validate_move(&doc, input, node(&doc, "#wrap"), DropPosition::Inside, None).is_ok());
    }

    #[test]
    fn aria_references_are_checked_both_ways() {
        let doc = parse_document(
            r#"<main><section id="s"><h2 id="t">Title</h2><div id="d" aria-labelledby="t"></div></section><aside id="a"></aside></main>"#,
        );
        let result = validate_move(&doc, node(&doc, "#d"), node(&doc, "#a"), DropPosition::Inside, None);
        assert_eq!(kind_of(result), Some(ViolationKind::AriaReference));
        let result = validate_move(&doc, node(&doc, "#t"), node(&doc, "#a"), DropPosition::Inside, None);
        assert_eq!(kind_of(result), Some(ViolationKind::AriaReference));
        let result = validate_move(&doc, node(&doc, "#s"), node(&doc, "#a"), DropPosition::Inside, None);
        assert!(result.is_ok());
    }

    #[test]
    fn table_parts_keep_their_structure() {
        let doc = parse_document(
            r#"<main><table id="t1"><tbody id="b1"><tr id="r1"><td id="c1">1</td></tr><tr id="r2"></tr></tbody></table><table id="t2"><tbody id="b2"></tbody></table><div id="d"></div><p id="p"></p></main>"#,
        );
        let cell = node(&doc, "#c1");
        let row = node(&doc, "#r1");
        let check = |dragged: NodeId, container: &str| {
            kind_of(validate_move(&doc, dragged, node(&doc, container), DropPosition::Inside, None))
        };
        assert_eq!(check(cell, "#d"), Some(ViolationKind::TableStructure));
        assert_eq!(check(cell, "#b1"), Some(ViolationKind::TableStructure));
        assert_eq!(check(cell, "#r2"), None);
        assert_eq!(check(row, "#b2"), Some(ViolationKind::TableStructure));
        assert_eq!(check(row, "#t1"), None);
        assert_eq!(check(node(&doc, "#p"), "#r2"), Some(ViolationKind::TableStructure));
        assert_eq!(check(node(&doc, "#p"), "#c1"), None);
    }

    #[test]
    fn full_validation_checks_capabilities() {
        let doc = parse_document(r#"<body><main id="m"></main><img id="i"><p id="p"></p></body>"#);
        let geometry = StaticGeometry::new();
        let result = validate_drop(&doc, &geometry, node(&doc, "body"), node(&doc, "#m"), DropPosition::Inside, None);
        assert_eq!(kind_of(result), Some(ViolationKind::CircularMove));
        let result = validate_drop(&doc, &geometry, node(&doc, "#p"), node(&doc, "#i"), DropPosition::Inside, None);
        assert_eq!(kind_of(result), Some(ViolationKind::NotAccepting));
        assert!(validate_drop(&doc, &geometry, node(&doc, "#p"), node(&doc, "#m"), DropPosition::Inside, None).is_ok());
    }
}
