//! Patch application engine.
//!
//! Each operation resolves its selector against the live document and mutates
//! the first match. Failures are reported per operation and never abort the
//! batch. Operations other than `duplicate` and unforced `classToggle` are
//! idempotent: re-applying them to their own output changes nothing and
//! produces no mutation records.

use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use super::css::{parse_selector, query_selector_all};
use super::dom::{Document, NodeId};
use super::error::PatchError;
use super::html::parse_fragment;
use super::ops::{InsertPosition, Operation};
use super::sanitize::{URL_ATTRIBUTES, is_event_handler, is_safe_url, sanitize_report};
use super::types::{Applied, ApplyResult, Notice, OperationOutcome, OperationStatus};

/// Marks elements inserted by `insertHTML` so re-application can detect them.
pub const INSERT_MARKER: &str = "data-patch-insert";

/// Resolves `selector`, returning the first match and the total match count.
pub fn resolve(doc: &Document, selector: &str) -> Result<(NodeId, usize), PatchError> {
    let parsed = parse_selector(selector).map_err(|err| PatchError::InvalidSelector {
        selector: selector.to_string(),
        message: err.to_string(),
    })?;
    let matches = query_selector_all(doc, &parsed);
    match matches.first() {
        Some(first) => Ok((*first, matches.len())),
        None => Err(PatchError::SelectorNotFound {
            selector: selector.to_string(),
        }),
    }
}

/// Applies operations strictly in order; later operations see the effects of
/// earlier ones.
///
/// On an unobserved document the nodes the operations detached are reclaimed
/// afterwards, so handles to removed nodes are only valid until the next call.
pub fn apply_operations(doc: &mut Document, ops: &[Operation]) -> ApplyResult {
    let mut outcomes = Vec::with_capacity(ops.len());
    for (index, op) in ops.iter().enumerate() {
        let (status, notices) = match apply_operation(doc, op) {
            Ok(applied) => (
                OperationStatus::Applied {
                    changed: applied.changed,
                },
                applied.notices,
            ),
            Err(error) => {
                debug!(index, op = %op.kind(), %error, "operation failed");
                (OperationStatus::Failed { error }, Vec::new())
            }
        };
        outcomes.push(OperationOutcome {
            index,
            op: op.kind(),
            selector: op.selector().to_string(),
            status,
            notices,
        });
    }
    if !doc.is_recording() {
        doc.reclaim_detached();
    }
    ApplyResult::from_outcomes(outcomes)
}

#[instrument(level = "debug", skip_all, fields(op = %op.kind(), selector = op.selector()))]
pub fn apply_operation(doc: &mut Document, op: &Operation) -> Result<Applied, PatchError> {
    let (node, matches) = resolve(doc, op.selector())?;

    let mut applied = match op {
        Operation::TextReplace { text, .. } => Applied::changed(doc.set_text_content(node, text)?),
        Operation::ClassSet { value, .. } => {
            let classes = dedupe(value.split_ascii_whitespace().map(str::to_string).collect());
            Applied::changed(write_classes(doc, node, &classes)?)
        }
        Operation::ClassAdd { class_name, .. } => Applied::changed(add_classes(doc, node, class_name)?),
        Operation::ClassRemove { class_name, .. } => {
            Applied::changed(remove_classes(doc, node, class_name)?)
        }
        Operation::ClassToggle {
            class_name, force, ..
        } => Applied::changed(match force {
            Some(true) => add_classes(doc, node, class_name)?,
            Some(false) => remove_classes(doc, node, class_name)?,
            None => toggle_classes(doc, node, class_name)?,
        }),
        Operation::AttrSet { name, value, .. } => Applied::changed(set_attribute(doc, node, name, value)?),
        Operation::StyleSet {
            property,
            value,
            important,
            ..
        } => Applied::changed(set_style(doc, node, property, value, *important)?),
        Operation::ImageSwap {
            src, srcset, alt, ..
        } => Applied::changed(swap_image(doc, node, src, srcset.as_deref(), alt.as_deref())?),
        Operation::Remove { .. } => Applied::changed(doc.detach(node)),
        Operation::InsertHtml {
            selector,
            html,
            position,
        } => insert_html(doc, node, selector, html, *position)?,
        Operation::MoveBefore {
            selector,
            target_selector,
        } => {
            let (target, _) = resolve(doc, target_selector)?;
            Applied::changed(move_before(doc, node, target, selector, target_selector)?)
        }
        Operation::MoveAfter {
            selector,
            target_selector,
        } => {
            let (target, _) = resolve(doc, target_selector)?;
            Applied::changed(move_after(doc, node, target, selector, target_selector)?)
        }
        Operation::AppendTo {
            selector,
            container_selector,
        } => {
            let (container, _) = resolve(doc, container_selector)?;
            Applied::changed(append_to(doc, node, container, selector, container_selector)?)
        }
        Operation::Duplicate { selector } => {
            let parent = doc.parent(node).ok_or_else(|| PatchError::MissingParent {
                selector: selector.clone(),
            })?;
            let copy = doc.clone_subtree(node);
            let reference = doc.next_sibling(node);
            doc.insert_before(parent, copy, reference)?;
            Applied::changed(true)
        }
    };

    if matches > 1 {
        debug!(matches, "selector matched several elements; mutating the first");
        applied = applied.with_notice(Notice::MultipleMatches { count: matches });
    }
    debug!(changed = applied.changed, "operation applied");
    Ok(applied)
}

fn dedupe(classes: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(classes.len());
    for class in classes {
        if !out.contains(&class) {
            out.push(class);
        }
    }
    out
}

fn current_classes(doc: &Document, node: NodeId) -> Vec<String> {
    doc.classes(node).into_iter().map(str::to_string).collect()
}

fn write_classes(doc: &mut Document, node: NodeId, classes: &[String]) -> Result<bool, PatchError> {
    if classes.is_empty() {
        return Ok(doc.remove_attribute(node, "class")?);
    }
    Ok(doc.set_attribute(node, "class", &classes.join(" "))?)
}

fn add_classes(doc: &mut Document, node: NodeId, class_name: &str) -> Result<bool, PatchError> {
    let mut classes = current_classes(doc, node);
    let before = classes.len();
    for class in class_name.split_ascii_whitespace() {
        if !classes.iter().any(|existing| existing == class) {
            classes.push(class.to_string());
        }
    }
    if classes.len() == before {
        return Ok(false);
    }
    write_classes(doc, node, &classes)
}

fn remove_classes(doc: &mut Document, node: NodeId, class_name: &str) -> Result<bool, PatchError> {
    let targets: Vec<&str> = class_name.split_ascii_whitespace().collect();
    let mut classes = current_classes(doc, node);
    let before = classes.len();
    classes.retain(|class| !targets.contains(&class.as_str()));
    if classes.len() == before {
        return Ok(false);
    }
    write_classes(doc, node, &classes)
}

fn toggle_classes(doc: &mut Document, node: NodeId, class_name: &str) -> Result<bool, PatchError> {
    let mut classes = current_classes(doc, node);
    let mut touched = false;
    for class in class_name.split_ascii_whitespace() {
        touched = true;
        if classes.iter().any(|existing| existing == class) {
            classes.retain(|existing| existing != class);
        } else {
            classes.push(class.to_string());
        }
    }
    if !touched {
        return Ok(false);
    }
    write_classes(doc, node, &classes)
}

fn check_url(attribute: &str, value: &str) -> Result<(), PatchError> {
    if is_safe_url(value) {
        Ok(())
    } else {
        Err(PatchError::UnsafeUrl {
            attribute: attribute.to_string(),
            url: value.to_string(),
        })
    }
}

fn check_srcset(srcset: &str) -> Result<(), PatchError> {
    for candidate in srcset.split(',') {
        if let Some(url) = candidate.split_ascii_whitespace().next() {
            check_url("srcset", url)?;
        }
    }
    Ok(())
}

fn set_attribute(doc: &mut Document, node: NodeId, name: &str, value: &str) -> Result<bool, PatchError> {
    let name = name.trim().to_ascii_lowercase();
    if is_event_handler(&name) {
        return Err(PatchError::UnsafeAttribute { name });
    }
    if URL_ATTRIBUTES.contains(&name.as_str()) {
        check_url(&name, value)?;
    }
    if name == "srcset" {
        check_srcset(value)?;
    }
    Ok(doc.set_attribute(node, &name, value)?)
}

fn set_style(
    doc: &mut Document,
    node: NodeId,
    property: &str,
    value: &str,
    important: bool,
) -> Result<bool, PatchError> {
    let property = property.trim();
    let valid_property = !property.is_empty()
        && property
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid_property {
        return Err(PatchError::InvalidOperation {
            message: format!("invalid style property `{property}`"),
        });
    }
    if value.contains([';', '{', '}']) {
        return Err(PatchError::InvalidOperation {
            message: format!("style value for `{property}` must be a single declaration value"),
        });
    }
    Ok(doc.set_style_property(node, property, value, important)?)
}

fn swap_image(
    doc: &mut Document,
    node: NodeId,
    src: &str,
    srcset: Option<&str>,
    alt: Option<&str>,
) -> Result<bool, PatchError> {
    let image = if doc.tag_name(node) == Some("img") {
        Some(node)
    } else {
        doc.descendants(node)
            .find(|candidate| doc.tag_name(*candidate) == Some("img"))
    };
    let Some(image) = image else {
        return Err(PatchError::InvalidOperation {
            message: format!(
                "imageSwap target <{}> is not and does not contain an <img>",
                doc.tag_name(node).unwrap_or("?")
            ),
        });
    };
    check_url("src", src)?;
    if let Some(srcset) = srcset {
        check_srcset(srcset)?;
    }

    let mut changed = doc.set_attribute(image, "src", src)?;
    changed |= match srcset {
        Some(srcset) => doc.set_attribute(image, "srcset", srcset)?,
        // A stale srcset would keep winning over the new src.
        None => doc.remove_attribute(image, "srcset")?,
    };
    if let Some(alt) = alt {
        changed |= doc.set_attribute(image, "alt", alt)?;
    }
    Ok(changed)
}

/// Stable key for an insertion: same target, position and markup yield the
/// same marker.
pub fn insert_marker(selector: &str, position: InsertPosition, html: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(selector.as_bytes());
    hasher.update([0u8]);
    hasher.update(format!("{position:?}").as_bytes());
    hasher.update([0u8]);
    hasher.update(html.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..12].to_string()
}

fn insert_html(
    doc: &mut Document,
    node: NodeId,
    selector: &str,
    html: &str,
    position: InsertPosition,
) -> Result<Applied, PatchError> {
    let report = sanitize_report(html);
    let mut applied = Applied::changed(false);
    if !report.stripped.is_empty() {
        debug!(stripped = ?report.stripped, "sanitizer removed markup");
        applied = applied.with_notice(Notice::SanitizationStripped {
            items: report.stripped.clone(),
        });
    }

    let outer_parent = || {
        doc.parent_element(node).ok_or_else(|| PatchError::MissingParent {
            selector: selector.to_string(),
        })
    };
    let (parent, reference) = match position {
        InsertPosition::BeforeBegin => (outer_parent()?, Some(node)),
        InsertPosition::AfterBegin => (node, doc.children(node).first().copied()),
        InsertPosition::BeforeEnd => (node, None),
        InsertPosition::AfterEnd => (outer_parent()?, doc.next_sibling(node)),
    };

    let marker = insert_marker(selector, position, &report.html);
    let already_present = doc
        .children(parent)
        .iter()
        .any(|child| doc.attribute(*child, INSERT_MARKER) == Some(marker.as_str()));
    if already_present {
        return Ok(applied.with_notice(Notice::AlreadyInserted));
    }

    let mut nodes = parse_fragment(doc, &report.html);
    if !nodes.is_empty() && !nodes.iter().any(|inserted| doc.is_element(*inserted)) {
        // Text-only fragments have nowhere to carry the marker.
        let wrapper = doc.create_element("span");
        for inserted in &nodes {
            doc.append_child(wrapper, *inserted)?;
        }
        nodes = vec![wrapper];
    }
    for inserted in &nodes {
        if doc.is_element(*inserted) {
            doc.set_attribute(*inserted, INSERT_MARKER, &marker)?;
        }
    }
    for inserted in &nodes {
        doc.insert_before(parent, *inserted, reference)?;
    }
    applied.changed = !nodes.is_empty();
    Ok(applied)
}

fn move_before(
    doc: &mut Document,
    node: NodeId,
    target: NodeId,
    selector: &str,
    target_selector: &str,
) -> Result<bool, PatchError> {
    if node == target {
        return Ok(false);
    }
    if doc.contains(node, target) {
        return Err(PatchError::CircularMove {
            selector: selector.to_string(),
            target: target_selector.to_string(),
        });
    }
    let parent = doc.parent(target).ok_or_else(|| PatchError::MissingParent {
        selector: target_selector.to_string(),
    })?;
    if doc.next_sibling(node) == Some(target) {
        return Ok(false);
    }
    doc.insert_before(parent, node, Some(target))?;
    Ok(true)
}

fn move_after(
    doc: &mut Document,
    node: NodeId,
    target: NodeId,
    selector: &str,
    target_selector: &str,
) -> Result<bool, PatchError> {
    if node == target {
        return Ok(false);
    }
    if doc.contains(node, target) {
        return Err(PatchError::CircularMove {
            selector: selector.to_string(),
            target: target_selector.to_string(),
        });
    }
    let parent = doc.parent(target).ok_or_else(|| PatchError::MissingParent {
        selector: target_selector.to_string(),
    })?;
    if doc.previous_sibling(node) == Some(target) {
        return Ok(false);
    }
    let reference = doc.next_sibling(target);
    doc.insert_before(parent, node, reference)?;
    Ok(true)
}

fn append_to(
    doc: &mut Document,
    node: NodeId,
    container: NodeId,
    selector: &str,
    container_selector: &str,
) -> Result<bool, PatchError> {
    if doc.contains(node, container) {
        return Err(PatchError::CircularMove {
            selector: selector.to_string(),
            target: container_selector.to_string(),
        });
    }
    if doc.parent(node) == Some(container) && doc.last_child(container) == Some(node) {
        return Ok(false);
    }
    doc.append_child(container, node)?;
    Ok(true)
}
