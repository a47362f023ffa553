//! Drop-zone computation for an in-progress drag.
//!
//! For every accepting container near the pointer the validator proposes one
//! inside-at-end zone plus before/after strips straddling each child's leading
//! and trailing edge. Strips are horizontal in block flow and vertical in row
//! flex containers.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::constraints::{ConstraintViolation, DropPosition, validate_drop};
use super::containers::can_accept_drop;
use super::dom::{Document, NodeId};
use super::geometry::{Geometry, Point, Rect};
use super::ops::Operation;
use super::selector::generate_selector;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DropZoneConfig {
    /// Containers farther than this from the pointer are ignored.
    pub proximity_px: f64,
    /// Thickness of before/after and inside-at-end strips.
    pub strip_px: f64,
}

impl Default for DropZoneConfig {
    fn default() -> Self {
        Self {
            proximity_px: 100.0,
            strip_px: 8.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DropZone {
    #[serde(skip)]
    pub container: NodeId,
    pub position: DropPosition,
    #[serde(skip)]
    pub sibling: Option<NodeId>,
    pub valid: bool,
    pub reason: Option<String>,
    pub rect: Rect,
    pub distance: f64,
}

/// Every zone around the pointer, valid or not, in candidate order.
pub fn evaluate_drop_zones(
    doc: &Document,
    geometry: &dyn Geometry,
    dragged: NodeId,
    candidates: &[NodeId],
    pointer: Point,
    config: &DropZoneConfig,
) -> Vec<DropZone> {
    let mut zones = Vec::new();
    for &container in candidates {
        if container == dragged || !can_accept_drop(doc, geometry, container) {
            continue;
        }
        let Some(bounds) = geometry.bounds(doc, container) else {
            continue;
        };
        if bounds.distance_to(pointer) > config.proximity_px {
            continue;
        }
        let row = geometry.is_row_flow(doc, container);
        let half = config.strip_px / 2.0;

        for child in doc.element_children(container) {
            if child == dragged {
                continue;
            }
            let Some(child_box) = geometry.bounds(doc, child) else {
                continue;
            };
            let (before, after) = if row {
                (
                    Rect::new(child_box.x - half, child_box.y, config.strip_px, child_box.height),
                    Rect::new(child_box.right() - half, child_box.y, config.strip_px, child_box.height),
                )
            } else {
                (
                    Rect::new(child_box.x, child_box.y - half, child_box.width, config.strip_px),
                    Rect::new(child_box.x, child_box.bottom() - half, child_box.width, config.strip_px),
                )
            };
            zones.push(zone(doc, geometry, dragged, container, DropPosition::Before, Some(child), before, pointer));
            zones.push(zone(doc, geometry, dragged, container, DropPosition::After, Some(child), after, pointer));
        }

        let inside = if row {
            Rect::new(bounds.right() - config.strip_px, bounds.y, config.strip_px, bounds.height)
        } else {
            Rect::new(bounds.x, bounds.bottom() - config.strip_px, bounds.width, config.strip_px)
        };
        zones.push(zone(doc, geometry, dragged, container, DropPosition::Inside, None, inside, pointer));
    }
    zones
}

#[allow(clippy::too_many_arguments)]
fn zone(
    doc: &Document,
    geometry: &dyn Geometry,
    dragged: NodeId,
    container: NodeId,
    position: DropPosition,
    sibling: Option<NodeId>,
    rect: Rect,
    pointer: Point,
) -> DropZone {
    let verdict = validate_drop(doc, geometry, dragged, container, position, sibling);
    DropZone {
        container,
        position,
        sibling,
        valid: verdict.is_ok(),
        reason: verdict.err().map(|violation| violation.reason),
        rect,
        distance: rect.distance_to(pointer),
    }
}

/// Valid zones only, nearest first.
pub fn compute_drop_zones(
    doc: &Document,
    geometry: &dyn Geometry,
    dragged: NodeId,
    candidates: &[NodeId],
    pointer: Point,
    config: &DropZoneConfig,
) -> Vec<DropZone> {
    let mut zones: Vec<DropZone> = evaluate_drop_zones(doc, geometry, dragged, candidates, pointer, config)
        .into_iter()
        .filter(|zone| zone.valid)
        .collect();
    zones.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    debug!(count = zones.len(), "computed drop zones");
    zones
}

/// Converts a drop into the equivalent move operation. Re-validates, so a
/// rejected move never yields an operation.
pub fn plan_move(
    doc: &Document,
    geometry: &dyn Geometry,
    dragged: NodeId,
    zone: &DropZone,
) -> Result<Operation, ConstraintViolation> {
    plan_drop(doc, geometry, dragged, zone.container, zone.position, zone.sibling)
}

pub fn plan_drop(
    doc: &Document,
    geometry: &dyn Geometry,
    dragged: NodeId,
    container: NodeId,
    position: DropPosition,
    sibling: Option<NodeId>,
) -> Result<Operation, ConstraintViolation> {
    validate_drop(doc, geometry, dragged, container, position, sibling)?;
    let selector = generate_selector(doc, dragged).selector;
    let op = match (position, sibling) {
        (DropPosition::Before, Some(sibling)) => Operation::MoveBefore {
            selector,
            target_selector: generate_selector(doc, sibling).selector,
        },
        (DropPosition::After, Some(sibling)) => Operation::MoveAfter {
            selector,
            target_selector: generate_selector(doc, sibling).selector,
        },
        _ => Operation::AppendTo {
            selector,
            container_selector: generate_selector(doc, container).selector,
        },
    };
    Ok(op)
}
