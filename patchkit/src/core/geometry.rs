//! Layout capability used by drop-zone computation.
//!
//! Layout is not computed here. Hosts supply element boxes through
//! [`Geometry`]; [`StaticGeometry`] is a box map with display information read
//! from inline styles, overridable per node.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::dom::{Document, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x && point.x <= self.right() && point.y >= self.y && point.y <= self.bottom()
    }

    /// Euclidean distance from `point` to the nearest edge; zero inside.
    pub fn distance_to(&self, point: Point) -> f64 {
        let dx = (self.x - point.x).max(0.0).max(point.x - self.right());
        let dy = (self.y - point.y).max(0.0).max(point.y - self.bottom());
        dx.hypot(dy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Display {
    Block,
    Inline,
    InlineBlock,
    Flex,
    InlineFlex,
    Grid,
    InlineGrid,
    Table,
    None,
}

impl Display {
    pub fn parse(value: &str) -> Option<Self> {
        let display = match value.trim().to_ascii_lowercase().as_str() {
            "block" | "list-item" | "flow-root" => Display::Block,
            "inline" | "contents" => Display::Inline,
            "inline-block" => Display::InlineBlock,
            "flex" => Display::Flex,
            "inline-flex" => Display::InlineFlex,
            "grid" => Display::Grid,
            "inline-grid" => Display::InlineGrid,
            "table" | "table-row-group" | "table-row" | "table-cell" => Display::Table,
            "none" => Display::None,
            _ => return None,
        };
        Some(display)
    }

    pub fn is_flex_or_grid(self) -> bool {
        matches!(
            self,
            Display::Flex | Display::InlineFlex | Display::Grid | Display::InlineGrid
        )
    }

    pub fn is_inline(self) -> bool {
        matches!(self, Display::Inline)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlexDirection {
    Row,
    RowReverse,
    Column,
    ColumnReverse,
}

impl FlexDirection {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "row" => Some(FlexDirection::Row),
            "row-reverse" => Some(FlexDirection::RowReverse),
            "column" => Some(FlexDirection::Column),
            "column-reverse" => Some(FlexDirection::ColumnReverse),
            _ => None,
        }
    }

    pub fn is_row(self) -> bool {
        matches!(self, FlexDirection::Row | FlexDirection::RowReverse)
    }
}

const INLINE_TAGS: &[&str] = &[
    "a", "abbr", "b", "bdi", "bdo", "br", "cite", "code", "data", "dfn", "em", "i", "img", "input",
    "kbd", "label", "mark", "q", "s", "samp", "select", "small", "span", "strong", "sub", "sup",
    "textarea", "time", "u", "var", "button",
];

const HIDDEN_TAGS: &[&str] = &[
    "head", "script", "style", "meta", "link", "title", "base", "template", "noscript",
];

/// Default `display` for an element with no styling.
pub fn default_display(tag: &str) -> Display {
    if HIDDEN_TAGS.contains(&tag) {
        Display::None
    } else if INLINE_TAGS.contains(&tag) {
        Display::Inline
    } else if tag == "table" {
        Display::Table
    } else {
        Display::Block
    }
}

/// Element boxes and computed layout properties.
pub trait Geometry {
    fn bounds(&self, doc: &Document, node: NodeId) -> Option<Rect>;

    fn display(&self, doc: &Document, node: NodeId) -> Display {
        inline_display(doc, node)
    }

    fn flex_direction(&self, doc: &Document, node: NodeId) -> FlexDirection {
        doc.style_property(node, "flex-direction")
            .and_then(|value| FlexDirection::parse(&value))
            .unwrap_or(FlexDirection::Row)
    }

    /// True when children of `node` flow horizontally.
    fn is_row_flow(&self, doc: &Document, node: NodeId) -> bool {
        matches!(self.display(doc, node), Display::Flex | Display::InlineFlex)
            && self.flex_direction(doc, node).is_row()
    }
}

/// Display from the inline `style` attribute, falling back to tag defaults.
pub fn inline_display(doc: &Document, node: NodeId) -> Display {
    doc.style_property(node, "display")
        .and_then(|value| Display::parse(&value))
        .unwrap_or_else(|| default_display(doc.tag_name(node).unwrap_or("")))
}

/// Fixed box map, for hosts that measure once and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticGeometry {
    boxes: HashMap<NodeId, Rect>,
    displays: HashMap<NodeId, Display>,
}

impl StaticGeometry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bounds(&mut self, node: NodeId, rect: Rect) -> &mut Self {
        self.boxes.insert(node, rect);
        self
    }

    pub fn set_display(&mut self, node: NodeId, display: Display) -> &mut Self {
        self.displays.insert(node, display);
        self
    }
}

impl Geometry for StaticGeometry {
    fn bounds(&self, _doc: &Document, node: NodeId) -> Option<Rect> {
        self.boxes.get(&node).copied()
    }

    fn display(&self, doc: &Document, node: NodeId) -> Display {
        self.displays
            .get(&node)
            .copied()
            .unwrap_or_else(|| inline_display(doc, node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::css::select_first;
    use crate::core::html::parse_document;

    #[test]
    fn distance_is_zero_inside_and_euclidean_outside() {
        let rect = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(rect.distance_to(Point::new(5.0, 5.0)), 0.0);
        assert_eq!(rect.distance_to(Point::new(13.0, 14.0)), 5.0);
        assert_eq!(rect.distance_to(Point::new(-2.0, 5.0)), 2.0);
    }

    #[test]
    fn display_comes_from_inline_style_then_tag() {
        let doc = parse_document(
            r#"<div style="display: flex; flex-direction: column"><span>a</span></div>"#,
        );
        let div = select_first(&doc, "div").expect("parse").expect("div");
        let span = select_first(&doc, "span").expect("parse").expect("span");
        let geometry = StaticGeometry::new();
        assert_eq!(geometry.display(&doc, div), Display::Flex);
        assert!(!geometry.is_row_flow(&doc, div));
        assert_eq!(geometry.display(&doc, span), Display::Inline);
    }

    #[test]
    fn static_overrides_win() {
        let doc = parse_document("<section></section>");
        let section = doc.document_element().expect("section");
        let mut geometry = StaticGeometry::new();
        geometry.set_display(section, Display::Flex);
        assert!(geometry.is_row_flow(&doc, section));
    }
}
