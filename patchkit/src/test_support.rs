//! Test-only helpers for building pages, looking up nodes and laying out
//! fixture files.

use std::fs;

use tempfile::TempDir;

use crate::core::css::select_first;
use crate::core::dom::{Document, NodeId};
use crate::core::geometry::{Rect, StaticGeometry};
use crate::core::html::{outer_html, serialize_document};
use crate::runtime::page::Page;

pub const TEST_URL: &str = "https://shop.test/";

/// Page at [`TEST_URL`] parsed from `html`.
pub fn page_from(html: &str) -> Page {
    Page::from_html(TEST_URL, html)
}

/// First match for `selector`, panicking with the selector on a miss.
pub fn node(doc: &Document, selector: &str) -> NodeId {
    select_first(doc, selector)
        .unwrap_or_else(|err| panic!("invalid selector {selector}: {err}"))
        .unwrap_or_else(|| panic!("no element matches {selector}"))
}

pub fn html_of(doc: &Document, selector: &str) -> String {
    outer_html(doc, node(doc, selector))
}

pub fn snapshot(page: &Page) -> String {
    serialize_document(page.document())
}

/// Geometry with a box per `(selector, rect)` pair.
pub fn geometry(doc: &Document, boxes: &[(&str, Rect)]) -> StaticGeometry {
    let mut geometry = StaticGeometry::new();
    for (selector, rect) in boxes {
        geometry.set_bounds(node(doc, selector), *rect);
    }
    geometry
}

/// Temp directory holding `(relative path, contents)` fixtures.
pub fn fixture_dir(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    for (name, contents) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create fixture dir");
        }
        fs::write(&path, contents).expect("write fixture");
    }
    dir
}
