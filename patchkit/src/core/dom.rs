//! Arena-backed document model.
//!
//! Nodes live in a flat arena addressed by [`NodeId`]. Removing a node only
//! unlinks it from its parent, so handles to detached subtrees stay valid and
//! can be re-inserted (moves) or inspected after removal (mutation records).
//! [`Document::reclaim_detached`] returns unreachable slots to a free list;
//! handles into reclaimed subtrees must not be used afterwards.
//!
//! Mutations performed through this API append [`MutationRecord`]s to an
//! internal log while recording is enabled and the mutated node is connected
//! to the document. The page runtime drains that log into observers.

use thiserror::Error;

/// Handle to a node in a [`Document`] arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElementData {
    /// Lowercase tag name.
    pub name: String,
    pub attrs: Vec<Attribute>,
}

impl ElementData {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeData {
    Document,
    Element(ElementData),
    Text(String),
    Comment(String),
}

#[derive(Clone, Debug)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    free: bool,
}

/// A single observed change, shaped after DOM `MutationRecord`s.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationRecord {
    ChildList {
        target: NodeId,
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
    },
    Attributes {
        target: NodeId,
        name: String,
        old_value: Option<String>,
    },
    CharacterData {
        target: NodeId,
    },
}

impl MutationRecord {
    pub fn target(&self) -> NodeId {
        match self {
            MutationRecord::ChildList { target, .. }
            | MutationRecord::Attributes { target, .. }
            | MutationRecord::CharacterData { target } => *target,
        }
    }

    /// Every node the record refers to.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        let (added, removed): (&[NodeId], &[NodeId]) = match self {
            MutationRecord::ChildList { added, removed, .. } => (added.as_slice(), removed.as_slice()),
            _ => (&[], &[]),
        };
        std::iter::once(self.target()).chain(added.iter().chain(removed).copied())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("node {0:?} is not an element")]
    NotAnElement(NodeId),
    #[error("cannot insert a node into its own subtree")]
    HierarchyRequest,
    #[error("reference node is not a child of the parent")]
    NotAChild,
    #[error("node {0:?} cannot have children")]
    NotAContainer(NodeId),
}

#[derive(Clone, Debug)]
pub struct Document {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    root: NodeId,
    doctype: Option<String>,
    records: Vec<MutationRecord>,
    recording: bool,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Empty document containing only the root node.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                data: NodeData::Document,
                parent: None,
                children: Vec::new(),
                free: false,
            }],
            free: Vec::new(),
            root: NodeId(0),
            doctype: None,
            records: Vec::new(),
            recording: false,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn doctype(&self) -> Option<&str> {
        self.doctype.as_deref()
    }

    pub fn set_doctype(&mut self, doctype: Option<String>) {
        self.doctype = doctype;
    }

    /// First element child of the root (`<html>` for full documents).
    pub fn document_element(&self) -> Option<NodeId> {
        self.element_children(self.root).next()
    }

    pub fn head(&self) -> Option<NodeId> {
        self.named_child_of_document_element("head")
    }

    pub fn body(&self) -> Option<NodeId> {
        self.named_child_of_document_element("body")
    }

    fn named_child_of_document_element(&self, name: &str) -> Option<NodeId> {
        let html = self.document_element()?;
        self.element_children(html)
            .find(|child| self.tag_name(*child) == Some(name))
    }

    // -- construction -----------------------------------------------------

    fn push_node(&mut self, data: NodeData) -> NodeId {
        let node = Node {
            data,
            parent: None,
            children: Vec::new(),
            free: false,
        };
        if let Some(id) = self.free.pop() {
            self.nodes[id.0] = node;
            return id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Frees every node that is neither connected nor referenced by a
    /// pending mutation record. Returns the number of slots reclaimed.
    pub fn reclaim_detached(&mut self) -> usize {
        self.reclaim_detached_except(&[])
    }

    /// Like [`Document::reclaim_detached`], also keeping the subtrees of
    /// `pinned` alive.
    pub fn reclaim_detached_except(&mut self, pinned: &[NodeId]) -> usize {
        let mut reachable = vec![false; self.nodes.len()];
        let mut stack = vec![self.root];
        stack.extend(pinned.iter().copied());
        stack.extend(self.records.iter().flat_map(MutationRecord::nodes));
        while let Some(node) = stack.pop() {
            if std::mem::replace(&mut reachable[node.0], true) {
                continue;
            }
            stack.extend(self.nodes[node.0].children.iter().copied());
        }

        let mut reclaimed = 0;
        for (index, node) in self.nodes.iter_mut().enumerate() {
            if reachable[index] || node.free {
                continue;
            }
            node.free = true;
            node.parent = None;
            node.children.clear();
            self.free.push(NodeId(index));
            reclaimed += 1;
        }
        reclaimed
    }

    /// Number of allocated (non-free) arena slots, detached nodes included.
    pub fn live_node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Total arena capacity in slots.
    pub fn arena_len(&self) -> usize {
        self.nodes.len()
    }

    pub fn create_element(&mut self, name: &str) -> NodeId {
        self.push_node(NodeData::Element(ElementData {
            name: name.to_ascii_lowercase(),
            attrs: Vec::new(),
        }))
    }

    pub fn create_element_with_attrs(&mut self, name: &str, attrs: Vec<Attribute>) -> NodeId {
        self.push_node(NodeData::Element(ElementData {
            name: name.to_ascii_lowercase(),
            attrs,
        }))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push_node(NodeData::Text(text.to_string()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.push_node(NodeData::Comment(text.to_string()))
    }

    /// Deep-copies `node` into a new detached subtree.
    pub fn clone_subtree(&mut self, node: NodeId) -> NodeId {
        let copy = self.push_node(self.nodes[node.0].data.clone());
        let children = self.nodes[node.0].children.clone();
        for child in children {
            let child_copy = self.clone_subtree(child);
            self.nodes[child_copy.0].parent = Some(copy);
            self.nodes[copy.0].children.push(child_copy);
        }
        copy
    }

    // -- inspection -------------------------------------------------------

    pub fn data(&self, node: NodeId) -> &NodeData {
        &self.nodes[node.0].data
    }

    pub fn element(&self, node: NodeId) -> Option<&ElementData> {
        match &self.nodes[node.0].data {
            NodeData::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        self.element(node).is_some()
    }

    pub fn tag_name(&self, node: NodeId) -> Option<&str> {
        self.element(node).map(|element| element.name.as_str())
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    /// Parent only when it is an element (not the document root).
    pub fn parent_element(&self, node: NodeId) -> Option<NodeId> {
        self.parent(node).filter(|parent| self.is_element(*parent))
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.0].children
    }

    pub fn element_children(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[node.0]
            .children
            .iter()
            .copied()
            .filter(|child| self.is_element(*child))
    }

    fn position_in_parent(&self, node: NodeId) -> Option<(NodeId, usize)> {
        let parent = self.parent(node)?;
        let index = self.nodes[parent.0]
            .children
            .iter()
            .position(|child| *child == node)?;
        Some((parent, index))
    }

    pub fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let (parent, index) = self.position_in_parent(node)?;
        self.nodes[parent.0].children.get(index + 1).copied()
    }

    pub fn previous_sibling(&self, node: NodeId) -> Option<NodeId> {
        let (parent, index) = self.position_in_parent(node)?;
        index
            .checked_sub(1)
            .and_then(|prev| self.nodes[parent.0].children.get(prev).copied())
    }

    pub fn last_child(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].children.last().copied()
    }

    /// 1-based position among element siblings, as used by `:nth-child`.
    pub fn element_index(&self, node: NodeId) -> usize {
        match self.parent(node) {
            Some(parent) => {
                self.element_children(parent)
                    .position(|child| child == node)
                    .unwrap_or(0)
                    + 1
            }
            None => 1,
        }
    }

    pub fn element_sibling_count(&self, node: NodeId) -> usize {
        match self.parent(node) {
            Some(parent) => self.element_children(parent).count(),
            None => 1,
        }
    }

    /// Ancestors from the parent up to the root, excluding `node`.
    pub fn ancestors(&self, node: NodeId) -> Ancestors<'_> {
        Ancestors {
            doc: self,
            next: self.parent(node),
        }
    }

    /// Inclusive containment: `contains(a, a)` is true.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        node == ancestor || self.ancestors(node).any(|candidate| candidate == ancestor)
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        self.contains(self.root, node)
    }

    /// Preorder traversal of the subtree below `node`, excluding `node`.
    pub fn descendants(&self, node: NodeId) -> Descendants<'_> {
        let mut stack: Vec<NodeId> = self.children(node).to_vec();
        stack.reverse();
        Descendants { doc: self, stack }
    }

    /// Connected elements in document order.
    pub fn elements(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.descendants(self.root)
            .filter(|node| self.is_element(*node))
    }

    pub fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        self.elements()
            .find(|node| self.attribute(*node, "id") == Some(id))
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.element(node).and_then(|element| element.attr(name))
    }

    pub fn has_attribute(&self, node: NodeId, name: &str) -> bool {
        self.attribute(node, name).is_some()
    }

    pub fn classes(&self, node: NodeId) -> Vec<&str> {
        self.attribute(node, "class")
            .map(|value| value.split_ascii_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.classes(node).contains(&class)
    }

    pub fn text_content(&self, node: NodeId) -> String {
        match &self.nodes[node.0].data {
            NodeData::Text(text) | NodeData::Comment(text) => text.clone(),
            _ => {
                let mut out = String::new();
                for descendant in self.descendants(node) {
                    if let NodeData::Text(text) = &self.nodes[descendant.0].data {
                        out.push_str(text);
                    }
                }
                out
            }
        }
    }

    // -- mutation records -------------------------------------------------

    pub fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
        if !recording {
            self.records.clear();
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.records)
    }

    pub fn has_pending_records(&self) -> bool {
        !self.records.is_empty()
    }

    fn record(&mut self, record: MutationRecord) {
        if self.recording && self.is_connected(record.target()) {
            self.records.push(record);
        }
    }

    // -- tree mutation ----------------------------------------------------

    fn can_have_children(&self, node: NodeId) -> bool {
        matches!(
            self.nodes[node.0].data,
            NodeData::Document | NodeData::Element(_)
        )
    }

    /// Unlinks `node` from its parent. Returns false when already detached.
    pub fn detach(&mut self, node: NodeId) -> bool {
        let Some((parent, index)) = self.position_in_parent(node) else {
            return false;
        };
        self.record(MutationRecord::ChildList {
            target: parent,
            added: Vec::new(),
            removed: vec![node],
        });
        self.nodes[parent.0].children.remove(index);
        self.nodes[node.0].parent = None;
        true
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.insert_before(parent, child, None)
    }

    /// Inserts `child` into `parent` before `reference` (or at the end),
    /// detaching it from its current position first.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<(), DomError> {
        if !self.can_have_children(parent) {
            return Err(DomError::NotAContainer(parent));
        }
        if self.contains(child, parent) {
            return Err(DomError::HierarchyRequest);
        }
        if let Some(reference) = reference {
            if reference == child {
                return Ok(());
            }
            if self.parent(reference) != Some(parent) {
                return Err(DomError::NotAChild);
            }
        }

        self.detach(child);
        let index = match reference {
            Some(reference) => self.nodes[parent.0]
                .children
                .iter()
                .position(|existing| *existing == reference)
                .ok_or(DomError::NotAChild)?,
            None => self.nodes[parent.0].children.len(),
        };
        self.nodes[parent.0].children.insert(index, child);
        self.nodes[child.0].parent = Some(parent);
        self.record(MutationRecord::ChildList {
            target: parent,
            added: vec![child],
            removed: Vec::new(),
        });
        Ok(())
    }

    /// Replaces all children of `node` with `children`.
    pub fn replace_children(&mut self, node: NodeId, children: &[NodeId]) -> Result<(), DomError> {
        for existing in self.children(node).to_vec() {
            self.detach(existing);
        }
        for child in children {
            self.append_child(node, *child)?;
        }
        Ok(())
    }

    /// Sets an attribute. Returns whether the stored value changed.
    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<bool, DomError> {
        let name = name.to_ascii_lowercase();
        let NodeData::Element(element) = &mut self.nodes[node.0].data else {
            return Err(DomError::NotAnElement(node));
        };
        let old_value = match element.attrs.iter_mut().find(|attr| attr.name == name) {
            Some(attr) if attr.value == value => return Ok(false),
            Some(attr) => Some(std::mem::replace(&mut attr.value, value.to_string())),
            None => {
                element.attrs.push(Attribute {
                    name: name.clone(),
                    value: value.to_string(),
                });
                None
            }
        };
        self.record(MutationRecord::Attributes {
            target: node,
            name,
            old_value,
        });
        Ok(true)
    }

    /// Removes an attribute. Returns whether it was present.
    pub fn remove_attribute(&mut self, node: NodeId, name: &str) -> Result<bool, DomError> {
        let NodeData::Element(element) = &mut self.nodes[node.0].data else {
            return Err(DomError::NotAnElement(node));
        };
        let Some(index) = element.attrs.iter().position(|attr| attr.name == name) else {
            return Ok(false);
        };
        let removed = element.attrs.remove(index);
        self.record(MutationRecord::Attributes {
            target: node,
            name: removed.name,
            old_value: Some(removed.value),
        });
        Ok(true)
    }

    /// Replaces the children of `node` with a single text node.
    ///
    /// No-op (returns false) when the node already holds exactly that text.
    pub fn set_text_content(&mut self, node: NodeId, text: &str) -> Result<bool, DomError> {
        if let NodeData::Text(existing) | NodeData::Comment(existing) = &mut self.nodes[node.0].data {
            if existing == text {
                return Ok(false);
            }
            *existing = text.to_string();
            self.record(MutationRecord::CharacterData { target: node });
            return Ok(true);
        }
        if !self.can_have_children(node) {
            return Err(DomError::NotAContainer(node));
        }

        let children = self.children(node);
        let already = match children {
            [] => text.is_empty(),
            [only] => matches!(&self.nodes[only.0].data, NodeData::Text(existing) if existing == text),
            _ => false,
        };
        if already {
            return Ok(false);
        }

        for existing in self.children(node).to_vec() {
            self.detach(existing);
        }
        if !text.is_empty() {
            let text_node = self.create_text(text);
            self.append_child(node, text_node)?;
        }
        Ok(true)
    }

    // -- inline style -----------------------------------------------------

    /// Inline style declarations in source order.
    pub fn style_declarations(&self, node: NodeId) -> Vec<StyleDeclaration> {
        self.attribute(node, "style")
            .map(parse_style_attribute)
            .unwrap_or_default()
    }

    pub fn style_property(&self, node: NodeId, property: &str) -> Option<String> {
        let property = property.trim().to_ascii_lowercase();
        self.style_declarations(node)
            .into_iter()
            .rev()
            .find(|decl| decl.property == property)
            .map(|decl| decl.value)
    }

    /// Sets one inline style property, re-serializing the `style` attribute.
    pub fn set_style_property(
        &mut self,
        node: NodeId,
        property: &str,
        value: &str,
        important: bool,
    ) -> Result<bool, DomError> {
        let property = property.trim().to_ascii_lowercase();
        let mut decls = self.style_declarations(node);
        decls.retain(|decl| decl.property != property);
        if !value.trim().is_empty() {
            decls.push(StyleDeclaration {
                property,
                value: value.trim().to_string(),
                important,
            });
        }
        let serialized = serialize_style(&decls);
        if serialized.is_empty() {
            return self.remove_attribute(node, "style");
        }
        self.set_attribute(node, "style", &serialized)
    }
}

pub struct Ancestors<'a> {
    doc: &'a Document,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.doc.parent(current);
        Some(current)
    }
}

pub struct Descendants<'a> {
    doc: &'a Document,
    stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.stack.pop()?;
        self.stack
            .extend(self.doc.children(current).iter().rev().copied());
        Some(current)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StyleDeclaration {
    pub property: String,
    pub value: String,
    pub important: bool,
}

pub fn parse_style_attribute(style: &str) -> Vec<StyleDeclaration> {
    style
        .split(';')
        .filter_map(|chunk| {
            let (property, value) = chunk.split_once(':')?;
            let property = property.trim().to_ascii_lowercase();
            if property.is_empty() {
                return None;
            }
            let mut value = value.trim();
            let mut important = false;
            if let Some(stripped) = strip_important(value) {
                value = stripped;
                important = true;
            }
            Some(StyleDeclaration {
                property,
                value: value.to_string(),
                important,
            })
        })
        .collect()
}

fn strip_important(value: &str) -> Option<&str> {
    let bang = value.rfind('!')?;
    let (head, tail) = value.split_at(bang);
    tail[1..]
        .trim()
        .eq_ignore_ascii_case("important")
        .then(|| head.trim_end())
}

pub fn serialize_style(decls: &[StyleDeclaration]) -> String {
    decls
        .iter()
        .map(|decl| {
            if decl.important {
                format!("{}: {} !important;", decl.property, decl.value)
            } else {
                format!("{}: {};", decl.property, decl.value)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> (Document, NodeId, NodeId, NodeId) {
        let mut doc = Document::new();
        let div = doc.create_element("div");
        let a = doc.create_element("span");
        let b = doc.create_element("p");
        doc.append_child(doc.root(), div).expect("append div");
        doc.append_child(div, a).expect("append a");
        doc.append_child(div, b).expect("append b");
        (doc, div, a, b)
    }

    #[test]
    fn insert_before_moves_existing_node() {
        let (mut doc, div, a, b) = tree();
        doc.insert_before(div, b, Some(a)).expect("move");
        assert_eq!(doc.children(div), &[b, a]);
        assert_eq!(doc.parent(b), Some(div));
    }

    #[test]
    fn insert_into_own_subtree_is_rejected() {
        let (mut doc, div, a, _) = tree();
        let err = doc.append_child(a, div).expect_err("cycle");
        assert_eq!(err, DomError::HierarchyRequest);
    }

    #[test]
    fn detached_nodes_keep_their_subtree() {
        let (mut doc, div, a, _) = tree();
        assert!(doc.detach(div));
        assert!(!doc.is_connected(a));
        assert_eq!(doc.parent(a), Some(div));
        assert!(!doc.detach(div));
    }

    #[test]
    fn set_attribute_reports_change_only_once() {
        let (mut doc, div, _, _) = tree();
        assert!(doc.set_attribute(div, "title", "x").expect("set"));
        assert!(!doc.set_attribute(div, "title", "x").expect("set again"));
    }

    #[test]
    fn records_only_connected_changes() {
        let (mut doc, div, a, _) = tree();
        doc.set_recording(true);
        doc.set_attribute(a, "id", "one").expect("set");
        doc.detach(div);
        doc.set_attribute(a, "id", "two").expect("set detached");
        let records = doc.take_records();
        assert_eq!(records.len(), 2);
        assert!(matches!(records[1], MutationRecord::ChildList { ref removed, .. } if removed == &[div]));
    }

    #[test]
    fn set_text_content_is_noop_for_identical_text() {
        let (mut doc, div, _, _) = tree();
        assert!(doc.set_text_content(div, "hello").expect("set"));
        doc.set_recording(true);
        assert!(!doc.set_text_content(div, "hello").expect("set again"));
        assert!(doc.take_records().is_empty());
        assert_eq!(doc.text_content(div), "hello");
    }

    #[test]
    fn style_property_round_trips_through_attribute() {
        let (mut doc, div, _, _) = tree();
        doc.set_attribute(div, "style", "color:red;margin : 0").expect("style");
        assert!(doc.set_style_property(div, "color", "blue", true).expect("set"));
        assert_eq!(
            doc.attribute(div, "style"),
            Some("margin: 0; color: blue !important;")
        );
        assert!(!doc.set_style_property(div, "color", "blue", true).expect("again"));
        assert_eq!(doc.style_property(div, "COLOR").as_deref(), Some("blue"));
    }

    #[test]
    fn clone_subtree_is_detached_deep_copy() {
        let (mut doc, div, _, _) = tree();
        let copy = doc.clone_subtree(div);
        assert_eq!(doc.parent(copy), None);
        assert_eq!(doc.children(copy).len(), 2);
        assert_ne!(doc.children(copy)[0], doc.children(div)[0]);
    }

    #[test]
    fn element_index_counts_only_elements() {
        let (mut doc, div, a, b) = tree();
        let text = doc.create_text(" ");
        doc.insert_before(div, text, Some(a)).expect("text");
        assert_eq!(doc.element_index(a), 1);
        assert_eq!(doc.element_index(b), 2);
    }

    #[test]
    fn reclaim_frees_detached_subtrees_and_reuses_slots() {
        let (mut doc, div, a, _) = tree();
        let inner = doc.create_text("gone");
        doc.append_child(a, inner).expect("text");
        doc.detach(a);
        let arena = doc.arena_len();

        assert_eq!(doc.reclaim_detached(), 2);
        assert_eq!(doc.live_node_count(), arena - 2);
        assert_eq!(doc.reclaim_detached(), 0);

        let fresh = doc.create_element("em");
        doc.append_child(div, fresh).expect("append");
        assert_eq!(doc.arena_len(), arena);
        assert_eq!(doc.children(div).len(), 2);
    }

    #[test]
    fn pending_records_and_pins_keep_nodes_alive() {
        let (mut doc, div, a, b) = tree();
        doc.set_recording(true);
        doc.detach(a);
        assert_eq!(doc.reclaim_detached(), 0);
        assert_eq!(doc.tag_name(a), Some("span"));

        doc.take_records();
        doc.set_recording(false);
        doc.detach(b);
        assert_eq!(doc.reclaim_detached_except(&[b]), 1);
        assert_eq!(doc.tag_name(b), Some("p"));
        doc.append_child(div, b).expect("reinsert pinned");
        assert_eq!(doc.children(div), &[b]);
    }

    #[test]
    fn repeated_text_replacement_keeps_arena_bounded() {
        let (mut doc, div, _, _) = tree();
        for round in 0..500 {
            let text = if round % 2 == 0 { "A" } else { "B" };
            assert!(doc.set_text_content(div, text).expect("set"));
            doc.reclaim_detached();
        }
        assert!(doc.arena_len() <= 6, "arena grew to {}", doc.arena_len());
        assert_eq!(doc.text_content(div), "B");
    }
}
