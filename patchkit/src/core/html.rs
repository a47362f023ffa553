//! Tolerant HTML parser and canonical serializer.
//!
//! The parser never fails: malformed markup degrades to text or is dropped.
//! It does not implement implied end tags or foster parenting, so the tree it
//! builds is exactly the tree the serializer writes back out. Serializing and
//! re-parsing any parsed tree yields the same tree, which the sanitizer relies
//! on for idempotence.

use super::dom::{Attribute, Document, NodeData, NodeId};

pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose content is kept verbatim.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];
/// Elements whose content is text with entity decoding but no child tags.
const ESCAPABLE_RAW_TEXT_ELEMENTS: &[&str] = &["textarea", "title"];

pub fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

/// Parses a full document.
pub fn parse_document(html: &str) -> Document {
    let mut doc = Document::new();
    let root = doc.root();
    let doctype = TreeBuilder::new(&mut doc, root).run(html);
    doc.set_doctype(doctype);
    doc
}

/// Parses `html` as a fragment owned by `doc`, returning the detached
/// top-level nodes in source order.
pub fn parse_fragment(doc: &mut Document, html: &str) -> Vec<NodeId> {
    let holder = doc.create_element("template");
    TreeBuilder::new(doc, holder).run(html);
    let nodes = doc.children(holder).to_vec();
    for node in &nodes {
        doc.detach(*node);
    }
    nodes
}

struct TreeBuilder<'a> {
    doc: &'a mut Document,
    stack: Vec<NodeId>,
}

impl<'a> TreeBuilder<'a> {
    fn new(doc: &'a mut Document, base: NodeId) -> Self {
        Self {
            doc,
            stack: vec![base],
        }
    }

    fn current(&self) -> NodeId {
        self.stack[self.stack.len() - 1]
    }

    fn append(&mut self, node: NodeId) {
        let parent = self.current();
        // The base and every pushed node can hold children.
        let _ = self.doc.append_child(parent, node);
    }

    fn append_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let parent = self.current();
        if let Some(last) = self.doc.last_child(parent)
            && let NodeData::Text(existing) = self.doc.data(last)
        {
            let merged = format!("{existing}{text}");
            let _ = self.doc.set_text_content(last, &merged);
            return;
        }
        let node = self.doc.create_text(text);
        self.append(node);
    }

    /// Runs the tokenizer over `html`, returning a doctype if one was seen.
    fn run(mut self, html: &str) -> Option<String> {
        let mut doctype = None;
        let mut cursor = Cursor::new(html);
        let mut text = String::new();

        while !cursor.at_end() {
            if cursor.peek() != Some('<') {
                let start = cursor.pos;
                cursor.advance_until(|c| c == '<');
                text.push_str(&decode_entities(&html[start..cursor.pos]));
                continue;
            }

            match lex_markup(&mut cursor) {
                Markup::Text(literal) => text.push_str(&literal),
                Markup::Comment(body) => {
                    self.flush_text(&mut text);
                    let node = self.doc.create_comment(&body);
                    self.append(node);
                }
                Markup::Doctype(body) => {
                    self.flush_text(&mut text);
                    if doctype.is_none() {
                        doctype = Some(body);
                    }
                }
                Markup::EndTag(name) => {
                    self.flush_text(&mut text);
                    self.close(&name);
                }
                Markup::StartTag {
                    name,
                    attrs,
                    self_closing,
                } => {
                    self.flush_text(&mut text);
                    let element = self.doc.create_element_with_attrs(&name, attrs);
                    self.append(element);
                    if is_void(&name) || self_closing {
                        continue;
                    }
                    if RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
                        let content = cursor.raw_text_until_end_tag(&name);
                        if !content.is_empty() {
                            let node = self.doc.create_text(content);
                            let _ = self.doc.append_child(element, node);
                        }
                    } else if ESCAPABLE_RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
                        let content = decode_entities(cursor.raw_text_until_end_tag(&name));
                        if !content.is_empty() {
                            let node = self.doc.create_text(&content);
                            let _ = self.doc.append_child(element, node);
                        }
                    } else {
                        self.stack.push(element);
                    }
                }
            }
        }
        self.flush_text(&mut text);
        doctype
    }

    fn flush_text(&mut self, text: &mut String) {
        let pending = std::mem::take(text);
        self.append_text(&pending);
    }

    /// Pops up to the nearest open element named `name`; ignores stray end
    /// tags.
    fn close(&mut self, name: &str) {
        let found = self
            .stack
            .iter()
            .skip(1)
            .rposition(|node| self.doc.tag_name(*node) == Some(name));
        if let Some(index) = found {
            self.stack.truncate(index + 1);
        }
    }
}

enum Markup {
    Text(String),
    Comment(String),
    Doctype(String),
    StartTag {
        name: String,
        attrs: Vec<Attribute>,
        self_closing: bool,
    },
    EndTag(String),
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn advance_until(&mut self, stop: impl Fn(char) -> bool) {
        while let Some(c) = self.peek() {
            if stop(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        self.advance_until(|c| !c.is_ascii_whitespace());
    }

    fn starts_with_ignore_case(&self, prefix: &str) -> bool {
        let rest = self.rest().as_bytes();
        rest.len() >= prefix.len() && rest[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
    }

    /// Consumes raw content up to `</name`, plus the end tag itself.
    fn raw_text_until_end_tag(&mut self, name: &str) -> &'a str {
        let start = self.pos;
        let needle = format!("</{name}");
        while !self.at_end() {
            if self.starts_with_ignore_case(&needle) {
                let content = &self.src[start..self.pos];
                self.advance_until(|c| c == '>');
                self.bump();
                return content;
            }
            self.bump();
        }
        &self.src[start..]
    }
}

fn is_tag_name_char(c: char) -> bool {
    !c.is_ascii_whitespace() && c != '/' && c != '>'
}

fn lex_markup(cursor: &mut Cursor<'_>) -> Markup {
    let start = cursor.pos;
    let rest = cursor.rest();

    if rest.starts_with("<!--") {
        cursor.pos += 4;
        let body_start = cursor.pos;
        return match cursor.rest().find("-->") {
            Some(end) => {
                cursor.pos += end + 3;
                Markup::Comment(cursor.src[body_start..body_start + end].to_string())
            }
            None => {
                cursor.pos = cursor.src.len();
                Markup::Comment(cursor.src[body_start..].to_string())
            }
        };
    }

    if cursor.starts_with_ignore_case("<!doctype") {
        cursor.pos += "<!doctype".len();
        let body_start = cursor.pos;
        cursor.advance_until(|c| c == '>');
        let body = cursor.src[body_start..cursor.pos].trim().to_string();
        cursor.bump();
        return Markup::Doctype(body);
    }

    if rest.starts_with("<!") || rest.starts_with("<?") {
        cursor.pos += 2;
        let body_start = cursor.pos;
        cursor.advance_until(|c| c == '>');
        let body = cursor.src[body_start..cursor.pos].to_string();
        cursor.bump();
        return Markup::Comment(body);
    }

    if rest.starts_with("</") {
        let after = rest[2..].chars().next();
        return match after {
            Some(c) if c.is_ascii_alphabetic() => {
                cursor.pos += 2;
                let name_start = cursor.pos;
                cursor.advance_until(|c| !is_tag_name_char(c));
                let name = cursor.src[name_start..cursor.pos].to_ascii_lowercase();
                cursor.advance_until(|c| c == '>');
                if cursor.bump().is_none() {
                    return Markup::Text(decode_entities(&cursor.src[start..]));
                }
                Markup::EndTag(name)
            }
            Some('>') => {
                cursor.pos += 3;
                Markup::Text(String::new())
            }
            Some(_) => {
                cursor.pos += 2;
                let body_start = cursor.pos;
                cursor.advance_until(|c| c == '>');
                let body = cursor.src[body_start..cursor.pos].to_string();
                cursor.bump();
                Markup::Comment(body)
            }
            None => {
                cursor.pos = cursor.src.len();
                Markup::Text(rest.to_string())
            }
        };
    }

    match rest[1..].chars().next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => {
            cursor.bump();
            return Markup::Text("<".to_string());
        }
    }

    match lex_start_tag(cursor) {
        Some(markup) => markup,
        None => {
            // Unterminated tag: the remainder is literal text.
            cursor.pos = cursor.src.len();
            Markup::Text(decode_entities(&cursor.src[start..]))
        }
    }
}

fn lex_start_tag(cursor: &mut Cursor<'_>) -> Option<Markup> {
    cursor.bump();
    let name_start = cursor.pos;
    cursor.advance_until(|c| !is_tag_name_char(c));
    let name = cursor.src[name_start..cursor.pos].to_ascii_lowercase();
    let mut attrs: Vec<Attribute> = Vec::new();

    loop {
        cursor.skip_whitespace();
        match cursor.peek()? {
            '>' => {
                cursor.bump();
                return Some(Markup::StartTag {
                    name,
                    attrs,
                    self_closing: false,
                });
            }
            '/' => {
                cursor.bump();
                if cursor.peek() == Some('>') {
                    cursor.bump();
                    return Some(Markup::StartTag {
                        name,
                        attrs,
                        self_closing: true,
                    });
                }
            }
            _ => {
                let attr_start = cursor.pos;
                cursor.bump();
                cursor.advance_until(|c| c.is_ascii_whitespace() || c == '/' || c == '>' || c == '=');
                let attr_name = cursor.src[attr_start..cursor.pos].to_ascii_lowercase();
                cursor.skip_whitespace();
                let mut value = String::new();
                if cursor.peek() == Some('=') {
                    cursor.bump();
                    cursor.skip_whitespace();
                    value = lex_attr_value(cursor)?;
                }
                if !attrs.iter().any(|attr| attr.name == attr_name) {
                    attrs.push(Attribute {
                        name: attr_name,
                        value,
                    });
                }
            }
        }
    }
}

fn lex_attr_value(cursor: &mut Cursor<'_>) -> Option<String> {
    match cursor.peek()? {
        quote @ ('"' | '\'') => {
            cursor.bump();
            let start = cursor.pos;
            cursor.advance_until(|c| c == quote);
            let raw = &cursor.src[start..cursor.pos];
            cursor.bump()?;
            Some(decode_entities(raw))
        }
        _ => {
            let start = cursor.pos;
            cursor.advance_until(|c| c.is_ascii_whitespace() || c == '>');
            Some(decode_entities(&cursor.src[start..cursor.pos]))
        }
    }
}

const NAMED_ENTITIES: &[(&str, &str)] = &[
    ("amp", "&"),
    ("lt", "<"),
    ("gt", ">"),
    ("quot", "\""),
    ("apos", "'"),
    ("nbsp", "\u{a0}"),
    ("copy", "\u{a9}"),
    ("reg", "\u{ae}"),
    ("trade", "\u{2122}"),
    ("hellip", "\u{2026}"),
    ("mdash", "\u{2014}"),
    ("ndash", "\u{2013}"),
    ("lsquo", "\u{2018}"),
    ("rsquo", "\u{2019}"),
    ("ldquo", "\u{201c}"),
    ("rdquo", "\u{201d}"),
    ("euro", "\u{20ac}"),
];

/// Decodes character references. Unknown or unterminated references are kept
/// literally.
pub fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        match decode_one(rest) {
            Some((decoded, consumed)) => {
                out.push(decoded);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_one(input: &str) -> Option<(char, usize)> {
    let semi = input[1..].find(';')? + 1;
    let body = &input[1..semi];
    if body.is_empty() || body.len() > 10 {
        return None;
    }
    let decoded = if let Some(numeric) = body.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse::<u32>().ok()?,
        };
        match char::from_u32(code) {
            Some(c) if code != 0 => c,
            _ => '\u{fffd}',
        }
    } else {
        let (_, value) = NAMED_ENTITIES.iter().find(|(name, _)| *name == body)?;
        value.chars().next()?
    };
    Some((decoded, semi + 1))
}

pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

/// Serializes the whole document, including the doctype.
pub fn serialize_document(doc: &Document) -> String {
    let mut out = String::new();
    if let Some(doctype) = doc.doctype() {
        out.push_str("<!DOCTYPE ");
        out.push_str(doctype);
        out.push('>');
    }
    for child in doc.children(doc.root()) {
        write_node(doc, *child, &mut out);
    }
    out
}

pub fn outer_html(doc: &Document, node: NodeId) -> String {
    let mut out = String::new();
    write_node(doc, node, &mut out);
    out
}

pub fn inner_html(doc: &Document, node: NodeId) -> String {
    let mut out = String::new();
    for child in doc.children(node) {
        write_node(doc, *child, &mut out);
    }
    out
}

/// Serializes a list of sibling nodes (typically a parsed fragment).
pub fn serialize_nodes(doc: &Document, nodes: &[NodeId]) -> String {
    let mut out = String::new();
    for node in nodes {
        write_node(doc, *node, &mut out);
    }
    out
}

fn write_node(doc: &Document, node: NodeId, out: &mut String) {
    match doc.data(node) {
        NodeData::Document => {
            for child in doc.children(node) {
                write_node(doc, *child, out);
            }
        }
        NodeData::Text(text) => {
            let raw_parent = doc
                .parent(node)
                .and_then(|parent| doc.tag_name(parent))
                .is_some_and(|name| RAW_TEXT_ELEMENTS.contains(&name));
            if raw_parent {
                out.push_str(text);
            } else {
                out.push_str(&escape_text(text));
            }
        }
        NodeData::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
        NodeData::Element(element) => {
            out.push('<');
            out.push_str(&element.name);
            for attr in &element.attrs {
                out.push(' ');
                out.push_str(&attr.name);
                out.push_str("=\"");
                out.push_str(&escape_attr(&attr.value));
                out.push('"');
            }
            out.push('>');
            if is_void(&element.name) {
                return;
            }
            for child in doc.children(node) {
                write_node(doc, *child, out);
            }
            out.push_str("</");
            out.push_str(&element.name);
            out.push('>');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_elements_and_attributes() {
        let doc = parse_document(r#"<div id="a" class='x y'><p>Hi <b>there</b></p><img src=a.png></div>"#);
        let div = doc.document_element().expect("div");
        assert_eq!(doc.attribute(div, "id"), Some("a"));
        assert_eq!(doc.attribute(div, "class"), Some("x y"));
        assert_eq!(doc.text_content(div), "Hi there");
        assert_eq!(
            serialize_document(&doc),
            r#"<div id="a" class="x y"><p>Hi <b>there</b></p><img src="a.png"></div>"#
        );
    }

    #[test]
    fn decodes_entities_in_text_and_attributes() {
        let doc = parse_document(r#"<p title="a &quot;b&quot;">1 &lt; 2 &amp;&amp; &#65;&#x42; &bogus;</p>"#);
        let p = doc.document_element().expect("p");
        assert_eq!(doc.attribute(p, "title"), Some("a \"b\""));
        assert_eq!(doc.text_content(p), "1 < 2 && AB &bogus;");
    }

    #[test]
    fn stray_end_tags_are_ignored_and_unclosed_tags_closed() {
        let doc = parse_document("<div></span><p>text</div>");
        assert_eq!(serialize_document(&doc), "<div><p>text</p></div>");
    }

    #[test]
    fn script_content_is_raw_text() {
        let doc = parse_document("<script>if (a < b) { x = '</div>'; }</script><p>after</p>");
        let script = doc.document_element().expect("script");
        assert_eq!(doc.text_content(script), "if (a < b) { x = '</div>'; }");
        assert!(serialize_document(&doc).starts_with("<script>if (a < b)"));
    }

    #[test]
    fn unterminated_tag_becomes_text() {
        let doc = parse_document("a <b");
        assert_eq!(serialize_document(&doc), "a &lt;b");
    }

    #[test]
    fn doctype_is_preserved() {
        let doc = parse_document("<!doctype html><html><head></head><body>x</body></html>");
        assert_eq!(doc.doctype(), Some("html"));
        assert!(doc.body().is_some());
        assert_eq!(
            serialize_document(&doc),
            "<!DOCTYPE html><html><head></head><body>x</body></html>"
        );
    }

    #[test]
    fn fragment_nodes_are_detached() {
        let mut doc = parse_document("<main></main>");
        let nodes = parse_fragment(&mut doc, "<b>1</b>two<!--c-->");
        assert_eq!(nodes.len(), 3);
        assert!(nodes.iter().all(|node| doc.parent(*node).is_none()));
        assert_eq!(serialize_nodes(&doc, &nodes), "<b>1</b>two<!--c-->");
    }

    #[test]
    fn reparse_of_serialized_tree_is_stable() {
        let inputs = [
            "<ul><li>a<li>b</ul>",
            "<p>x<p>y",
            "<a href='/x?a=1&b=2'>&amp;lt;</a>",
            "<div/><span>t</span>",
            "text < more & <!-- c --> </ >",
        ];
        for input in inputs {
            let first = serialize_document(&parse_document(input));
            let second = serialize_document(&parse_document(&first));
            assert_eq!(first, second, "input {input:?}");
        }
    }
}
