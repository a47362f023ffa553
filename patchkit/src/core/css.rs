//! CSS selector parsing, matching and escaping.
//!
//! Supports the subset operations and generated selectors need: type and
//! universal selectors, `#id`, `.class`, attribute selectors with the
//! `= ~= |= ^= $= *=` operators and an optional `i` flag, the structural
//! pseudo-classes (`:root`, `:first-child`, `:last-child`, `:only-child`,
//! `:nth-child()`, `:nth-last-child()`, `:nth-of-type()`), the four
//! combinators, and selector lists.

use thiserror::Error;

use super::dom::{Document, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (at offset {offset})")]
pub struct SelectorError {
    pub message: String,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorList(pub Vec<ComplexSelector>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexSelector {
    compounds: Vec<CompoundSelector>,
    /// `combinators[i]` joins `compounds[i]` and `compounds[i + 1]`.
    combinators: Vec<Combinator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
    NextSibling,
    SubsequentSibling,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CompoundSelector {
    tag: Option<String>,
    simple: Vec<SimpleSelector>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SimpleSelector {
    Id(String),
    Class(String),
    Attribute {
        name: String,
        matcher: Option<(AttrOp, String)>,
        case_insensitive: bool,
    },
    Root,
    FirstChild,
    LastChild,
    OnlyChild,
    NthChild(Nth),
    NthLastChild(Nth),
    NthOfType(Nth),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrOp {
    Equals,
    Includes,
    DashMatch,
    Prefix,
    Suffix,
    Substring,
}

/// `an+b` with 1-based indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Nth {
    a: i64,
    b: i64,
}

impl Nth {
    fn matches(self, index: usize) -> bool {
        let index = index as i64;
        if self.a == 0 {
            return index == self.b;
        }
        let diff = index - self.b;
        diff % self.a == 0 && diff / self.a >= 0
    }
}

/// Parses a selector list.
pub fn parse_selector(input: &str) -> Result<SelectorList, SelectorError> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
    };
    let list = parser.parse_list()?;
    Ok(list)
}

impl SelectorList {
    pub fn matches(&self, doc: &Document, node: NodeId) -> bool {
        doc.is_element(node)
            && self
                .0
                .iter()
                .any(|complex| match_from(doc, node, complex, complex.compounds.len() - 1))
    }

    /// True when any compound uses a positional pseudo-class.
    pub fn is_position_based(&self) -> bool {
        self.0.iter().any(|complex| {
            complex.compounds.iter().any(|compound| {
                compound.simple.iter().any(|simple| {
                    matches!(
                        simple,
                        SimpleSelector::NthChild(_)
                            | SimpleSelector::NthLastChild(_)
                            | SimpleSelector::NthOfType(_)
                            | SimpleSelector::FirstChild
                            | SimpleSelector::LastChild
                    )
                })
            })
        })
    }
}

/// All connected elements matching `selector`, in document order.
pub fn query_selector_all(doc: &Document, selector: &SelectorList) -> Vec<NodeId> {
    doc.elements()
        .filter(|node| selector.matches(doc, *node))
        .collect()
}

pub fn query_selector(doc: &Document, selector: &SelectorList) -> Option<NodeId> {
    doc.elements().find(|node| selector.matches(doc, *node))
}

/// Parses and resolves `selector` in one step.
pub fn select_all(doc: &Document, selector: &str) -> Result<Vec<NodeId>, SelectorError> {
    let parsed = parse_selector(selector)?;
    Ok(query_selector_all(doc, &parsed))
}

pub fn select_first(doc: &Document, selector: &str) -> Result<Option<NodeId>, SelectorError> {
    let parsed = parse_selector(selector)?;
    Ok(query_selector(doc, &parsed))
}

fn previous_element_sibling(doc: &Document, node: NodeId) -> Option<NodeId> {
    let mut current = doc.previous_sibling(node);
    while let Some(sibling) = current {
        if doc.is_element(sibling) {
            return Some(sibling);
        }
        current = doc.previous_sibling(sibling);
    }
    None
}

fn match_from(doc: &Document, node: NodeId, complex: &ComplexSelector, index: usize) -> bool {
    if !matches_compound(doc, node, &complex.compounds[index]) {
        return false;
    }
    if index == 0 {
        return true;
    }
    match complex.combinators[index - 1] {
        Combinator::Child => doc
            .parent_element(node)
            .is_some_and(|parent| match_from(doc, parent, complex, index - 1)),
        Combinator::Descendant => doc
            .ancestors(node)
            .filter(|ancestor| doc.is_element(*ancestor))
            .any(|ancestor| match_from(doc, ancestor, complex, index - 1)),
        Combinator::NextSibling => previous_element_sibling(doc, node)
            .is_some_and(|sibling| match_from(doc, sibling, complex, index - 1)),
        Combinator::SubsequentSibling => {
            let mut current = previous_element_sibling(doc, node);
            while let Some(sibling) = current {
                if match_from(doc, sibling, complex, index - 1) {
                    return true;
                }
                current = previous_element_sibling(doc, sibling);
            }
            false
        }
    }
}

fn matches_compound(doc: &Document, node: NodeId, compound: &CompoundSelector) -> bool {
    let Some(element) = doc.element(node) else {
        return false;
    };
    if let Some(tag) = &compound.tag
        && element.name != *tag
    {
        return false;
    }
    compound
        .simple
        .iter()
        .all(|simple| matches_simple(doc, node, simple))
}

fn matches_simple(doc: &Document, node: NodeId, simple: &SimpleSelector) -> bool {
    match simple {
        SimpleSelector::Id(id) => doc.attribute(node, "id") == Some(id.as_str()),
        SimpleSelector::Class(class) => doc.has_class(node, class),
        SimpleSelector::Attribute {
            name,
            matcher,
            case_insensitive,
        } => {
            let Some(actual) = doc.attribute(node, name) else {
                return false;
            };
            let Some((op, expected)) = matcher else {
                return true;
            };
            let (actual, expected) = if *case_insensitive {
                (actual.to_lowercase(), expected.to_lowercase())
            } else {
                (actual.to_string(), expected.clone())
            };
            match op {
                AttrOp::Equals => actual == expected,
                AttrOp::Includes => {
                    !expected.is_empty() && actual.split_ascii_whitespace().any(|word| word == expected)
                }
                AttrOp::DashMatch => {
                    actual == expected || actual.starts_with(&format!("{expected}-"))
                }
                AttrOp::Prefix => !expected.is_empty() && actual.starts_with(&expected),
                AttrOp::Suffix => !expected.is_empty() && actual.ends_with(&expected),
                AttrOp::Substring => !expected.is_empty() && actual.contains(&expected),
            }
        }
        SimpleSelector::Root => doc.document_element() == Some(node),
        SimpleSelector::FirstChild => doc.element_index(node) == 1,
        SimpleSelector::LastChild => doc.element_index(node) == doc.element_sibling_count(node),
        SimpleSelector::OnlyChild => doc.element_sibling_count(node) == 1,
        SimpleSelector::NthChild(nth) => nth.matches(doc.element_index(node)),
        SimpleSelector::NthLastChild(nth) => {
            nth.matches(doc.element_sibling_count(node) + 1 - doc.element_index(node))
        }
        SimpleSelector::NthOfType(nth) => {
            let tag = doc.tag_name(node);
            let index = match doc.parent(node) {
                Some(parent) => doc
                    .element_children(parent)
                    .filter(|sibling| doc.tag_name(*sibling) == tag)
                    .position(|sibling| sibling == node)
                    .map_or(1, |position| position + 1),
                None => 1,
            };
            nth.matches(index)
        }
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn error<T>(&self, message: impl Into<String>) -> Result<T, SelectorError> {
        Err(SelectorError {
            message: message.into(),
            offset: self.pos,
        })
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn parse_list(&mut self) -> Result<SelectorList, SelectorError> {
        let mut selectors = Vec::new();
        loop {
            self.skip_whitespace();
            selectors.push(self.parse_complex()?);
            self.skip_whitespace();
            match self.bump() {
                None => break,
                Some(',') => continue,
                Some(other) => {
                    self.pos -= 1;
                    return self.error(format!("unexpected `{other}`"));
                }
            }
        }
        Ok(SelectorList(selectors))
    }

    fn parse_complex(&mut self) -> Result<ComplexSelector, SelectorError> {
        let mut compounds = vec![self.parse_compound()?];
        let mut combinators = Vec::new();
        loop {
            let had_whitespace = self.skip_whitespace();
            let combinator = match self.peek() {
                None | Some(',') => break,
                Some('>') => Combinator::Child,
                Some('+') => Combinator::NextSibling,
                Some('~') => Combinator::SubsequentSibling,
                Some(_) if had_whitespace => Combinator::Descendant,
                Some(other) => return self.error(format!("unexpected `{other}`")),
            };
            if combinator != Combinator::Descendant {
                self.bump();
                self.skip_whitespace();
            }
            combinators.push(combinator);
            compounds.push(self.parse_compound()?);
        }
        Ok(ComplexSelector {
            compounds,
            combinators,
        })
    }

    fn parse_compound(&mut self) -> Result<CompoundSelector, SelectorError> {
        let mut compound = CompoundSelector::default();
        let mut consumed = false;

        if self.peek() == Some('*') {
            self.bump();
            consumed = true;
        } else if self.at_ident_start() {
            compound.tag = Some(self.parse_ident()?.to_ascii_lowercase());
            consumed = true;
        }

        loop {
            match self.peek() {
                Some('#') => {
                    self.bump();
                    let id = self.parse_name()?;
                    compound.simple.push(SimpleSelector::Id(id));
                }
                Some('.') => {
                    self.bump();
                    let class = self.parse_ident()?;
                    compound.simple.push(SimpleSelector::Class(class));
                }
                Some('[') => {
                    self.bump();
                    let attr = self.parse_attribute()?;
                    compound.simple.push(attr);
                }
                Some(':') => {
                    self.bump();
                    let pseudo = self.parse_pseudo()?;
                    compound.simple.push(pseudo);
                }
                _ => break,
            }
            consumed = true;
        }

        if !consumed {
            return match self.peek() {
                Some(c) => self.error(format!("expected a selector, found `{c}`")),
                None => self.error("expected a selector"),
            };
        }
        Ok(compound)
    }

    fn at_ident_start(&self) -> bool {
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' || !c.is_ascii() => true,
            Some('\\') => true,
            Some('-') => match self.peek_at(1) {
                Some(next) => {
                    next.is_ascii_alphabetic() || next == '_' || next == '-' || next == '\\' || !next.is_ascii()
                }
                None => false,
            },
            _ => false,
        }
    }

    fn is_name_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '-' || c == '_' || !c.is_ascii()
    }

    fn parse_ident(&mut self) -> Result<String, SelectorError> {
        if !self.at_ident_start() {
            return self.error("expected an identifier");
        }
        self.parse_name()
    }

    /// Name characters with escapes; used directly for `#id`, which may start
    /// with a digit once escaped.
    fn parse_name(&mut self) -> Result<String, SelectorError> {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c == '\\' {
                self.bump();
                out.push(self.parse_escape());
            } else if Self::is_name_char(c) {
                out.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if out.is_empty() {
            return self.error("expected a name");
        }
        Ok(out)
    }

    /// Parses the part after a backslash.
    fn parse_escape(&mut self) -> char {
        let mut hex = String::new();
        while hex.len() < 6 && self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
            hex.extend(self.bump());
        }
        if hex.is_empty() {
            return self.bump().unwrap_or('\u{fffd}');
        }
        if self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.bump();
        }
        u32::from_str_radix(&hex, 16)
            .ok()
            .filter(|code| *code != 0)
            .and_then(char::from_u32)
            .unwrap_or('\u{fffd}')
    }

    fn parse_string(&mut self) -> Result<String, SelectorError> {
        let Some(quote) = self.bump() else {
            return self.error("expected a string");
        };
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return self.error("unterminated string"),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.peek() {
                    Some('\n') => {
                        self.bump();
                    }
                    Some(_) => out.push(self.parse_escape()),
                    None => {}
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn parse_attribute(&mut self) -> Result<SimpleSelector, SelectorError> {
        self.skip_whitespace();
        let name = self.parse_ident()?.to_ascii_lowercase();
        self.skip_whitespace();
        let op = match (self.peek(), self.peek_at(1)) {
            (Some(']'), _) => {
                self.bump();
                return Ok(SimpleSelector::Attribute {
                    name,
                    matcher: None,
                    case_insensitive: false,
                });
            }
            (Some('='), _) => {
                self.bump();
                AttrOp::Equals
            }
            (Some(c), Some('=')) => {
                let op = match c {
                    '~' => AttrOp::Includes,
                    '|' => AttrOp::DashMatch,
                    '^' => AttrOp::Prefix,
                    '$' => AttrOp::Suffix,
                    '*' => AttrOp::Substring,
                    other => return self.error(format!("unknown attribute operator `{other}=`")),
                };
                self.pos += 2;
                op
            }
            _ => return self.error("expected `]` or an attribute operator"),
        };
        self.skip_whitespace();
        let value = match self.peek() {
            Some('"' | '\'') => self.parse_string()?,
            _ => self.parse_ident()?,
        };
        self.skip_whitespace();
        let mut case_insensitive = false;
        if let Some(flag @ ('i' | 'I' | 's' | 'S')) = self.peek() {
            self.bump();
            case_insensitive = flag.eq_ignore_ascii_case(&'i');
            self.skip_whitespace();
        }
        if self.bump() != Some(']') {
            return self.error("expected `]`");
        }
        Ok(SimpleSelector::Attribute {
            name,
            matcher: Some((op, value)),
            case_insensitive,
        })
    }

    fn parse_pseudo(&mut self) -> Result<SimpleSelector, SelectorError> {
        let start = self.pos;
        let name = self.parse_ident()?.to_ascii_lowercase();
        let argument = if self.peek() == Some('(') {
            self.bump();
            let mut arg = String::new();
            loop {
                match self.bump() {
                    None => return self.error("unterminated pseudo-class argument"),
                    Some(')') => break,
                    Some(c) => arg.push(c),
                }
            }
            Some(arg)
        } else {
            None
        };

        let nth = |parser: &Self| match &argument {
            Some(arg) => parse_nth(arg).ok_or_else(|| SelectorError {
                message: format!("invalid an+b expression `{arg}`"),
                offset: parser.pos,
            }),
            None => Err(SelectorError {
                message: format!("`:{name}` requires an argument"),
                offset: start,
            }),
        };

        let simple = match name.as_str() {
            "root" => SimpleSelector::Root,
            "first-child" => SimpleSelector::FirstChild,
            "last-child" => SimpleSelector::LastChild,
            "only-child" => SimpleSelector::OnlyChild,
            "nth-child" => SimpleSelector::NthChild(nth(self)?),
            "nth-last-child" => SimpleSelector::NthLastChild(nth(self)?),
            "nth-of-type" => SimpleSelector::NthOfType(nth(self)?),
            other => {
                self.pos = start;
                return self.error(format!("unsupported pseudo-class `:{other}`"));
            }
        };
        Ok(simple)
    }
}

fn parse_nth(arg: &str) -> Option<Nth> {
    let compact: String = arg
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    match compact.as_str() {
        "odd" => return Some(Nth { a: 2, b: 1 }),
        "even" => return Some(Nth { a: 2, b: 0 }),
        "" => return None,
        _ => {}
    }
    match compact.split_once('n') {
        Some((a, b)) => {
            let a = match a {
                "" | "+" => 1,
                "-" => -1,
                digits => parse_nth_coefficient(digits)?,
            };
            let b = if b.is_empty() {
                0
            } else {
                if !b.starts_with(['+', '-']) {
                    return None;
                }
                parse_nth_coefficient(b)?
            };
            Some(Nth { a, b })
        }
        None => Some(Nth {
            a: 0,
            b: parse_nth_coefficient(&compact)?,
        }),
    }
}

/// Coefficients are bounded to `i32` so `an+b` arithmetic on `i64` cannot overflow.
fn parse_nth_coefficient(digits: &str) -> Option<i64> {
    digits.parse::<i32>().ok().map(i64::from)
}

/// Escapes `value` for use as a CSS identifier (`CSS.escape`).
pub fn escape_ident(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let mut out = String::with_capacity(value.len());
    for (index, c) in chars.iter().copied().enumerate() {
        let code = c as u32;
        if code == 0 {
            out.push('\u{fffd}');
        } else if (0x1..=0x1f).contains(&code) || code == 0x7f {
            out.push_str(&format!("\\{code:x} "));
        } else if index == 0 && c.is_ascii_digit() {
            out.push_str(&format!("\\{code:x} "));
        } else if index == 1 && c.is_ascii_digit() && chars[0] == '-' {
            out.push_str(&format!("\\{code:x} "));
        } else if index == 0 && c == '-' && chars.len() == 1 {
            out.push_str("\\-");
        } else if code >= 0x80 || c == '-' || c == '_' || c.is_ascii_alphanumeric() {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

/// Quotes `value` as a CSS string literal.
pub fn escape_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        let code = c as u32;
        match c {
            '\0' => out.push('\u{fffd}'),
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            _ if code <= 0x1f || code == 0x7f => out.push_str(&format!("\\{code:x} ")),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::html::parse_document;

    fn fixture() -> Document {
        parse_document(
            r#"<main id="app"><ul class="list"><li class="item a">1</li><li class="item">2</li><li data-x="foo bar">3</li></ul><p lang="en-US">x</p></main>"#,
        )
    }

    fn names(doc: &Document, selector: &str) -> Vec<String> {
        select_all(doc, selector)
            .expect("parse")
            .into_iter()
            .map(|node| doc.text_content(node))
            .collect()
    }

    #[test]
    fn matches_classes_ids_and_combinators() {
        let doc = fixture();
        assert_eq!(names(&doc, "#app .item"), vec!["1", "2"]);
        assert_eq!(names(&doc, "ul > li.a"), vec!["1"]);
        assert_eq!(names(&doc, "main > li"), Vec::<String>::new());
        assert_eq!(names(&doc, "li + li"), vec!["2", "3"]);
        assert_eq!(names(&doc, ".a ~ li"), vec!["2", "3"]);
    }

    #[test]
    fn matches_attribute_operators() {
        let doc = fixture();
        assert_eq!(names(&doc, r#"[data-x~="bar"]"#), vec!["3"]);
        assert_eq!(names(&doc, "[data-x^=foo]"), vec!["3"]);
        assert_eq!(names(&doc, r#"[data-x$="ar"]"#), vec!["3"]);
        assert_eq!(names(&doc, r#"[data-x*="o b"]"#), vec!["3"]);
        assert_eq!(names(&doc, r#"p[lang|="en"]"#), vec!["x"]);
        assert_eq!(names(&doc, r#"[data-x="FOO BAR" i]"#), vec!["3"]);
    }

    #[test]
    fn matches_structural_pseudo_classes() {
        let doc = fixture();
        assert_eq!(names(&doc, "li:nth-child(2)"), vec!["2"]);
        assert_eq!(names(&doc, "li:nth-child(odd)"), vec!["1", "3"]);
        assert_eq!(names(&doc, "li:nth-child(-n+2)"), vec!["1", "2"]);
        assert_eq!(names(&doc, "li:first-child, li:last-child"), vec!["1", "3"]);
        assert_eq!(names(&doc, "#app > :nth-child(2)"), vec!["x"]);
        assert_eq!(names(&doc, "li:nth-last-child(1)"), vec!["3"]);
    }

    #[test]
    fn rejects_malformed_selectors() {
        for bad in ["", "div >", "[data-x=", ".", "a:hover", "li:nth-child(x)", "a,,b", "#"] {
            assert!(parse_selector(bad).is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn nth_coefficients_outside_i32_are_rejected() {
        for bad in [
            "li:nth-child(n-9223372036854775808)",
            "li:nth-child(9223372036854775807n)",
            "li:nth-last-child(3000000000)",
        ] {
            assert!(parse_selector(bad).is_err(), "{bad:?} should fail");
        }
        let doc = fixture();
        assert_eq!(names(&doc, "li:nth-child(-2147483648n+2147483647)"), Vec::<String>::new());
        assert_eq!(names(&doc, "li:nth-child(2147483647n+1)"), vec!["1"]);
    }

    #[test]
    fn escape_ident_follows_cssom_rules() {
        assert_eq!(escape_ident("plain-id"), "plain-id");
        assert_eq!(escape_ident("1abc"), "\\31 abc");
        assert_eq!(escape_ident("-1"), "-\\31 ");
        assert_eq!(escape_ident("-"), "\\-");
        assert_eq!(escape_ident("a.b:c"), "a\\.b\\:c");
        assert_eq!(escape_string("say \"hi\"\\"), "\"say \\\"hi\\\"\\\\\"");
    }

    #[test]
    fn escaped_values_resolve_back() {
        let doc = parse_document(r#"<div id="1:weird.id" data-testid='a "quoted" \ value'>z</div>"#);
        let by_id = format!("#{}", escape_ident("1:weird.id"));
        let by_attr = format!("[data-testid={}]", escape_string(r#"a "quoted" \ value"#));
        assert_eq!(names(&doc, &by_id), vec!["z"]);
        assert_eq!(names(&doc, &by_attr), vec!["z"]);
    }
}
