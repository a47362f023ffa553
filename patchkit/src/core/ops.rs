//! Operation model and payload.
//!
//! Wire shape: `{"op": "<kind>", "selector": "...", ...}` with camelCase keys.
//! Operations are plain values; editing a payload produces a new payload.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::PayloadError;

pub const PAYLOAD_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertPosition {
    BeforeBegin,
    AfterBegin,
    #[default]
    BeforeEnd,
    AfterEnd,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Operation {
    TextReplace {
        selector: String,
        text: String,
    },
    ClassSet {
        selector: String,
        value: String,
    },
    ClassAdd {
        selector: String,
        class_name: String,
    },
    ClassRemove {
        selector: String,
        class_name: String,
    },
    /// Without `force` the class flips on every application.
    ClassToggle {
        selector: String,
        class_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        force: Option<bool>,
    },
    AttrSet {
        selector: String,
        name: String,
        value: String,
    },
    StyleSet {
        selector: String,
        property: String,
        value: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        important: bool,
    },
    ImageSwap {
        selector: String,
        src: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        srcset: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alt: Option<String>,
    },
    Remove {
        selector: String,
    },
    #[serde(rename = "insertHTML")]
    InsertHtml {
        selector: String,
        html: String,
        #[serde(default)]
        position: InsertPosition,
    },
    MoveBefore {
        selector: String,
        target_selector: String,
    },
    MoveAfter {
        selector: String,
        target_selector: String,
    },
    AppendTo {
        selector: String,
        container_selector: String,
    },
    Duplicate {
        selector: String,
    },
}

/// Fieldless tag of an [`Operation`], used in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    TextReplace,
    ClassSet,
    ClassAdd,
    ClassRemove,
    ClassToggle,
    AttrSet,
    StyleSet,
    ImageSwap,
    Remove,
    #[serde(rename = "insertHTML")]
    InsertHtml,
    MoveBefore,
    MoveAfter,
    AppendTo,
    Duplicate,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::TextReplace => "textReplace",
            OperationKind::ClassSet => "classSet",
            OperationKind::ClassAdd => "classAdd",
            OperationKind::ClassRemove => "classRemove",
            OperationKind::ClassToggle => "classToggle",
            OperationKind::AttrSet => "attrSet",
            OperationKind::StyleSet => "styleSet",
            OperationKind::ImageSwap => "imageSwap",
            OperationKind::Remove => "remove",
            OperationKind::InsertHtml => "insertHTML",
            OperationKind::MoveBefore => "moveBefore",
            OperationKind::MoveAfter => "moveAfter",
            OperationKind::AppendTo => "appendTo",
            OperationKind::Duplicate => "duplicate",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::TextReplace { .. } => OperationKind::TextReplace,
            Operation::ClassSet { .. } => OperationKind::ClassSet,
            Operation::ClassAdd { .. } => OperationKind::ClassAdd,
            Operation::ClassRemove { .. } => OperationKind::ClassRemove,
            Operation::ClassToggle { .. } => OperationKind::ClassToggle,
            Operation::AttrSet { .. } => OperationKind::AttrSet,
            Operation::StyleSet { .. } => OperationKind::StyleSet,
            Operation::ImageSwap { .. } => OperationKind::ImageSwap,
            Operation::Remove { .. } => OperationKind::Remove,
            Operation::InsertHtml { .. } => OperationKind::InsertHtml,
            Operation::MoveBefore { .. } => OperationKind::MoveBefore,
            Operation::MoveAfter { .. } => OperationKind::MoveAfter,
            Operation::AppendTo { .. } => OperationKind::AppendTo,
            Operation::Duplicate { .. } => OperationKind::Duplicate,
        }
    }

    /// The element the operation acts on.
    pub fn selector(&self) -> &str {
        match self {
            Operation::TextReplace { selector, .. }
            | Operation::ClassSet { selector, .. }
            | Operation::ClassAdd { selector, .. }
            | Operation::ClassRemove { selector, .. }
            | Operation::ClassToggle { selector, .. }
            | Operation::AttrSet { selector, .. }
            | Operation::StyleSet { selector, .. }
            | Operation::ImageSwap { selector, .. }
            | Operation::Remove { selector }
            | Operation::InsertHtml { selector, .. }
            | Operation::MoveBefore { selector, .. }
            | Operation::MoveAfter { selector, .. }
            | Operation::AppendTo { selector, .. }
            | Operation::Duplicate { selector } => selector,
        }
    }

    /// Secondary selector of move operations.
    pub fn destination_selector(&self) -> Option<&str> {
        match self {
            Operation::MoveBefore {
                target_selector, ..
            }
            | Operation::MoveAfter {
                target_selector, ..
            } => Some(target_selector),
            Operation::AppendTo {
                container_selector, ..
            } => Some(container_selector),
            _ => None,
        }
    }

    /// Whether re-applying the operation to its own output is a no-op.
    pub fn is_idempotent(&self) -> bool {
        !matches!(
            self,
            Operation::Duplicate { .. } | Operation::ClassToggle { force: None, .. }
        )
    }

    /// Structural problems that make the operation unusable regardless of
    /// the document.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.selector().trim().is_empty() {
            errors.push(format!("{}: selector must not be empty", self.kind()));
        }
        if let Some(destination) = self.destination_selector()
            && destination.trim().is_empty()
        {
            errors.push(format!("{}: destination selector must not be empty", self.kind()));
        }
        match self {
            Operation::ClassAdd { class_name, .. }
            | Operation::ClassRemove { class_name, .. }
            | Operation::ClassToggle { class_name, .. }
                if class_name.trim().is_empty() =>
            {
                errors.push(format!("{}: className must not be empty", self.kind()));
            }
            Operation::AttrSet { name, .. } if name.trim().is_empty() => {
                errors.push("attrSet: name must not be empty".to_string());
            }
            Operation::StyleSet { property, .. } if property.trim().is_empty() => {
                errors.push("styleSet: property must not be empty".to_string());
            }
            Operation::ImageSwap { src, .. } if src.trim().is_empty() => {
                errors.push("imageSwap: src must not be empty".to_string());
            }
            _ => {}
        }
        errors
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MaskSpec {
    #[serde(default)]
    pub selectors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub version: u32,
    pub ops: Vec<Operation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub goals: Vec<Goal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<MaskSpec>,
}

impl Payload {
    pub fn new(ops: Vec<Operation>) -> Self {
        Self {
            version: PAYLOAD_VERSION,
            ops,
            goals: Vec::new(),
            mask: None,
        }
    }

    pub fn with_mask(mut self, selectors: Vec<String>) -> Self {
        self.mask = Some(MaskSpec { selectors });
        self
    }

    /// Parses and validates a payload at the boundary.
    pub fn from_json(input: &str) -> Result<Self, PayloadError> {
        let payload: Payload = serde_json::from_str(input)?;
        payload.validate()?;
        Ok(payload)
    }

    pub fn validate(&self) -> Result<(), PayloadError> {
        if self.version != PAYLOAD_VERSION {
            return Err(PayloadError::UnsupportedVersion(self.version));
        }
        let mut errors = Vec::new();
        for (index, op) in self.ops.iter().enumerate() {
            errors.extend(
                op.validate()
                    .into_iter()
                    .map(|err| format!("ops[{index}] {err}")),
            );
        }
        if let Some(mask) = &self.mask {
            for (index, selector) in mask.selectors.iter().enumerate() {
                if selector.trim().is_empty() {
                    errors.push(format!("mask.selectors[{index}] must not be empty"));
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(PayloadError::Invalid(errors))
        }
    }

    pub fn mask_selectors(&self) -> &[String] {
        self.mask
            .as_ref()
            .map(|mask| mask.selectors.as_slice())
            .unwrap_or_default()
    }

    /// Returns a copy with `ops[index]` replaced. Out-of-range indices leave
    /// the copy unchanged.
    pub fn replace_op(&self, index: usize, op: Operation) -> Self {
        let mut next = self.clone();
        if let Some(slot) = next.ops.get_mut(index) {
            *slot = op;
        }
        next
    }

    pub fn remove_op(&self, index: usize) -> Self {
        let mut next = self.clone();
        if index < next.ops.len() {
            next.ops.remove(index);
        }
        next
    }

    pub fn push_op(&self, op: Operation) -> Self {
        let mut next = self.clone();
        next.ops.push(op);
        next
    }

    /// Swaps two operations in place, the only in-place edit.
    pub fn swap_ops(&mut self, a: usize, b: usize) -> bool {
        if a < self.ops.len() && b < self.ops.len() {
            self.ops.swap(a, b);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_wire_shape() {
        let payload = Payload::from_json(
            &json!({
                "version": 1,
                "ops": [
                    {"op": "textReplace", "selector": "h1", "text": "Hi"},
                    {"op": "classAdd", "selector": ".cta", "className": "urgent"},
                    {"op": "insertHTML", "selector": "main", "html": "<p>x</p>", "position": "afterbegin"},
                    {"op": "moveBefore", "selector": "#b", "targetSelector": "#a"},
                    {"op": "appendTo", "selector": "#b", "containerSelector": "main"},
                    {"op": "styleSet", "selector": "h1", "property": "color", "value": "red", "important": true}
                ],
                "goals": [{"id": "g1", "selector": ".cta", "event": "click", "weight": 2}],
                "mask": {"selectors": ["h1"]}
            })
            .to_string(),
        )
        .expect("payload");

        assert_eq!(payload.ops.len(), 6);
        assert_eq!(payload.ops[1].kind(), OperationKind::ClassAdd);
        assert!(matches!(
            &payload.ops[2],
            Operation::InsertHtml { position: InsertPosition::AfterBegin, .. }
        ));
        assert_eq!(payload.ops[3].destination_selector(), Some("#a"));
        assert_eq!(payload.goals[0].extra.get("weight"), Some(&json!(2)));
        assert_eq!(payload.mask_selectors(), ["h1".to_string()]);
    }

    #[test]
    fn serializes_insert_html_with_its_wire_name() {
        let op = Operation::InsertHtml {
            selector: "main".to_string(),
            html: "<p></p>".to_string(),
            position: InsertPosition::BeforeEnd,
        };
        let value = serde_json::to_value(&op).expect("serialize");
        assert_eq!(value["op"], "insertHTML");
        assert_eq!(value["position"], "beforeend");
    }

    #[test]
    fn rejects_unknown_version_and_empty_selectors() {
        let err = Payload::from_json(r#"{"version": 2, "ops": []}"#).expect_err("version");
        assert!(matches!(err, PayloadError::UnsupportedVersion(2)));

        let err = Payload::from_json(
            r#"{"version": 1, "ops": [{"op": "moveAfter", "selector": " ", "targetSelector": ""}]}"#,
        )
        .expect_err("empty");
        let PayloadError::Invalid(errors) = err else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn rejects_missing_required_fields() {
        let err = Payload::from_json(r#"{"version": 1, "ops": [{"op": "textReplace", "selector": "h1"}]}"#)
            .expect_err("missing text");
        assert!(matches!(err, PayloadError::Json(_)));
    }

    #[test]
    fn edits_return_new_payloads() {
        let remove = |selector: &str| Operation::Remove {
            selector: selector.to_string(),
        };
        let original = Payload::new(vec![remove("a"), remove("b")]);
        let replaced = original.replace_op(0, remove("c"));
        let pushed = original.push_op(remove("d"));
        let removed = original.remove_op(1);

        assert_eq!(original.ops, vec![remove("a"), remove("b")]);
        assert_eq!(replaced.ops, vec![remove("c"), remove("b")]);
        assert_eq!(pushed.ops.len(), 3);
        assert_eq!(removed.ops, vec![remove("a")]);

        let mut swapped = original.clone();
        assert!(swapped.swap_ops(0, 1));
        assert_eq!(swapped.ops, vec![remove("b"), remove("a")]);
        assert!(!swapped.swap_ops(0, 5));
    }

    #[test]
    fn toggle_without_force_is_not_idempotent() {
        let toggle = Operation::ClassToggle {
            selector: "a".to_string(),
            class_name: "x".to_string(),
            force: None,
        };
        assert!(!toggle.is_idempotent());
        assert!(Operation::Remove { selector: "a".to_string() }.is_idempotent());
    }
}
