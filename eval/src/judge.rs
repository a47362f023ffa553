//! Check execution and outcome recording.
//!
//! Runs the case checks against the final document of a scenario run and
//! records what was observed next to each verdict.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use patchkit::core::css::select_all;
use patchkit::core::dom::Document;
use patchkit::runtime::mask::MASK_ATTRIBUTE;

use crate::case::Check;
use crate::harness::ScenarioRun;

/// Collected check outcomes for a run.
#[derive(Debug, Serialize, Deserialize)]
pub struct Judgment {
    pub checks: Vec<CheckOutcome>,
}

impl Judgment {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|check| check.passed)
    }
}

/// Result of running a single check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckOutcome {
    /// Stable label used to aggregate pass rates across runs.
    pub label: String,
    pub passed: bool,
    /// What was found, for failed checks mostly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<String>,
}

/// Run all checks and collect outcomes.
#[instrument(skip_all, fields(check_count = checks.len()))]
pub fn run_checks(checks: &[Check], run: &ScenarioRun) -> Judgment {
    let doc = run.page.document();
    let outcomes = checks
        .iter()
        .map(|check| {
            let (passed, observed) = evaluate(check, doc, run);
            let label = label_for_check(check);
            debug!(check = %label, passed, "check result");
            CheckOutcome {
                label,
                passed,
                observed,
            }
        })
        .collect();
    Judgment { checks: outcomes }
}

pub fn write_judgment(path: &Path, judgment: &Judgment) -> Result<()> {
    let contents = serde_json::to_string_pretty(judgment).context("serialize checks")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn evaluate(check: &Check, doc: &Document, run: &ScenarioRun) -> (bool, Option<String>) {
    match check {
        Check::Exists { selector } => {
            let count = matches(doc, selector).len();
            (count > 0, Some(format!("{count} match(es)")))
        }
        Check::Missing { selector } => {
            let count = matches(doc, selector).len();
            (count == 0, Some(format!("{count} match(es)")))
        }
        Check::Text { selector, equals } => match matches(doc, selector).first() {
            Some(node) => {
                let text = doc.text_content(*node);
                (text.trim() == equals.trim(), Some(text))
            }
            None => (false, None),
        },
        Check::Attribute {
            selector,
            name,
            equals,
        } => match matches(doc, selector).first() {
            Some(node) => {
                let value = doc.attribute(*node, name);
                (value == equals.as_deref(), value.map(str::to_string))
            }
            None => (false, None),
        },
        Check::HasClass { selector, class } => match matches(doc, selector).first() {
            Some(node) => (
                doc.has_class(*node, class),
                doc.attribute(*node, "class").map(str::to_string),
            ),
            None => (false, None),
        },
        Check::Count { selector, equals } => {
            let count = matches(doc, selector).len();
            (count == *equals, Some(count.to_string()))
        }
        Check::AllApplied => {
            let errors: Vec<&str> = run.report.errors.iter().map(String::as_str).collect();
            (run.report.success, (!errors.is_empty()).then(|| errors.join("; ")))
        }
        Check::Idempotent => (
            run.idempotence.changed == 0 && run.idempotence.identical,
            Some(format!("{} operation(s) changed", run.idempotence.changed)),
        ),
        Check::Unmasked => {
            let masks = matches(doc, &format!("style[{MASK_ATTRIBUTE}]")).len();
            (masks == 0, Some(format!("{masks} mask style(s)")))
        }
    }
}

/// Check selectors are validated at load; a parse failure here matches nothing.
fn matches(doc: &Document, selector: &str) -> Vec<patchkit::core::dom::NodeId> {
    select_all(doc, selector).unwrap_or_default()
}

pub fn label_for_check(check: &Check) -> String {
    match check {
        Check::Exists { selector } => format!("exists({selector})"),
        Check::Missing { selector } => format!("missing({selector})"),
        Check::Text { selector, .. } => format!("text({selector})"),
        Check::Attribute { selector, name, .. } => format!("attribute({selector}@{name})"),
        Check::HasClass { selector, class } => format!("has_class({selector}.{class})"),
        Check::Count { selector, .. } => format!("count({selector})"),
        Check::AllApplied => "all_applied".to_string(),
        Check::Idempotent => "idempotent".to_string(),
        Check::Unmasked => "unmasked".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::CaseFile;
    use crate::harness::run_scenario;
    use patchkit::core::ops::{Operation, Payload};

    const SHOP: &str = r#"<html><head></head><body><h1 id="title">Shop</h1><a id="cta" class="btn" href="/buy">Buy</a><ul><li>a</li><li>b</li></ul></body></html>"#;

    fn run(payload: &Payload) -> ScenarioRun {
        let case: CaseFile = toml::from_str(
            r#"
[case]
id = "judge"
description = "x"
html = "a.html"
payload = "a.json"
"#,
        )
        .expect("case");
        run_scenario(&case, SHOP, payload).expect("run")
    }

    fn payload() -> Payload {
        Payload::new(vec![
            Operation::TextReplace {
                selector: "#title".to_string(),
                text: "Sale".to_string(),
            },
            Operation::AttrSet {
                selector: "#cta".to_string(),
                name: "href".to_string(),
                value: "/checkout".to_string(),
            },
            Operation::ClassAdd {
                selector: "#cta".to_string(),
                class_name: "hot".to_string(),
            },
        ])
        .with_mask(vec!["#title".to_string()])
    }

    #[test]
    fn dom_checks_pass_on_patched_page() {
        let run = run(&payload());
        let checks = vec![
            Check::Exists {
                selector: "#cta".to_string(),
            },
            Check::Missing {
                selector: ".banner".to_string(),
            },
            Check::Text {
                selector: "#title".to_string(),
                equals: "Sale".to_string(),
            },
            Check::Attribute {
                selector: "#cta".to_string(),
                name: "href".to_string(),
                equals: Some("/checkout".to_string()),
            },
            Check::Attribute {
                selector: "#cta".to_string(),
                name: "disabled".to_string(),
                equals: None,
            },
            Check::HasClass {
                selector: "#cta".to_string(),
                class: "hot".to_string(),
            },
            Check::Count {
                selector: "li".to_string(),
                equals: 2,
            },
            Check::AllApplied,
            Check::Idempotent,
            Check::Unmasked,
        ];
        let judgment = run_checks(&checks, &run);
        let failed: Vec<_> = judgment.checks.iter().filter(|check| !check.passed).collect();
        assert!(failed.is_empty(), "{failed:?}");
        assert!(judgment.all_passed());
    }

    #[test]
    fn failures_record_what_was_observed() {
        let mut broken = payload();
        broken.ops.push(Operation::Remove {
            selector: "#nope".to_string(),
        });
        let run = run(&broken);
        let judgment = run_checks(
            &[
                Check::AllApplied,
                Check::Text {
                    selector: "#title".to_string(),
                    equals: "Shop".to_string(),
                },
            ],
            &run,
        );
        assert!(!judgment.all_passed());
        assert_eq!(judgment.checks[0].label, "all_applied");
        assert!(
            judgment.checks[0]
                .observed
                .as_deref()
                .expect("errors")
                .contains("#nope")
        );
        assert_eq!(judgment.checks[1].observed.as_deref(), Some("Sale"));
    }
}
