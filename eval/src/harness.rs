//! Drives patchkit against a case fixture on a virtual clock.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use patchkit::apply::{ApplyReport, PatchEngine};
use patchkit::core::dom::Document;
use patchkit::core::html::serialize_document;
use patchkit::core::ops::Payload;
use patchkit::core::patch::apply_operations;
use patchkit::core::types::ApplyResult;
use patchkit::io::payload_store::load_payload;
use patchkit::runtime::page::Page;

use crate::case::{CaseFile, Step};
use crate::config::{apply_case_config, apply_options};

/// Everything a run produced, before checks are judged.
pub struct ScenarioRun {
    pub page: Page,
    pub report: ApplyReport,
    pub reapply_count: u64,
    pub last_reapply: Option<ApplyResult>,
    pub digest_before: String,
    pub digest_after: String,
    pub idempotence: IdempotenceProbe,
}

/// Outcome of applying the payload once more to a copy of the final document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotenceProbe {
    pub changed: usize,
    pub identical: bool,
}

pub fn load_fixtures(case: &CaseFile, case_path: &Path) -> Result<(String, Payload)> {
    let (html_path, payload_path) = case.resolve(case_path);
    let html = fs::read_to_string(&html_path)
        .with_context(|| format!("read fixture {}", html_path.display()))?;
    let payload = load_payload(&payload_path)?;
    Ok((html, payload))
}

#[instrument(skip_all, fields(case_id = %case.case.id))]
pub fn run_scenario(case: &CaseFile, html: &str, payload: &Payload) -> Result<ScenarioRun> {
    let config = apply_case_config(Default::default(), &case.config)?;
    let settle_ms =
        config.spa.navigation_delay_ms + config.spa.mutation_debounce_ms + config.mask.timeout_ms;
    let mut page =
        Page::from_html(&case.case.url, html).with_navigation_api(case.config.navigation_api);
    let digest_before = dom_digest(page.document());

    let mut engine = PatchEngine::new(config);
    let report = engine.apply_payload(&mut page, payload, &apply_options(&case.config));
    debug!(success = report.success, "first application done");

    for step in &case.steps {
        debug!(step = ?step, "step");
        run_step(&mut page, step);
    }
    // Flush debounced reapplies and any mask still waiting on its timer.
    if page.pending_timers() > 0 {
        page.advance(settle_ms);
    }

    let reapply_count = engine.spa().reapply_count();
    let last_reapply = engine.spa().last_result();
    engine.disable_spa_mode(&mut page);

    let idempotence = probe_idempotence(page.document(), payload);
    let digest_after = dom_digest(page.document());
    Ok(ScenarioRun {
        page,
        report,
        reapply_count,
        last_reapply,
        digest_before,
        digest_after,
        idempotence,
    })
}

fn run_step(page: &mut Page, step: &Step) {
    match step {
        Step::PushState { url } => page.push_state(url),
        Step::ReplaceState { url } => page.replace_state(url),
        Step::Back => {
            if !page.history_back() {
                debug!("history back ignored at first entry");
            }
        }
        Step::Rerender { html } => page.rerender_body(html),
        Step::Advance { ms } => page.advance(*ms),
    }
}

fn probe_idempotence(doc: &Document, payload: &Payload) -> IdempotenceProbe {
    let mut copy = doc.clone();
    let result = apply_operations(&mut copy, &payload.ops);
    IdempotenceProbe {
        changed: result.changed_count(),
        identical: serialize_document(&copy) == serialize_document(doc),
    }
}

/// SHA-256 of the serialized document, hex encoded.
pub fn dom_digest(doc: &Document) -> String {
    let mut hasher = Sha256::new();
    hasher.update(serialize_document(doc).as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchkit::core::css::select_first;
    use patchkit::core::ops::Operation;

    const SHOP: &str = r#"<html><head></head><body><h1 id="title">Shop</h1></body></html>"#;

    fn case(toml: &str) -> CaseFile {
        toml::from_str(toml).expect("case")
    }

    fn retitle() -> Payload {
        Payload::new(vec![Operation::TextReplace {
            selector: "#title".to_string(),
            text: "Sale".to_string(),
        }])
        .with_mask(vec!["#title".to_string()])
    }

    fn title(page: &Page) -> String {
        let node = select_first(page.document(), "#title").expect("parse").expect("title");
        page.document().text_content(node)
    }

    #[test]
    fn scripted_navigation_is_replayed() {
        let case = case(
            r#"
[case]
id = "spa"
description = "x"
html = "a.html"
payload = "a.json"

[config]
spa = true

[[steps]]
type = "push_state"
url = "/next"

[[steps]]
type = "rerender"
html = "<h1 id='title'>Next</h1>"
"#,
        );
        let run = run_scenario(&case, SHOP, &retitle()).expect("run");
        assert!(run.report.success);
        assert_eq!(title(&run.page), "Sale");
        assert_eq!(run.reapply_count, 1);
        assert!(run.last_reapply.expect("reapply").success);
        assert_ne!(run.digest_before, run.digest_after);
        assert_eq!(
            run.idempotence,
            IdempotenceProbe {
                changed: 0,
                identical: true,
            }
        );
    }

    #[test]
    fn duplicate_payloads_are_not_idempotent() {
        let case = case(
            r#"
[case]
id = "dup"
description = "x"
html = "a.html"
payload = "a.json"
"#,
        );
        let payload = Payload::new(vec![Operation::Duplicate {
            selector: "#title".to_string(),
        }]);
        let run = run_scenario(&case, SHOP, &payload).expect("run");
        assert_eq!(run.idempotence.changed, 1);
        assert!(!run.idempotence.identical);
    }

    #[test]
    fn digest_is_stable_hex() {
        let page = Page::from_html("/", SHOP);
        let digest = dom_digest(page.document());
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, dom_digest(&page.document().clone()));
    }
}
