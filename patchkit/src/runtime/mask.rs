//! Anti-flicker mask.
//!
//! While engaged, a `<style data-patch-mask>` rule hides the masked selectors
//! so visitors never see the pre-patch content. The mask always lifts: on
//! [`AntiFlickerMask::release`], on drop (at the next microtask checkpoint), or
//! when its timer fires.

use std::cell::Cell;
use std::rc::Rc;

use serde::Serialize;
use tracing::{debug, warn};

use super::event_loop::{MicrotaskQueue, TimerId};
use super::page::Page;
use crate::core::css::{SelectorList, parse_selector};
use crate::core::dom::{Attribute, Document, NodeId};

pub const MASK_ATTRIBUTE: &str = "data-patch-mask";
pub const DEFAULT_MASK_TIMEOUT_MS: u64 = 800;
pub const MAX_MASK_TIMEOUT_MS: u64 = 5_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskOutcome {
    Released,
    /// `MaskTimeout`: the timer lifted the mask before the patch finished.
    TimedOut,
    Dropped,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MaskEventKind {
    Engaged { selectors: Vec<String> },
    Lifted { outcome: MaskOutcome },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MaskEvent {
    pub mask: u64,
    pub at_ms: u64,
    #[serde(flatten)]
    pub kind: MaskEventKind,
}

/// `None` selects the default; explicit values are capped.
pub fn effective_timeout(timeout_ms: Option<u64>) -> u64 {
    timeout_ms
        .unwrap_or(DEFAULT_MASK_TIMEOUT_MS)
        .min(MAX_MASK_TIMEOUT_MS)
}

struct MaskState {
    id: u64,
    lifted: Cell<bool>,
    timer: Cell<Option<TimerId>>,
}

impl MaskState {
    /// Removes the style rule once. Returns false when already lifted.
    fn lift(&self, page: &mut Page, outcome: MaskOutcome) -> bool {
        if self.lifted.replace(true) {
            return false;
        }
        if let Some(timer) = self.timer.take() {
            page.clear_timeout(timer);
        }
        let value = self.id.to_string();
        let doc = page.document_mut();
        let styles: Vec<NodeId> = doc
            .elements()
            .filter(|node| doc.attribute(*node, MASK_ATTRIBUTE) == Some(value.as_str()))
            .collect();
        for style in styles {
            doc.detach(style);
        }
        let at_ms = page.now_ms();
        page.record_mask_event(MaskEvent {
            mask: self.id,
            at_ms,
            kind: MaskEventKind::Lifted { outcome },
        });
        true
    }
}

/// Guard for an engaged mask.
#[must_use = "dropping the mask releases it at the next microtask checkpoint"]
pub struct AntiFlickerMask {
    state: Rc<MaskState>,
    microtasks: MicrotaskQueue,
    selectors: Vec<String>,
}

impl AntiFlickerMask {
    /// Hides `selectors` until released. Selectors that fail to parse are
    /// skipped with a warning; with none left the mask is inert.
    pub fn engage(page: &mut Page, selectors: &[String], timeout_ms: Option<u64>) -> Self {
        let id = page.allocate_id();
        let selectors: Vec<String> = selectors
            .iter()
            .filter(|selector| match parse_selector(selector) {
                Ok(_) => true,
                Err(err) => {
                    warn!(selector = %selector, error = %err, "skipping invalid mask selector");
                    false
                }
            })
            .cloned()
            .collect();
        let state = Rc::new(MaskState {
            id,
            lifted: Cell::new(selectors.is_empty()),
            timer: Cell::new(None),
        });
        let mask = Self {
            state: Rc::clone(&state),
            microtasks: page.microtask_queue(),
            selectors,
        };
        if mask.selectors.is_empty() {
            debug!("no usable mask selectors; mask not engaged");
            return mask;
        }

        let rule = format!(
            "{} {{ opacity: 0 !important; visibility: hidden !important; }}",
            mask.selectors.join(", ")
        );
        let doc = page.document_mut();
        let host = doc
            .head()
            .or_else(|| doc.document_element())
            .unwrap_or_else(|| doc.root());
        let style = doc.create_element_with_attrs(
            "style",
            vec![Attribute {
                name: MASK_ATTRIBUTE.to_string(),
                value: id.to_string(),
            }],
        );
        let text = doc.create_text(&rule);
        if let Err(err) = doc
            .append_child(style, text)
            .and_then(|()| doc.append_child(host, style))
        {
            warn!(error = %err, "failed to insert mask style");
            state.lifted.set(true);
            return mask;
        }

        let timeout = effective_timeout(timeout_ms);
        let timer_state = Rc::clone(&state);
        let timer = page.set_timeout(
            timeout,
            Box::new(move |page: &mut Page| {
                // The timer has already fired; nothing to cancel.
                timer_state.timer.set(None);
                if timer_state.lift(page, MaskOutcome::TimedOut) {
                    warn!(mask = timer_state.id, timeout_ms = timeout, "MaskTimeout: mask lifted by timer");
                }
            }),
        );
        state.timer.set(Some(timer));
        let at_ms = page.now_ms();
        page.record_mask_event(MaskEvent {
            mask: id,
            at_ms,
            kind: MaskEventKind::Engaged {
                selectors: mask.selectors.clone(),
            },
        });
        debug!(mask = id, timeout_ms = timeout, "mask engaged");
        mask
    }

    pub fn id(&self) -> u64 {
        self.state.id
    }

    pub fn selectors(&self) -> &[String] {
        &self.selectors
    }

    pub fn is_engaged(&self) -> bool {
        !self.state.lifted.get()
    }

    /// Lifts the mask now. Returns false when it was already lifted.
    pub fn release(&self, page: &mut Page) -> bool {
        self.state.lift(page, MaskOutcome::Released)
    }
}

impl Drop for AntiFlickerMask {
    fn drop(&mut self) {
        if self.state.lifted.get() {
            return;
        }
        let state = Rc::clone(&self.state);
        self.microtasks.push(Box::new(move |page: &mut Page| {
            state.lift(page, MaskOutcome::Dropped);
        }));
    }
}

/// True when `node` or one of its ancestors is hidden by an engaged mask.
pub fn is_masked(doc: &Document, node: NodeId) -> bool {
    let rules: Vec<SelectorList> = doc
        .elements()
        .filter(|style| doc.tag_name(*style) == Some("style") && doc.has_attribute(*style, MASK_ATTRIBUTE))
        .filter_map(|style| {
            let text = doc.text_content(style);
            let selectors = text.split('{').next()?.trim().to_string();
            parse_selector(&selectors).ok()
        })
        .collect();
    if rules.is_empty() {
        return false;
    }
    std::iter::once(node)
        .chain(doc.ancestors(node))
        .filter(|candidate| doc.is_element(*candidate))
        .any(|candidate| rules.iter().any(|rule| rule.matches(doc, candidate)))
}
