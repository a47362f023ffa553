//! Reapplication of the last payload after client-side navigation.
//!
//! A [`SpaController`] watches two signals: child-list mutations anywhere in
//! the document (a framework swapping out the view) and navigation through
//! history entry points. Both feed one debounced slot, so a burst of signals
//! produces a single reapply once the page settles.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::event_loop::TimerId;
use super::mask::AntiFlickerMask;
use super::navigation::{NavigationCallback, NavigationObserver, NavigationTrigger, navigation_observer_for};
use super::page::{MutationCallback, ObserveOptions, ObserverId, Page};
use crate::core::dom::{Document, MutationRecord, NodeData, NodeId};
use crate::core::ops::Payload;
use crate::core::patch::apply_operations;
use crate::core::types::ApplyResult;

/// Elements whose insertion or removal alone never warrants a reapply.
const INERT_TAGS: &[&str] = &["script", "style", "link", "meta"];

/// Back-to-back passes requested from inside a running pass.
const MAX_RERUNS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpaConfig {
    /// Quiet period after the last relevant mutation.
    pub mutation_debounce_ms: u64,
    /// Delay after an address change, letting the new view render.
    pub navigation_delay_ms: u64,
    /// Use the `navigate` event when the page supports it.
    pub prefer_native_navigation: bool,
}

impl Default for SpaConfig {
    fn default() -> Self {
        Self {
            mutation_debounce_ms: 100,
            navigation_delay_ms: 50,
            prefer_native_navigation: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpaState {
    Disabled,
    Enabled,
}

struct Session {
    payload: Payload,
    config: SpaConfig,
    last_url: String,
    pending: Option<TimerId>,
    in_progress: bool,
    rerun: bool,
    observer: Option<ObserverId>,
    mask_timeout_ms: Option<u64>,
    reapply_count: u64,
    last_result: Option<ApplyResult>,
}

type SharedSession = Rc<RefCell<Session>>;

pub struct SpaController {
    config: SpaConfig,
    mask_timeout_ms: Option<u64>,
    session: Option<SharedSession>,
    navigation: Option<Box<dyn NavigationObserver>>,
}

/// Weak handle for requesting a pass from page callbacks.
#[derive(Clone)]
pub struct ReapplyHandle {
    session: Weak<RefCell<Session>>,
}

impl ReapplyHandle {
    /// Runs a pass now, cancelling any scheduled one. Inside a running pass
    /// this queues one more pass instead. Returns false once the session
    /// has ended.
    pub fn reapply_now(&self, page: &mut Page) -> bool {
        let Some(session) = self.session.upgrade() else {
            return false;
        };
        let pending = session.borrow_mut().pending.take();
        if let Some(timer) = pending {
            page.clear_timeout(timer);
        }
        reapply(&session, page);
        true
    }
}

impl SpaController {
    pub fn new(config: SpaConfig) -> Self {
        Self {
            config,
            mask_timeout_ms: None,
            session: None,
            navigation: None,
        }
    }

    /// Timeout for the mask engaged around each pass; `None` uses the
    /// mask default. Applies to sessions enabled afterwards.
    pub fn set_mask_timeout(&mut self, timeout_ms: Option<u64>) {
        self.mask_timeout_ms = timeout_ms;
    }

    pub fn state(&self) -> SpaState {
        if self.session.is_some() {
            SpaState::Enabled
        } else {
            SpaState::Disabled
        }
    }

    pub fn config(&self) -> &SpaConfig {
        &self.config
    }

    /// Starts watching `page`, reapplying `payload` on navigation. Enabling an
    /// enabled controller tears the previous session down first.
    pub fn enable(&mut self, page: &mut Page, payload: Payload) {
        if self.session.is_some() {
            self.disable(page);
        }
        let session: SharedSession = Rc::new(RefCell::new(Session {
            payload,
            config: self.config.clone(),
            last_url: page.location().to_string(),
            pending: None,
            in_progress: false,
            rerun: false,
            observer: None,
            mask_timeout_ms: self.mask_timeout_ms,
            reapply_count: 0,
            last_result: None,
        }));

        let root = page.document().root();
        let observer = page.observe_mutations(
            root,
            ObserveOptions::child_list_subtree(),
            mutation_callback(Rc::downgrade(&session)),
        );
        session.borrow_mut().observer = Some(observer);

        let mut navigation = navigation_observer_for(page, self.config.prefer_native_navigation);
        navigation.attach(page, navigation_callback(Rc::downgrade(&session)));

        info!(url = %page.location(), ops = session.borrow().payload.ops.len(), "SPA mode enabled");
        self.navigation = Some(navigation);
        self.session = Some(session);
    }

    /// Stops watching. Cancels a scheduled reapply. Safe to call repeatedly.
    pub fn disable(&mut self, page: &mut Page) {
        if let Some(mut navigation) = self.navigation.take() {
            navigation.detach(page);
        }
        let Some(session) = self.session.take() else {
            return;
        };
        let (pending, observer) = {
            let mut session = session.borrow_mut();
            (session.pending.take(), session.observer.take())
        };
        if let Some(timer) = pending {
            page.clear_timeout(timer);
        }
        if let Some(observer) = observer {
            page.disconnect(observer);
        }
        info!("SPA mode disabled");
    }

    /// Disables and consumes the controller.
    pub fn destroy(mut self, page: &mut Page) {
        self.disable(page);
    }

    pub fn reapply_count(&self) -> u64 {
        self.session
            .as_ref()
            .map_or(0, |session| session.borrow().reapply_count)
    }

    pub fn last_result(&self) -> Option<ApplyResult> {
        self.session
            .as_ref()
            .and_then(|session| session.borrow().last_result.clone())
    }

    pub fn has_pending_reapply(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.borrow().pending.is_some())
    }

    /// `None` while disabled.
    pub fn handle(&self) -> Option<ReapplyHandle> {
        self.session.as_ref().map(|session| ReapplyHandle {
            session: Rc::downgrade(session),
        })
    }
}

fn mutation_callback(session: Weak<RefCell<Session>>) -> MutationCallback {
    Rc::new(move |page: &mut Page, records: &[MutationRecord]| {
        let Some(session) = session.upgrade() else {
            return;
        };
        if !records.iter().any(|record| is_significant(page.document(), record)) {
            return;
        }
        let delay = session.borrow().config.mutation_debounce_ms;
        debug!(records = records.len(), "DOM replacement detected");
        schedule_reapply(&session, page, delay);
    })
}

fn navigation_callback(session: Weak<RefCell<Session>>) -> NavigationCallback {
    Rc::new(move |page: &mut Page, trigger: NavigationTrigger| {
        let Some(session) = session.upgrade() else {
            return;
        };
        let delay = {
            let mut session = session.borrow_mut();
            if session.last_url == page.location() {
                return;
            }
            session.last_url = page.location().to_string();
            session.config.navigation_delay_ms
        };
        debug!(?trigger, url = %page.location(), "navigation detected");
        schedule_reapply(&session, page, delay);
    })
}

/// Child-list changes that touch something other than inert elements or
/// whitespace.
fn is_significant(doc: &Document, record: &MutationRecord) -> bool {
    let MutationRecord::ChildList { added, removed, .. } = record else {
        return false;
    };
    added
        .iter()
        .chain(removed)
        .any(|node| !is_inert_node(doc, *node))
}

fn is_inert_node(doc: &Document, node: NodeId) -> bool {
    match doc.data(node) {
        NodeData::Element(element) => INERT_TAGS.contains(&element.name.as_str()),
        NodeData::Text(text) => text.trim().is_empty(),
        NodeData::Comment(_) => true,
        NodeData::Document => false,
    }
}

/// Single-slot debounce: a new request replaces the pending one.
fn schedule_reapply(session: &SharedSession, page: &mut Page, delay_ms: u64) {
    let previous = session.borrow_mut().pending.take();
    if let Some(timer) = previous {
        page.clear_timeout(timer);
    }
    let weak = Rc::downgrade(session);
    let timer = page.set_timeout(
        delay_ms,
        Box::new(move |page: &mut Page| {
            if let Some(session) = weak.upgrade() {
                reapply(&session, page);
            }
        }),
    );
    session.borrow_mut().pending = Some(timer);
}

fn reapply(session: &SharedSession, page: &mut Page) {
    {
        let mut session = session.borrow_mut();
        session.pending = None;
        if session.in_progress {
            session.rerun = true;
            return;
        }
        session.in_progress = true;
    }
    let mut reruns = 0;
    loop {
        let (payload, mask_timeout_ms) = {
            let session = session.borrow();
            (session.payload.clone(), session.mask_timeout_ms)
        };
        let mask = (!payload.mask_selectors().is_empty())
            .then(|| AntiFlickerMask::engage(page, payload.mask_selectors(), mask_timeout_ms));
        let result = apply_operations(page.document_mut(), &payload.ops);
        let observer = session.borrow().observer;
        if let Some(observer) = observer {
            // Our own mutations must not schedule another pass.
            page.take_records(observer);
        }
        // Other observers react to the patch before the mask lifts.
        page.run_microtasks();
        if let Some(mask) = mask {
            mask.release(page);
        }
        page.reclaim_detached();

        let mut session = session.borrow_mut();
        session.reapply_count += 1;
        session.last_url = page.location().to_string();
        info!(
            pass = session.reapply_count,
            applied = result.applied_count(),
            changed = result.changed_count(),
            failed = result.outcomes.len() - result.applied_count(),
            "payload reapplied"
        );
        session.last_result = Some(result);
        if !session.rerun {
            session.in_progress = false;
            return;
        }
        session.rerun = false;
        reruns += 1;
        if reruns > MAX_RERUNS {
            warn!(reruns, "reapply kept requesting itself; stopping");
            session.in_progress = false;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::css::select_first;
    use crate::core::ops::Operation;

    const SHELL: &str = r#"<html><head></head><body><h1 id="title">Home</h1></body></html>"#;

    fn retitle() -> Payload {
        Payload::new(vec![Operation::TextReplace {
            selector: "#title".to_string(),
            text: "Welcome".to_string(),
        }])
    }

    fn title(page: &Page) -> String {
        let node = select_first(page.document(), "#title").expect("parse").expect("title");
        page.document().text_content(node)
    }

    #[test]
    fn reapplies_after_push_state_and_rerender() {
        let mut page = Page::from_html("https://shop.test/", SHELL);
        let mut controller = SpaController::new(SpaConfig::default());
        controller.enable(&mut page, retitle());
        assert_eq!(controller.state(), SpaState::Enabled);

        page.push_state("/products");
        page.rerender_body(r#"<h1 id="title">Products</h1>"#);
        page.advance(49);
        assert_eq!(controller.reapply_count(), 0);
        page.advance(200);
        assert_eq!(title(&page), "Welcome");
        assert_eq!(controller.reapply_count(), 1);
        assert!(controller.last_result().expect("result").success);
    }

    #[test]
    fn bursts_collapse_into_one_pass() {
        let mut page = Page::from_html("/", SHELL);
        let mut controller = SpaController::new(SpaConfig::default());
        controller.enable(&mut page, retitle());
        for step in 0..5 {
            page.rerender_body(&format!(r#"<h1 id="title">Render {step}</h1>"#));
            page.advance(60);
        }
        assert_eq!(controller.reapply_count(), 0);
        page.advance(100);
        assert_eq!(controller.reapply_count(), 1);
        page.advance(1_000);
        assert_eq!(controller.reapply_count(), 1, "own mutations must not retrigger");
    }

    #[test]
    fn same_url_and_inert_mutations_are_ignored() {
        let mut page = Page::from_html("/same", SHELL);
        let mut controller = SpaController::new(SpaConfig::default());
        controller.enable(&mut page, retitle());
        page.replace_state("/same");
        let head = page.document().head().expect("head");
        let script = page.document_mut().create_element("script");
        page.document_mut().append_child(head, script).expect("append");
        page.advance(500);
        assert_eq!(controller.reapply_count(), 0);
        assert!(!controller.has_pending_reapply());
    }

    #[test]
    fn disable_restores_page_and_cancels_pending() {
        let mut page = Page::from_html("/", SHELL);
        let observers = page.observer_count();
        let mut controller = SpaController::new(SpaConfig::default());
        controller.enable(&mut page, retitle());
        page.push_state("/next");
        assert!(controller.has_pending_reapply());

        controller.disable(&mut page);
        controller.disable(&mut page);
        assert_eq!(controller.state(), SpaState::Disabled);
        assert_eq!(page.observer_count(), observers);
        assert_eq!(page.listener_count(), 0);
        assert_eq!(page.pending_timers(), 0);

        page.push_state("/later");
        page.advance(500);
        assert_eq!(title(&page), "Home");
    }

    #[test]
    fn re_enable_replaces_session() {
        let mut page = Page::from_html("/", SHELL).with_navigation_api(true);
        let mut controller = SpaController::new(SpaConfig::default());
        controller.enable(&mut page, retitle());
        controller.enable(
            &mut page,
            Payload::new(vec![Operation::TextReplace {
                selector: "#title".to_string(),
                text: "Second".to_string(),
            }]),
        );
        assert_eq!(page.observer_count(), 1);
        assert_eq!(page.listener_count(), 1);

        page.push_state("/b");
        page.advance(100);
        assert_eq!(title(&page), "Second");
        assert_eq!(controller.reapply_count(), 1);
        controller.destroy(&mut page);
        assert_eq!(page.listener_count(), 0);
    }
}
