//! In-process page host: document, location, history and observers.
//!
//! `pushState`/`replaceState` are stored as replaceable entry points so that a
//! navigation observer can wrap them and later put the originals back.
//! Mutation observer callbacks are delivered at microtask checkpoints, never
//! synchronously from a mutation.

use std::rc::Rc;

use tracing::{debug, warn};

use super::event_loop::{EventLoop, MicrotaskQueue, Task, TimerId};
use super::mask::MaskEvent;
use crate::core::dom::{Document, MutationRecord, NodeData, NodeId};
use crate::core::html::{parse_document, parse_fragment};

/// Replaceable history entry point (`pushState` / `replaceState`).
pub type NavFn = Rc<dyn Fn(&mut Page, &str)>;
/// `popstate` / `navigate` event listener.
pub type Listener = Rc<dyn Fn(&mut Page)>;
pub type MutationCallback = Rc<dyn Fn(&mut Page, &[MutationRecord])>;

/// Upper bound on checkpoint iterations before giving up on a feedback loop.
const MAX_CHECKPOINT_STEPS: usize = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryMethod {
    PushState,
    ReplaceState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObserveOptions {
    pub subtree: bool,
    pub child_list: bool,
    pub attributes: bool,
    pub character_data: bool,
}

impl ObserveOptions {
    pub fn child_list_subtree() -> Self {
        Self {
            subtree: true,
            child_list: true,
            attributes: false,
            character_data: false,
        }
    }

    fn wants(&self, record: &MutationRecord) -> bool {
        match record {
            MutationRecord::ChildList { .. } => self.child_list,
            MutationRecord::Attributes { .. } => self.attributes,
            MutationRecord::CharacterData { .. } => self.character_data,
        }
    }
}

struct ObserverSlot {
    id: ObserverId,
    target: NodeId,
    options: ObserveOptions,
    callback: MutationCallback,
    pending: Vec<MutationRecord>,
}

pub struct Page {
    document: Document,
    location: String,
    history: Vec<String>,
    history_index: usize,
    supports_navigation_api: bool,
    push_state: NavFn,
    replace_state: NavFn,
    popstate_listeners: Vec<(ListenerId, Listener)>,
    navigate_listeners: Vec<(ListenerId, Listener)>,
    observers: Vec<ObserverSlot>,
    event_loop: EventLoop,
    mask_events: Vec<MaskEvent>,
    next_id: u64,
    /// Nesting depth of observer callbacks; batches in flight hold node ids.
    delivering: usize,
}

impl Page {
    pub fn new(url: &str, document: Document) -> Self {
        Self {
            document,
            location: url.to_string(),
            history: vec![url.to_string()],
            history_index: 0,
            supports_navigation_api: false,
            push_state: Rc::new(native_push_state),
            replace_state: Rc::new(native_replace_state),
            popstate_listeners: Vec::new(),
            navigate_listeners: Vec::new(),
            observers: Vec::new(),
            event_loop: EventLoop::new(),
            mask_events: Vec::new(),
            next_id: 0,
            delivering: 0,
        }
    }

    pub fn from_html(url: &str, html: &str) -> Self {
        Self::new(url, parse_document(html))
    }

    /// Advertises the `navigate` event, as browsers with the Navigation API do.
    pub fn with_navigation_api(mut self, supported: bool) -> Self {
        self.supports_navigation_api = supported;
        self
    }

    pub fn supports_navigation_api(&self) -> bool {
        self.supports_navigation_api
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub(crate) fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    // -- history ----------------------------------------------------------

    pub fn push_state(&mut self, url: &str) {
        let entry = Rc::clone(&self.push_state);
        entry(self, url);
    }

    pub fn replace_state(&mut self, url: &str) {
        let entry = Rc::clone(&self.replace_state);
        entry(self, url);
    }

    pub fn history_entry_point(&self, method: HistoryMethod) -> NavFn {
        match method {
            HistoryMethod::PushState => Rc::clone(&self.push_state),
            HistoryMethod::ReplaceState => Rc::clone(&self.replace_state),
        }
    }

    pub fn set_history_entry_point(&mut self, method: HistoryMethod, entry: NavFn) {
        match method {
            HistoryMethod::PushState => self.push_state = entry,
            HistoryMethod::ReplaceState => self.replace_state = entry,
        }
    }

    /// Returns false when there is no earlier entry.
    pub fn history_back(&mut self) -> bool {
        if self.history_index == 0 {
            return false;
        }
        self.traverse_to(self.history_index - 1);
        true
    }

    pub fn history_forward(&mut self) -> bool {
        if self.history_index + 1 >= self.history.len() {
            return false;
        }
        self.traverse_to(self.history_index + 1);
        true
    }

    fn traverse_to(&mut self, index: usize) {
        self.history_index = index;
        self.location = self.history[index].clone();
        debug!(url = %self.location, "history traversal");
        self.dispatch_popstate();
        self.dispatch_navigate();
    }

    pub fn add_popstate_listener(&mut self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.allocate_id());
        self.popstate_listeners.push((id, listener));
        id
    }

    pub fn remove_popstate_listener(&mut self, id: ListenerId) -> bool {
        let before = self.popstate_listeners.len();
        self.popstate_listeners.retain(|(existing, _)| *existing != id);
        self.popstate_listeners.len() != before
    }

    pub fn add_navigate_listener(&mut self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.allocate_id());
        self.navigate_listeners.push((id, listener));
        id
    }

    pub fn remove_navigate_listener(&mut self, id: ListenerId) -> bool {
        let before = self.navigate_listeners.len();
        self.navigate_listeners.retain(|(existing, _)| *existing != id);
        self.navigate_listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.popstate_listeners.len() + self.navigate_listeners.len()
    }

    fn dispatch_popstate(&mut self) {
        let listeners: Vec<Listener> = self
            .popstate_listeners
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in listeners {
            listener(self);
        }
    }

    fn dispatch_navigate(&mut self) {
        if !self.supports_navigation_api {
            return;
        }
        let listeners: Vec<Listener> = self
            .navigate_listeners
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in listeners {
            listener(self);
        }
    }

    // -- mutation observers -----------------------------------------------

    pub fn observe_mutations(
        &mut self,
        target: NodeId,
        options: ObserveOptions,
        callback: MutationCallback,
    ) -> ObserverId {
        self.flush_records();
        let id = ObserverId(self.allocate_id());
        self.observers.push(ObserverSlot {
            id,
            target,
            options,
            callback,
            pending: Vec::new(),
        });
        self.document.set_recording(true);
        id
    }

    /// Drops the observer and any undelivered records.
    pub fn disconnect(&mut self, id: ObserverId) -> bool {
        self.flush_records();
        let before = self.observers.len();
        self.observers.retain(|slot| slot.id != id);
        if self.observers.is_empty() {
            self.document.set_recording(false);
        }
        self.observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Takes the observer's undelivered records without invoking its callback.
    pub fn take_records(&mut self, id: ObserverId) -> Vec<MutationRecord> {
        self.flush_records();
        self.observers
            .iter_mut()
            .find(|slot| slot.id == id)
            .map(|slot| std::mem::take(&mut slot.pending))
            .unwrap_or_default()
    }

    fn flush_records(&mut self) {
        if !self.document.has_pending_records() {
            return;
        }
        let records = self.document.take_records();
        for slot in &mut self.observers {
            for record in &records {
                if !slot.options.wants(record) {
                    continue;
                }
                let target = record.target();
                let in_scope = if slot.options.subtree {
                    self.document.contains(slot.target, target)
                } else {
                    slot.target == target
                };
                if in_scope {
                    slot.pending.push(record.clone());
                }
            }
        }
    }

    /// Delivers pending records to each observer in registration order.
    /// Returns true when at least one callback ran.
    fn deliver_mutations(&mut self) -> bool {
        self.flush_records();
        let batches: Vec<(ObserverId, MutationCallback, Vec<MutationRecord>)> = self
            .observers
            .iter_mut()
            .filter(|slot| !slot.pending.is_empty())
            .map(|slot| {
                (
                    slot.id,
                    Rc::clone(&slot.callback),
                    std::mem::take(&mut slot.pending),
                )
            })
            .collect();
        let delivered = !batches.is_empty();
        self.delivering += 1;
        for (id, callback, records) in batches {
            if self.observers.iter().any(|slot| slot.id == id) {
                callback(self, &records);
            }
        }
        self.delivering -= 1;
        delivered
    }

    // -- event loop -------------------------------------------------------

    pub fn now_ms(&self) -> u64 {
        self.event_loop.now_ms()
    }

    pub fn set_timeout(&mut self, delay_ms: u64, task: Task) -> TimerId {
        self.event_loop.schedule(delay_ms, task)
    }

    pub fn clear_timeout(&mut self, id: TimerId) -> bool {
        self.event_loop.cancel(id)
    }

    pub fn is_timer_pending(&self, id: TimerId) -> bool {
        self.event_loop.is_pending(id)
    }

    pub fn pending_timers(&self) -> usize {
        self.event_loop.pending_timers()
    }

    pub fn queue_microtask(&self, task: Task) {
        self.event_loop.microtasks().push(task);
    }

    pub fn microtask_queue(&self) -> MicrotaskQueue {
        self.event_loop.microtasks().clone()
    }

    /// Runs microtasks and mutation-observer deliveries until both are idle.
    pub fn run_microtasks(&mut self) {
        for _ in 0..MAX_CHECKPOINT_STEPS {
            if let Some(task) = self.event_loop.microtasks().pop() {
                task(self);
                continue;
            }
            if !self.deliver_mutations() {
                return;
            }
        }
        warn!(
            steps = MAX_CHECKPOINT_STEPS,
            "microtask checkpoint did not settle; deferring remaining work"
        );
    }

    /// Moves the virtual clock forward, firing due timers in order with a
    /// microtask checkpoint after each.
    pub fn advance(&mut self, ms: u64) {
        let until = self.event_loop.now_ms().saturating_add(ms);
        self.run_microtasks();
        while let Some(task) = self.event_loop.pop_due(until) {
            task(self);
            self.run_microtasks();
        }
        self.event_loop.advance_to(until);
    }

    // -- content ----------------------------------------------------------

    /// Replaces the body's children with freshly parsed markup, the way a
    /// client-side framework re-renders a route.
    pub fn rerender_body(&mut self, html: &str) {
        let host = self
            .document
            .body()
            .or_else(|| self.document.document_element())
            .unwrap_or_else(|| self.document.root());
        let nodes = parse_fragment(&mut self.document, html);
        if let Err(err) = self.document.replace_children(host, &nodes) {
            warn!(error = %err, "re-render failed");
        }
        self.reclaim_detached();
    }

    /// Frees detached nodes no observer can still see. Skipped while
    /// observer callbacks are running. Returns the number of slots freed.
    pub fn reclaim_detached(&mut self) -> usize {
        if self.delivering > 0 {
            return 0;
        }
        let pinned: Vec<NodeId> = self
            .observers
            .iter()
            .flat_map(|slot| {
                std::iter::once(slot.target).chain(slot.pending.iter().flat_map(MutationRecord::nodes))
            })
            .collect();
        let reclaimed = self.document.reclaim_detached_except(&pinned);
        if reclaimed > 0 {
            debug!(reclaimed, live = self.document.live_node_count(), "reclaimed detached nodes");
        }
        reclaimed
    }

    pub fn mask_events(&self) -> &[MaskEvent] {
        &self.mask_events
    }

    pub(crate) fn record_mask_event(&mut self, event: MaskEvent) {
        self.mask_events.push(event);
    }

    /// Number of element nodes connected to the document.
    pub fn element_count(&self) -> usize {
        self.document
            .descendants(self.document.root())
            .filter(|node| matches!(self.document.data(*node), NodeData::Element(_)))
            .count()
    }
}

fn native_push_state(page: &mut Page, url: &str) {
    page.history.truncate(page.history_index + 1);
    page.history.push(url.to_string());
    page.history_index = page.history.len() - 1;
    page.location = url.to_string();
    page.dispatch_navigate();
}

fn native_replace_state(page: &mut Page, url: &str) {
    page.history[page.history_index] = url.to_string();
    page.location = url.to_string();
    page.dispatch_navigate();
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::core::css::select_first;

    #[test]
    fn push_back_and_forward_track_location() {
        let mut page = Page::from_html("https://shop.test/", "<body></body>");
        let pops = Rc::new(Cell::new(0));
        let counter = Rc::clone(&pops);
        page.add_popstate_listener(Rc::new(move |_page: &mut Page| counter.set(counter.get() + 1)));

        page.push_state("/a");
        page.push_state("/b");
        assert_eq!(page.location(), "/b");
        assert_eq!(pops.get(), 0);

        assert!(page.history_back());
        assert_eq!(page.location(), "/a");
        assert!(page.history_forward());
        assert_eq!(page.location(), "/b");
        assert!(!page.history_forward());
        assert_eq!(pops.get(), 2);

        page.history_back();
        page.push_state("/c");
        assert_eq!(page.history_len(), 3);
        assert!(!page.history_forward());
    }

    #[test]
    fn navigate_fires_only_with_navigation_api() {
        let hits = Rc::new(Cell::new(0));
        for (supported, expected) in [(false, 0), (true, 2)] {
            hits.set(0);
            let mut page = Page::from_html("/", "<body></body>").with_navigation_api(supported);
            let counter = Rc::clone(&hits);
            page.add_navigate_listener(Rc::new(move |_page: &mut Page| counter.set(counter.get() + 1)));
            page.push_state("/x");
            page.replace_state("/y");
            assert_eq!(hits.get(), expected);
        }
    }

    #[test]
    fn mutation_records_are_delivered_at_checkpoint() {
        let mut page = Page::from_html("/", r#"<body><div id="app"></div><p id="out"></p></body>"#);
        let app = select_first(page.document(), "#app").expect("parse").expect("app");
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        page.observe_mutations(
            app,
            ObserveOptions::child_list_subtree(),
            Rc::new(move |_page: &mut Page, records: &[MutationRecord]| {
                sink.borrow_mut().extend(records.iter().map(MutationRecord::target));
            }),
        );

        let span = page.document_mut().create_element("span");
        page.document_mut().append_child(app, span).expect("append");
        let out = select_first(page.document(), "#out").expect("parse").expect("out");
        let other = page.document_mut().create_element("span");
        page.document_mut().append_child(out, other).expect("append");
        assert!(seen.borrow().is_empty());

        page.run_microtasks();
        assert_eq!(*seen.borrow(), vec![app]);
    }

    #[test]
    fn take_records_consumes_without_callback() {
        let mut page = Page::from_html("/", "<body></body>");
        let root = page.document().root();
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let id = page.observe_mutations(
            root,
            ObserveOptions::child_list_subtree(),
            Rc::new(move |_page: &mut Page, _records: &[MutationRecord]| counter.set(counter.get() + 1)),
        );
        page.rerender_body("<main>new</main>");
        assert_eq!(page.take_records(id).len(), 1);
        page.run_microtasks();
        assert_eq!(calls.get(), 0);

        assert!(page.disconnect(id));
        assert!(!page.document().is_recording());
    }

    #[test]
    fn timers_fire_in_order_and_can_be_cleared() {
        let mut page = Page::from_html("/", "<body></body>");
        let log = Rc::new(RefCell::new(Vec::new()));
        for (delay, label) in [(30, "c"), (10, "a"), (20, "b")] {
            let sink = Rc::clone(&log);
            page.set_timeout(delay, Box::new(move |page: &mut Page| {
                sink.borrow_mut().push((label, page.now_ms()));
            }));
        }
        let sink = Rc::clone(&log);
        let cancelled = page.set_timeout(15, Box::new(move |_page: &mut Page| sink.borrow_mut().push(("x", 0))));
        assert!(page.clear_timeout(cancelled));

        page.advance(25);
        assert_eq!(*log.borrow(), vec![("a", 10), ("b", 20)]);
        assert_eq!(page.now_ms(), 25);
        page.advance(10);
        assert_eq!(log.borrow().len(), 3);
    }

    #[test]
    fn microtasks_run_before_the_next_timer() {
        let mut page = Page::from_html("/", "<body></body>");
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        page.set_timeout(5, Box::new(move |page: &mut Page| {
            sink.borrow_mut().push("timer");
            let inner = Rc::clone(&sink);
            page.queue_microtask(Box::new(move |_page: &mut Page| inner.borrow_mut().push("micro")));
        }));
        let sink = Rc::clone(&log);
        page.set_timeout(5, Box::new(move |_page: &mut Page| sink.borrow_mut().push("timer2")));
        page.advance(5);
        assert_eq!(*log.borrow(), vec!["timer", "micro", "timer2"]);
    }
}
