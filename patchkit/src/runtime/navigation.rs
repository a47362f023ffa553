//! Client-side navigation detection.
//!
//! Two interchangeable observers sit behind [`NavigationObserver`]:
//! [`HistoryPatchObserver`] wraps the page's `pushState`/`replaceState` entry
//! points and listens for `popstate`; [`NativeNavigationObserver`] subscribes
//! to the `navigate` event on pages that advertise it.

use std::cell::Cell;
use std::rc::Rc;

use tracing::debug;

use super::page::{HistoryMethod, ListenerId, NavFn, Page};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NavigationTrigger {
    PushState,
    ReplaceState,
    PopState,
    Navigate,
}

pub type NavigationCallback = Rc<dyn Fn(&mut Page, NavigationTrigger)>;

pub trait NavigationObserver {
    /// Starts observing. Attaching an attached observer re-attaches it.
    fn attach(&mut self, page: &mut Page, callback: NavigationCallback);
    /// Stops observing. Safe to call repeatedly.
    fn detach(&mut self, page: &mut Page);
    fn is_attached(&self) -> bool;
}

/// Picks the native observer when the page supports it and it is preferred.
pub fn navigation_observer_for(page: &Page, prefer_native: bool) -> Box<dyn NavigationObserver> {
    if prefer_native && page.supports_navigation_api() {
        Box::new(NativeNavigationObserver::default())
    } else {
        Box::new(HistoryPatchObserver::default())
    }
}

struct Patched {
    method: HistoryMethod,
    original: NavFn,
    wrapper: NavFn,
}

#[derive(Default)]
pub struct HistoryPatchObserver {
    patched: Vec<Patched>,
    popstate: Option<ListenerId>,
    active: Option<Rc<Cell<bool>>>,
}

impl HistoryPatchObserver {
    fn wrap(
        original: NavFn,
        active: Rc<Cell<bool>>,
        callback: NavigationCallback,
        trigger: NavigationTrigger,
    ) -> NavFn {
        Rc::new(move |page: &mut Page, url: &str| {
            original(page, url);
            if active.get() {
                callback(page, trigger);
            }
        })
    }
}

impl NavigationObserver for HistoryPatchObserver {
    fn attach(&mut self, page: &mut Page, callback: NavigationCallback) {
        self.detach(page);
        let active = Rc::new(Cell::new(true));
        for (method, trigger) in [
            (HistoryMethod::PushState, NavigationTrigger::PushState),
            (HistoryMethod::ReplaceState, NavigationTrigger::ReplaceState),
        ] {
            let original = page.history_entry_point(method);
            let wrapper = Self::wrap(
                Rc::clone(&original),
                Rc::clone(&active),
                Rc::clone(&callback),
                trigger,
            );
            page.set_history_entry_point(method, Rc::clone(&wrapper));
            self.patched.push(Patched {
                method,
                original,
                wrapper,
            });
        }
        let flag = Rc::clone(&active);
        self.popstate = Some(page.add_popstate_listener(Rc::new(move |page: &mut Page| {
            if flag.get() {
                callback(page, NavigationTrigger::PopState);
            }
        })));
        self.active = Some(active);
        debug!("history entry points patched");
    }

    fn detach(&mut self, page: &mut Page) {
        if let Some(active) = self.active.take() {
            active.set(false);
        }
        for patched in self.patched.drain(..) {
            let current = page.history_entry_point(patched.method);
            if Rc::ptr_eq(&current, &patched.wrapper) {
                page.set_history_entry_point(patched.method, patched.original);
            } else {
                // Someone wrapped us; unwinding would drop their wrapper. Ours
                // stays in the chain as a pass-through.
                debug!(method = ?patched.method, "entry point re-patched elsewhere; leaving inert wrapper");
            }
        }
        if let Some(id) = self.popstate.take() {
            page.remove_popstate_listener(id);
        }
    }

    fn is_attached(&self) -> bool {
        self.active.is_some()
    }
}

#[derive(Default)]
pub struct NativeNavigationObserver {
    listener: Option<ListenerId>,
}

impl NavigationObserver for NativeNavigationObserver {
    fn attach(&mut self, page: &mut Page, callback: NavigationCallback) {
        self.detach(page);
        self.listener = Some(page.add_navigate_listener(Rc::new(move |page: &mut Page| {
            callback(page, NavigationTrigger::Navigate);
        })));
    }

    fn detach(&mut self, page: &mut Page) {
        if let Some(id) = self.listener.take() {
            page.remove_navigate_listener(id);
        }
    }

    fn is_attached(&self) -> bool {
        self.listener.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    fn recorder() -> (Rc<RefCell<Vec<NavigationTrigger>>>, NavigationCallback) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let callback: NavigationCallback = Rc::new(move |_page: &mut Page, trigger: NavigationTrigger| {
            sink.borrow_mut().push(trigger);
        });
        (log, callback)
    }

    #[test]
    fn patch_observer_reports_each_entry_point() {
        let mut page = Page::from_html("/", "<body></body>");
        let (log, callback) = recorder();
        let mut observer = HistoryPatchObserver::default();
        observer.attach(&mut page, callback);

        page.push_state("/a");
        page.replace_state("/b");
        page.history_back();
        assert_eq!(
            *log.borrow(),
            vec![
                NavigationTrigger::PushState,
                NavigationTrigger::ReplaceState,
                NavigationTrigger::PopState,
            ]
        );
    }

    #[test]
    fn detach_restores_originals_and_is_repeatable() {
        let mut page = Page::from_html("/", "<body></body>");
        let before = page.history_entry_point(HistoryMethod::PushState);
        let (log, callback) = recorder();
        let mut observer = HistoryPatchObserver::default();
        observer.attach(&mut page, callback);
        assert!(!Rc::ptr_eq(&before, &page.history_entry_point(HistoryMethod::PushState)));

        observer.detach(&mut page);
        observer.detach(&mut page);
        assert!(!observer.is_attached());
        assert!(Rc::ptr_eq(&before, &page.history_entry_point(HistoryMethod::PushState)));
        assert_eq!(page.listener_count(), 0);

        page.push_state("/after");
        assert!(log.borrow().is_empty());
        assert_eq!(page.location(), "/after");
    }

    #[test]
    fn detach_leaves_foreign_wrapper_in_place() {
        let mut page = Page::from_html("/", "<body></body>");
        let (log, callback) = recorder();
        let mut observer = HistoryPatchObserver::default();
        observer.attach(&mut page, callback);

        let ours = page.history_entry_point(HistoryMethod::PushState);
        let foreign_calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&foreign_calls);
        let foreign: NavFn = Rc::new(move |page: &mut Page, url: &str| {
            counter.set(counter.get() + 1);
            ours(page, url);
        });
        page.set_history_entry_point(HistoryMethod::PushState, Rc::clone(&foreign));

        observer.detach(&mut page);
        assert!(Rc::ptr_eq(&foreign, &page.history_entry_point(HistoryMethod::PushState)));
        page.push_state("/x");
        assert_eq!(foreign_calls.get(), 1);
        assert_eq!(page.location(), "/x");
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn native_observer_follows_navigate_events() {
        let mut page = Page::from_html("/", "<body></body>").with_navigation_api(true);
        let (log, callback) = recorder();
        let mut observer = navigation_observer_for(&page, true);
        observer.attach(&mut page, callback);
        page.push_state("/a");
        page.history_back();
        assert_eq!(*log.borrow(), vec![NavigationTrigger::Navigate, NavigationTrigger::Navigate]);

        observer.detach(&mut page);
        page.push_state("/b");
        assert_eq!(log.borrow().len(), 2);
    }
}
