//! Single-threaded event loop with a virtual clock.
//!
//! Timers are keyed by `(deadline, id)` so timers with equal deadlines fire in
//! scheduling order. Time only moves when the host calls
//! [`Page::advance`](super::page::Page::advance).

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

use super::page::Page;

/// Deferred unit of work run against the page.
pub type Task = Box<dyn FnOnce(&mut Page)>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Shared handle to the microtask queue.
///
/// Cloned into guards that need to schedule work from `Drop`, where no page
/// borrow is available.
#[derive(Clone, Default)]
pub struct MicrotaskQueue {
    queue: Rc<RefCell<VecDeque<Task>>>,
}

impl MicrotaskQueue {
    pub fn push(&self, task: Task) {
        self.queue.borrow_mut().push_back(task);
    }

    pub fn pop(&self) -> Option<Task> {
        self.queue.borrow_mut().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}

#[derive(Default)]
pub struct EventLoop {
    now_ms: u64,
    next_timer: u64,
    timers: BTreeMap<(u64, u64), Task>,
    deadlines: HashMap<TimerId, u64>,
    microtasks: MicrotaskQueue,
}

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn schedule(&mut self, delay_ms: u64, task: Task) -> TimerId {
        let id = TimerId(self.next_timer);
        self.next_timer += 1;
        let deadline = self.now_ms.saturating_add(delay_ms);
        self.timers.insert((deadline, id.0), task);
        self.deadlines.insert(id, deadline);
        id
    }

    /// Returns false when the timer already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.deadlines.remove(&id) {
            Some(deadline) => self.timers.remove(&(deadline, id.0)).is_some(),
            None => false,
        }
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id)
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Removes the earliest timer due at or before `until`, moving the clock
    /// to its deadline.
    pub fn pop_due(&mut self, until_ms: u64) -> Option<Task> {
        let (&(deadline, seq), _) = self.timers.iter().next()?;
        if deadline > until_ms {
            return None;
        }
        let task = self.timers.remove(&(deadline, seq))?;
        self.deadlines.remove(&TimerId(seq));
        self.now_ms = self.now_ms.max(deadline);
        Some(task)
    }

    pub fn advance_to(&mut self, now_ms: u64) {
        self.now_ms = self.now_ms.max(now_ms);
    }

    pub fn microtasks(&self) -> &MicrotaskQueue {
        &self.microtasks
    }
}
