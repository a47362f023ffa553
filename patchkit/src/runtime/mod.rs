//! Page runtime: the host page, its event loop, and the components that react
//! to it over time (navigation observers, the SPA controller, the mask).
//!
//! Everything here is single-threaded. Shared state lives in `Rc`/`RefCell`
//! and re-entry happens only through timers, microtasks and observer
//! callbacks driven by [`page::Page`].

pub mod event_loop;
pub mod mask;
pub mod navigation;
pub mod page;
pub mod spa;
