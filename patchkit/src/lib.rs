//! DOM patch engine.
//!
//! Applies ordered, declarative mutation payloads to a page, generates
//! selectors that survive re-renders, and validates drag-and-drop moves
//! against structural constraints. The architecture keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (DOM, selectors, operations,
//!   patching, constraints). No timers, no I/O.
//! - **[`runtime`]**: The page host and everything that reacts to it over
//!   time (event loop, navigation, SPA reapplication, anti-flicker mask).
//! - **[`io`]**: Configuration and payload files.
//!
//! [`apply`] ties them together for callers that just want a payload applied.

pub mod apply;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod runtime;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use apply::{ApplyOptions, ApplyReport, PatchEngine, apply_payload};
pub use crate::core::constraints::validate_drop;
pub use crate::core::sanitize::sanitize_html;
pub use crate::core::selector::generate_selector;
