//! Deterministic, pure logic of the patch engine.
//!
//! Core modules are free of timers and I/O. They operate on an in-memory
//! [`dom::Document`] and return deterministic outputs suitable for tests.

pub mod constraints;
pub mod containers;
pub mod css;
pub mod dom;
pub mod dropzone;
pub mod error;
pub mod geometry;
pub mod html;
pub mod ops;
pub mod patch;
pub mod sanitize;
pub mod selector;
pub mod types;
