//! # Combat Test Utilities
//!
//! Shared testing utilities for the combat crates:
//! - Standard unit types and a small eastern-front board
//! - Determinism test harness
//! - Property-based testing strategies
//! - Test logging

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod determinism;
pub mod fixtures;
pub mod logging;

pub use logging::init_test_logging;

/// Re-export proptest for convenience.
pub use proptest;
