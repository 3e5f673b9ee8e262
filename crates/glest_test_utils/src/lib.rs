//! # Glest Test Utilities
//!
//! Shared testing utilities for all crates:
//! - A small sample tech tree and world builders
//! - Determinism test harness
//! - Property-based testing strategies for command streams

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod determinism;
pub mod fixtures;

/// Re-export proptest for convenience.
pub use proptest;
