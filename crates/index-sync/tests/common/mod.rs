//! Test infrastructure for the synchronization engine.
//!
//! This module provides model fixtures, record builders and a harness that
//! wires a model to an in-memory search client.

#![allow(dead_code)]

pub mod fixtures;
pub mod harness;

// Re-export commonly used items
pub use fixtures::*;
pub use harness::*;
