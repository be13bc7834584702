//! Common test utilities for gallery-sync integration tests

#[allow(dead_code)]
pub mod fixtures;

pub use fixtures::*;
