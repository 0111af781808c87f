//! Shared test utilities for studygen integration tests.
//!
//! This module provides:
//! - `TestHarness` wrapping an orchestrator over an in-memory database
//! - Builders for worker result messages

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
