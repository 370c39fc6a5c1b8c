//! Shared test utilities for papconv integration tests.
//!
//! This module provides:
//! - `TestHarness` for running a full service inside temp directories
//! - `ScriptedEngine`, a fake engine whose behavior is driven by file content
//! - `DocumentHost` and `serve_unframed`, local HTTP servers for URL jobs

pub mod engines;
pub mod harness;
pub mod http;

pub use engines::ScriptedEngine;
pub use harness::TestHarness;
pub use http::{serve_unframed, DocumentHost};
