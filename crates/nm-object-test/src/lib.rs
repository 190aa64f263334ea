//! Integration test infrastructure for nm-object mirrors
//!
//! Provides:
//! - A mock bus with short call timeouts
//! - Device property fixtures
//! - A minimal consumer type for engine-level tests
//! - Notification recording and log capture
//! - Single-threaded runtime helpers

pub mod fixtures;
mod logs;
mod runtime;

pub use fixtures::*;
pub use logs::LogCapture;
pub use runtime::{run_local, settle, settle_for};
