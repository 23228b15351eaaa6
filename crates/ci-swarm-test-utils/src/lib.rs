//! Shared test utilities for ci-swarm
//!
//! This crate provides common test helpers that can be used across
//! unit and integration tests without a real control plane.
//!
//! ## Modules
//!
//! - [`clock`]: Simulated clock that advances on sleep
//! - [`fixtures`]: Canned CLI responses (JSON bodies and error output)
//! - [`runner`]: Scripted `CommandRunner` that records every invocation

#![allow(clippy::unwrap_used)]

pub mod clock;
pub mod fixtures;
pub mod runner;

// Re-export commonly used items
pub use clock::ManualClock;
pub use runner::{RecordedCall, ScriptedRunner};
