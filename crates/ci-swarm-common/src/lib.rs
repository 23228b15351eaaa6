//! ci-swarm-common - Shared types and utilities
//!
//! This crate provides the types shared by the coordinator and its test
//! helpers, without any process or HTTP code to keep it lightweight.
//!
//! ## Modules
//!
//! - [`clock`]: Injectable time source for bounded polls
//! - [`defaults`]: Default configuration values
//! - [`instance_family`]: Burstable instance detection and CPU credit mode
//! - [`region`]: Supported region allow-list
//! - [`runner`]: Process execution seam used by the control-plane client
//! - [`tags`]: Resource tag constants and merge rules

pub mod clock;
pub mod defaults;
pub mod instance_family;
pub mod region;
pub mod runner;
pub mod tags;

// Re-export commonly used types
pub use clock::{Clock, TokioClock};
pub use instance_family::{CreditMode, is_burstable};
pub use region::Region;
pub use runner::{CommandOutput, CommandRunner};
pub use tags::TagSet;
