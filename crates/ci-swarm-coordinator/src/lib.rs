//! ci-swarm-coordinator - ephemeral CI agent orchestration over the `aws` CLI
//!
//! Launches self-registering CI swarm agents, waits for them to connect to
//! the controller, runs a workload against them and always tears them down.
//! Also drives event-source mappings (triggers) to an enabled or disabled
//! state with a bounded poll.
//!
//! ## Modules
//!
//! - [`control_plane`]: region/credential scoped CLI client and error kinds
//! - [`compute`]: instance lifecycle, swarm bootstrap and console access
//! - [`triggers`]: event-source mapping listing and state reconciliation
//! - [`orchestrator`]: provision, await, execute, teardown state machine
//! - [`collaborators`]: registration watcher, workload runner, credential resolvers
//! - [`config`]: settings file for the binary
//! - [`wait`]: exponential-backoff wait with cancellation

pub mod collaborators;
pub mod compute;
pub mod config;
pub mod control_plane;
pub mod orchestrator;
pub mod triggers;
pub mod wait;

pub use control_plane::{ControlPlaneClient, Result, ServiceContext, SwarmError};
