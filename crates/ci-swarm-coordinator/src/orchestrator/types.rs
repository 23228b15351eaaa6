//! Orchestrator types

use crate::control_plane::SwarmError;
use ci_swarm_common::defaults::DEFAULT_REGISTRATION_TIMEOUT_SECS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Orchestration phases.
///
/// `Failed` is reachable from every non-terminal phase; the phase that
/// failed is carried by [`OrchestrationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Phase {
    Idle,
    Launching,
    AwaitingRegistration,
    Executing,
    TearingDown,
    Done,
    Failed,
}

/// What happens to the agent instance once the workload is over
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TeardownMode {
    /// Stop, for reusable fleets
    Stop,
    /// Terminate, for disposable swarm agents
    #[default]
    Terminate,
}

/// Per-orchestrator settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub teardown_mode: TeardownMode,
    /// Bound on the wait for the agent to register
    pub registration_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            teardown_mode: TeardownMode::default(),
            registration_timeout: Duration::from_secs(DEFAULT_REGISTRATION_TIMEOUT_SECS),
        }
    }
}

/// Successful orchestration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub instance_id: String,
    pub agent_label: String,
    /// Always `Phase::Done`
    pub phase: Phase,
}

/// A failed orchestration.
///
/// `source` is the failure that ended the run. If teardown then failed too,
/// that error is kept in `teardown` and never replaces `source`.
#[derive(Debug, thiserror::Error)]
#[error("{phase} failed{}: {source}", instance_id.as_deref().map(|id| format!(" for {id}")).unwrap_or_default())]
pub struct OrchestrationError {
    /// Phase the run was in when it failed
    pub phase: Phase,
    /// Set once launch succeeded
    pub instance_id: Option<String>,
    pub source: SwarmError,
    /// Secondary teardown failure
    pub teardown: Option<SwarmError>,
}

impl OrchestrationError {
    /// Whether the agent may still be running
    pub fn instance_leaked(&self) -> bool {
        self.instance_id.is_some() && (self.teardown.is_some() || self.phase == Phase::TearingDown)
    }
}
