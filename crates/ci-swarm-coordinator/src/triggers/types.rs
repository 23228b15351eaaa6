//! Event-source mapping types

use ci_swarm_common::defaults::{DEFAULT_TRIGGER_DEADLINE_SECS, DEFAULT_TRIGGER_POLL_INTERVAL_SECS};
use serde::Deserialize;
use std::time::Duration;

/// Observed state of an event-source mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
pub enum TriggerState {
    Enabled,
    Disabled,
    /// Enabling, Disabling, Creating, Updating or Deleting
    Transitioning,
    Unknown,
}

impl TriggerState {
    /// Map the `State` string the control plane reports
    pub fn from_remote(state: &str) -> Self {
        match state {
            "Enabled" => Self::Enabled,
            "Disabled" => Self::Disabled,
            "Enabling" | "Disabling" | "Creating" | "Updating" | "Deleting" => Self::Transitioning,
            _ => Self::Unknown,
        }
    }

    /// Terminal state a request for `enabled` converges to
    pub fn desired(enabled: bool) -> Self {
        if enabled { Self::Enabled } else { Self::Disabled }
    }
}

/// Snapshot of one event-source mapping.
///
/// Only authoritative right after the poll that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerMapping {
    pub uuid: String,
    pub function_ref: String,
    pub event_source_arn: String,
    pub state: TriggerState,
}

/// Mapping as printed by the lambda event-source-mapping commands
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct RawMapping {
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(default)]
    pub function_arn: String,
    #[serde(default)]
    pub event_source_arn: String,
    #[serde(default)]
    pub state: String,
}

impl From<RawMapping> for TriggerMapping {
    fn from(raw: RawMapping) -> Self {
        Self {
            state: TriggerState::from_remote(&raw.state),
            uuid: raw.uuid,
            function_ref: raw.function_arn,
            event_source_arn: raw.event_source_arn,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ListMappingsResponse {
    #[serde(default)]
    pub event_source_mappings: Vec<RawMapping>,
}

/// Which mappings an operation applies to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerFilter {
    /// Function name or ARN
    pub function_ref: Option<String>,
    pub event_source_arn: Option<String>,
}

impl TriggerFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function(mut self, function_ref: impl Into<String>) -> Self {
        self.function_ref = Some(function_ref.into());
        self
    }

    pub fn event_source(mut self, event_source_arn: impl Into<String>) -> Self {
        self.event_source_arn = Some(event_source_arn.into());
        self
    }

    /// True when no filter would narrow the listing
    pub fn is_empty(&self) -> bool {
        let blank = |v: &Option<String>| v.as_deref().is_none_or(|s| s.trim().is_empty());
        blank(&self.function_ref) && blank(&self.event_source_arn)
    }

    pub(crate) fn function_ref(&self) -> Option<&str> {
        self.function_ref.as_deref().filter(|s| !s.trim().is_empty())
    }

    pub(crate) fn event_source_arn(&self) -> Option<&str> {
        self.event_source_arn.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// Poll cadence for trigger convergence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Sleep before each poll
    pub interval: Duration,
    /// Give up once this much time has elapsed without convergence
    pub deadline: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_TRIGGER_POLL_INTERVAL_SECS),
            deadline: Duration::from_secs(DEFAULT_TRIGGER_DEADLINE_SECS),
        }
    }
}

/// Phases of one reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ReconcilePhase {
    Requested,
    Polling,
    Converged,
    TimedOut,
}

/// Outcome of a converged reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub uuid: String,
    /// Polls issued after the update, including the converging one
    pub polls: u32,
    pub elapsed: Duration,
    pub state: TriggerState,
}
