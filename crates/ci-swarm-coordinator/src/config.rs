//! Settings file for the `ci-swarm` binary
//!
//! Everything here is optional: command-line flags (and their environment
//! fallbacks) take precedence, the file fills in what they leave unset, and
//! compiled-in defaults cover the rest.

use crate::compute::ComputeSettings;
use crate::control_plane::{Result, SwarmError};
use crate::orchestrator::{OrchestratorConfig, TeardownMode};
use crate::triggers::ReconcileConfig;
use ci_swarm_common::TagSet;
use ci_swarm_common::defaults::{
    DEFAULT_CLI_PROGRAM, DEFAULT_COMMAND_TIMEOUT_SECS, default_instance_type,
    default_registration_timeout_secs, default_trigger_deadline_secs,
    default_trigger_poll_interval_secs,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Control-plane scope and CLI invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AwsConfig {
    pub region: Option<String>,
    /// Named credentials profile passed as `--profile`
    pub profile: Option<String>,
    #[serde(default = "default_cli_program")]
    pub cli_program: String,
    /// Per-invocation timeout
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_cli_program() -> String {
    DEFAULT_CLI_PROGRAM.to_string()
}

fn default_command_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: None,
            profile: None,
            cli_program: default_cli_program(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

/// Defaults for launch commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LaunchDefaults {
    pub ami_id: Option<String>,
    pub key_pair: Option<String>,
    #[serde(default = "default_instance_type")]
    pub instance_type: String,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    /// Added to every launch; command-line tags win on conflict
    #[serde(default)]
    pub tags: TagSet,
    /// Agent credentials reference for swarm launches
    pub agent_credentials_ref: Option<String>,
}

impl Default for LaunchDefaults {
    fn default() -> Self {
        Self {
            ami_id: None,
            key_pair: None,
            instance_type: default_instance_type(),
            security_group_ids: Vec::new(),
            tags: TagSet::new(),
            agent_credentials_ref: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerSettings {
    #[serde(default = "default_trigger_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_trigger_deadline_secs")]
    pub deadline_secs: u64,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_trigger_poll_interval_secs(),
            deadline_secs: default_trigger_deadline_secs(),
        }
    }
}

impl TriggerSettings {
    pub fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            interval: Duration::from_secs(self.poll_interval_secs),
            deadline: Duration::from_secs(self.deadline_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorSettings {
    #[serde(default)]
    pub teardown_mode: TeardownMode,
    #[serde(default = "default_registration_timeout_secs")]
    pub registration_timeout_secs: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            teardown_mode: TeardownMode::default(),
            registration_timeout_secs: default_registration_timeout_secs(),
        }
    }
}

impl OrchestratorSettings {
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            teardown_mode: self.teardown_mode,
            registration_timeout: Duration::from_secs(self.registration_timeout_secs),
        }
    }
}

/// Top-level settings file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub launch: LaunchDefaults,
    #[serde(default)]
    pub compute: ComputeSettings,
    #[serde(default)]
    pub triggers: TriggerSettings,
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
}

impl Settings {
    /// Read and parse a JSON settings file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| SwarmError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
            .map_err(|e| SwarmError::invalid(format!("{}: {e}", path.display())))
    }

    /// Parse settings from JSON text
    pub fn from_json(contents: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(contents)
    }

    /// Settings from `path`, or defaults when no file is given
    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
