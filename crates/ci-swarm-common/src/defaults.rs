//! Default configuration values shared between the coordinator and its tests
//!
//! These constants ensure consistent defaults across all ci-swarm components.

use crate::CreditMode;

/// Interval between trigger-state polls (seconds)
pub const DEFAULT_TRIGGER_POLL_INTERVAL_SECS: u64 = 10;

/// Deadline for a trigger to converge to the requested state (seconds)
pub const DEFAULT_TRIGGER_DEADLINE_SECS: u64 = 120;

/// How long to wait for a freshly launched agent to register (10 minutes)
pub const DEFAULT_REGISTRATION_TIMEOUT_SECS: u64 = 600;

/// Timeout for a single control-plane CLI invocation
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 120;

/// Instance type used when the caller does not pick one
pub const DEFAULT_INSTANCE_TYPE: &str = "t3.medium";

/// Where the bootstrap script installs the swarm client
pub const DEFAULT_AGENT_BINARY_PATH: &str = "/opt/swarm/swarm-client.jar";

/// Where the swarm client jar is downloaded from on the controller
pub const DEFAULT_AGENT_DOWNLOAD_PATH: &str = "swarm/swarm-client.jar";

/// Executors advertised by each swarm agent
pub const DEFAULT_AGENT_EXECUTORS: u32 = 1;

/// Agent workspace root on the instance
pub const DEFAULT_AGENT_FS_ROOT: &str = "/var/lib/swarm-agent";

/// CLI program used to reach the control plane
pub const DEFAULT_CLI_PROGRAM: &str = "aws";

// Serde default functions for struct field defaults

/// Returns the default instance type
pub fn default_instance_type() -> String {
    DEFAULT_INSTANCE_TYPE.to_string()
}

/// Returns the default agent binary path
pub fn default_agent_binary_path() -> String {
    DEFAULT_AGENT_BINARY_PATH.to_string()
}

/// Returns the default executor count
pub fn default_agent_executors() -> u32 {
    DEFAULT_AGENT_EXECUTORS
}

/// Returns the default credit mode
pub fn default_credit_mode() -> CreditMode {
    CreditMode::default()
}

/// Returns the default registration timeout
pub fn default_registration_timeout_secs() -> u64 {
    DEFAULT_REGISTRATION_TIMEOUT_SECS
}

/// Returns the default trigger poll interval
pub fn default_trigger_poll_interval_secs() -> u64 {
    DEFAULT_TRIGGER_POLL_INTERVAL_SECS
}

/// Returns the default trigger convergence deadline
pub fn default_trigger_deadline_secs() -> u64 {
    DEFAULT_TRIGGER_DEADLINE_SECS
}
