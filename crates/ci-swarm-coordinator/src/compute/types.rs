//! Compute types and configuration

use ci_swarm_common::defaults::{
    DEFAULT_AGENT_DOWNLOAD_PATH, DEFAULT_AGENT_FS_ROOT, default_agent_binary_path,
    default_agent_executors, default_credit_mode,
};
use ci_swarm_common::{CreditMode, TagSet};
use serde::{Deserialize, Serialize};

/// Service-level launch settings.
///
/// Held by the `ComputeService` instance rather than read from globals,
/// so two services in one process can use different credit modes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComputeSettings {
    /// CPU credit mode applied to burstable instance families
    #[serde(default = "default_credit_mode")]
    pub credit_mode: CreditMode,
    /// Bootstrap parameters for swarm agents
    #[serde(default)]
    pub swarm: SwarmSettings,
}

/// How a swarm agent connects back to the CI controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwarmSettings {
    /// Controller base URL, e.g. `https://ci.example.com`
    #[serde(default)]
    pub controller_url: String,
    /// Where the bootstrap script installs the swarm client jar
    #[serde(default = "default_agent_binary_path")]
    pub agent_binary_path: String,
    /// Executors advertised by the agent
    #[serde(default = "default_agent_executors")]
    pub executors: u32,
    /// Agent workspace root
    #[serde(default = "default_fs_root")]
    pub fs_root: String,
    /// Extra labels advertised next to the agent's own name
    #[serde(default)]
    pub extra_labels: Vec<String>,
}

fn default_fs_root() -> String {
    DEFAULT_AGENT_FS_ROOT.to_string()
}

impl Default for SwarmSettings {
    fn default() -> Self {
        Self {
            controller_url: String::new(),
            agent_binary_path: default_agent_binary_path(),
            executors: default_agent_executors(),
            fs_root: default_fs_root(),
            extra_labels: Vec::new(),
        }
    }
}

impl SwarmSettings {
    /// URL the bootstrap script downloads the client from when it is not baked into the image
    pub fn download_url(&self) -> String {
        format!(
            "{}/{}",
            self.controller_url.trim_end_matches('/'),
            DEFAULT_AGENT_DOWNLOAD_PATH
        )
    }
}

/// Configuration for launching a single instance
#[derive(Clone)]
pub struct LaunchInstanceConfig {
    /// Machine image ID
    pub ami_id: String,
    /// SSH key pair name
    pub key_pair: String,
    /// Instance type (e.g., "t3.medium")
    pub instance_type: String,
    /// Instance name, used as the default `Name` tag
    pub name: String,
    /// Caller tags; a `Name` tag here wins over `name`
    pub tags: TagSet,
    /// Security groups (at least one)
    pub security_group_ids: Vec<String>,
    /// Optional bootstrap payload (user data)
    pub user_data: Option<String>,
}

impl LaunchInstanceConfig {
    /// Create a new launch configuration with required fields
    pub fn new(
        ami_id: impl Into<String>,
        key_pair: impl Into<String>,
        instance_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            ami_id: ami_id.into(),
            key_pair: key_pair.into(),
            instance_type: instance_type.into(),
            name: name.into(),
            tags: TagSet::new(),
            security_group_ids: Vec::new(),
            user_data: None,
        }
    }

    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_security_groups<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.security_group_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_user_data(mut self, user_data: impl Into<String>) -> Self {
        self.user_data = Some(user_data.into());
        self
    }
}

impl std::fmt::Debug for LaunchInstanceConfig {
    // User data can embed agent credentials.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchInstanceConfig")
            .field("ami_id", &self.ami_id)
            .field("key_pair", &self.key_pair)
            .field("instance_type", &self.instance_type)
            .field("name", &self.name)
            .field("tags", &self.tags)
            .field("security_group_ids", &self.security_group_ids)
            .field("user_data_len", &self.user_data.as_ref().map(String::len))
            .finish()
    }
}

/// Configuration for launching a self-registering swarm agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwarmLaunchConfig {
    pub ami_id: String,
    pub key_pair: String,
    pub instance_type: String,
    /// Instance name, doubling as the CI agent label (no whitespace)
    pub name: String,
    pub tags: TagSet,
    pub security_group_ids: Vec<String>,
    /// Reference resolved into the agent's controller credentials
    pub agent_credentials_ref: String,
    /// Overrides `SwarmSettings::agent_binary_path`
    pub agent_binary_path: Option<String>,
    /// Recorded as the `ci-swarm:run-id` tag
    pub run_id: Option<String>,
}

impl SwarmLaunchConfig {
    pub fn new(
        ami_id: impl Into<String>,
        key_pair: impl Into<String>,
        instance_type: impl Into<String>,
        name: impl Into<String>,
        agent_credentials_ref: impl Into<String>,
    ) -> Self {
        Self {
            ami_id: ami_id.into(),
            key_pair: key_pair.into(),
            instance_type: instance_type.into(),
            name: name.into(),
            tags: TagSet::new(),
            security_group_ids: Vec::new(),
            agent_credentials_ref: agent_credentials_ref.into(),
            agent_binary_path: None,
            run_id: None,
        }
    }

    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_security_groups<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.security_group_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_agent_binary_path(mut self, path: impl Into<String>) -> Self {
        self.agent_binary_path = Some(path.into());
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// The CI agent label this instance registers under
    pub fn agent_label(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults_from_empty_json() {
        let settings: ComputeSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.credit_mode, CreditMode::Standard);
        assert_eq!(settings.swarm.executors, 1);
        assert_eq!(settings.swarm.agent_binary_path, "/opt/swarm/swarm-client.jar");
    }

    #[test]
    fn test_settings_reject_unknown_fields() {
        let result: Result<ComputeSettings, _> =
            serde_json::from_str(r#"{"credit_mode": "unlimited", "burst": true}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_download_url() {
        let swarm = SwarmSettings {
            controller_url: "https://ci.example.com/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            swarm.download_url(),
            "https://ci.example.com/swarm/swarm-client.jar"
        );
    }

    #[test]
    fn test_launch_config_debug_hides_user_data() {
        let config = LaunchInstanceConfig::new("ami-1", "kp", "t3.micro", "agent-1")
            .with_user_data("PASSWORD=hunter2");
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("user_data_len"));
    }
}
