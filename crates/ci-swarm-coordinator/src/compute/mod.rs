//! Instance lifecycle on the compute service

mod console;
mod instance;
mod operations;
mod types;
pub mod user_data;

pub use operations::ComputeOperations;
pub use types::{ComputeSettings, LaunchInstanceConfig, SwarmLaunchConfig, SwarmSettings};
pub use user_data::detect_bootstrap_failure;

#[cfg(test)]
pub use operations::MockComputeOperations;

use crate::collaborators::CredentialResolver;
use crate::control_plane::ControlPlaneClient;
use ci_swarm_common::CommandRunner;

/// Service name the compute client must be scoped to
pub const SERVICE_NAME: &str = "ec2";

/// Compute operations over one region/credential scope.
///
/// `K` resolves agent credentials for swarm launches; plain launches and
/// teardown never touch it.
pub struct ComputeService<R, K> {
    pub(crate) client: ControlPlaneClient<R>,
    pub(crate) settings: ComputeSettings,
    pub(crate) credentials: K,
}

impl<R: CommandRunner, K: CredentialResolver> ComputeService<R, K> {
    pub fn new(client: ControlPlaneClient<R>, settings: ComputeSettings, credentials: K) -> Self {
        Self {
            client,
            settings,
            credentials,
        }
    }

    pub fn client(&self) -> &ControlPlaneClient<R> {
        &self.client
    }

    pub fn settings(&self) -> &ComputeSettings {
        &self.settings
    }
}
