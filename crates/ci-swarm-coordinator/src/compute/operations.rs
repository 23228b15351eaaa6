//! Compute operations trait for testing

use super::ComputeService;
use super::types::SwarmLaunchConfig;
use crate::collaborators::CredentialResolver;
use crate::control_plane::Result;
use ci_swarm_common::CommandRunner;

/// The compute operations the orchestrator depends on.
///
/// Lets orchestration be tested without a control plane.
#[allow(async_fn_in_trait)] // Internal use only, Send+Sync bounds on trait are sufficient
#[cfg_attr(test, mockall::automock)]
pub trait ComputeOperations: Send + Sync {
    /// Launch a self-registering swarm agent and return its instance ID
    async fn launch_swarm_instance(&self, config: SwarmLaunchConfig) -> Result<String>;

    /// Stop instances in one batched call
    async fn stop_instances(&self, instance_ids: &[String]) -> Result<()>;

    /// Terminate instances in one batched call
    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<()>;

    /// Serial console output, if any yet
    async fn get_console_output(&self, instance_id: &str) -> Result<Option<String>>;
}

impl<R: CommandRunner, K: CredentialResolver> ComputeOperations for ComputeService<R, K> {
    async fn launch_swarm_instance(&self, config: SwarmLaunchConfig) -> Result<String> {
        ComputeService::launch_swarm_instance(self, config).await
    }

    async fn stop_instances(&self, instance_ids: &[String]) -> Result<()> {
        ComputeService::stop_instances(self, instance_ids).await
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<()> {
        ComputeService::terminate_instances(self, instance_ids).await
    }

    async fn get_console_output(&self, instance_id: &str) -> Result<Option<String>> {
        ComputeService::get_console_output(self, instance_id).await
    }
}

impl<T: ComputeOperations> ComputeOperations for &T {
    async fn launch_swarm_instance(&self, config: SwarmLaunchConfig) -> Result<String> {
        (**self).launch_swarm_instance(config).await
    }

    async fn stop_instances(&self, instance_ids: &[String]) -> Result<()> {
        (**self).stop_instances(instance_ids).await
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<()> {
        (**self).terminate_instances(instance_ids).await
    }

    async fn get_console_output(&self, instance_id: &str) -> Result<Option<String>> {
        (**self).get_console_output(instance_id).await
    }
}
