//! Collaborators the orchestrator calls into
//!
//! The orchestrator needs to know whether an agent registered and how to
//! hand work to it. Swarm launches also turn a credentials reference into a
//! username/secret pair.

pub mod credentials;
pub mod execution;
pub mod registration;

pub use credentials::{EnvCredentialResolver, ScopedCredential, SecretsManagerResolver};
pub use execution::ShellExecutionTarget;
pub use registration::ControllerRegistrationWatcher;

use crate::control_plane::Result;
use std::time::Duration;

/// Waits for a freshly launched agent to show up on the CI controller.
#[allow(async_fn_in_trait)] // Internal use only, Send+Sync bounds on trait are sufficient
#[cfg_attr(test, mockall::automock)]
pub trait RegistrationWatcher: Send + Sync {
    /// Return once `agent_label` is connected, or fail with `Timeout`
    /// after `timeout`.
    async fn await_registration(&self, agent_label: &str, timeout: Duration) -> Result<()>;
}

/// Runs caller-supplied work against a registered agent.
#[allow(async_fn_in_trait)]
#[cfg_attr(test, mockall::automock)]
pub trait ExecutionTarget: Send + Sync {
    /// Bind the workload to `agent_label` and run it to completion
    async fn bind_and_run(&self, agent_label: &str) -> anyhow::Result<()>;
}

/// Resolves a credentials reference into a short-lived credential.
#[allow(async_fn_in_trait)]
#[cfg_attr(test, mockall::automock)]
pub trait CredentialResolver: Send + Sync {
    async fn resolve_scoped_credential(&self, credentials_ref: &str) -> Result<ScopedCredential>;
}

impl<T: RegistrationWatcher> RegistrationWatcher for &T {
    async fn await_registration(&self, agent_label: &str, timeout: Duration) -> Result<()> {
        (**self).await_registration(agent_label, timeout).await
    }
}

impl<T: ExecutionTarget> ExecutionTarget for &T {
    async fn bind_and_run(&self, agent_label: &str) -> anyhow::Result<()> {
        (**self).bind_and_run(agent_label).await
    }
}

impl<T: CredentialResolver> CredentialResolver for &T {
    async fn resolve_scoped_credential(&self, credentials_ref: &str) -> Result<ScopedCredential> {
        (**self).resolve_scoped_credential(credentials_ref).await
    }
}
