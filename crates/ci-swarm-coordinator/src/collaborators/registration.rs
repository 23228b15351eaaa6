//! Agent registration watcher backed by the controller's JSON API
//!
//! A swarm agent shows up as a node at `{controller}/computer/{label}/api/json`
//! once it connects. The node exists (404 otherwise) and reports
//! `"offline": false` when it is ready to take work.

use super::{RegistrationWatcher, ScopedCredential};
use crate::control_plane::{Result, SwarmError};
use crate::wait::{Probe, WaitConfig, wait_for_resource};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

const OPERATION: &str = "await_registration";

#[derive(Debug, Deserialize)]
struct NodeStatus {
    #[serde(default = "default_offline")]
    offline: bool,
    #[serde(default, rename = "temporarilyOffline")]
    temporarily_offline: bool,
}

fn default_offline() -> bool {
    true
}

/// Polls the CI controller until the agent node is online
pub struct ControllerRegistrationWatcher {
    http: reqwest::Client,
    controller_url: String,
    credential: Option<ScopedCredential>,
    wait: WaitConfig,
    cancel: Option<CancellationToken>,
}

impl ControllerRegistrationWatcher {
    pub fn new(controller_url: impl Into<String>) -> Result<Self> {
        let controller_url = controller_url.into().trim_end_matches('/').to_string();
        if !(controller_url.starts_with("http://") || controller_url.starts_with("https://")) {
            return Err(SwarmError::invalid(format!(
                "controller URL '{controller_url}' must start with http:// or https://"
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SwarmError::invalid(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            controller_url,
            credential: None,
            wait: WaitConfig::default(),
            cancel: None,
        })
    }

    /// Authenticate API requests with basic auth
    pub fn with_credential(mut self, credential: ScopedCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Override the backoff schedule (the timeout always comes from the caller)
    pub fn with_wait_config(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn node_url(&self, agent_label: &str) -> String {
        format!("{}/computer/{}/api/json", self.controller_url, agent_label)
    }

    async fn probe(&self, url: &str) -> Result<Probe> {
        let mut request = self.http.get(url);
        if let Some(cred) = &self.credential {
            request = request.basic_auth(cred.username(), Some(cred.secret()));
        }

        let response = match request.send().await {
            Ok(response) => response,
            // The controller may be restarting; keep polling until the deadline.
            Err(e) => return Ok(Probe::Pending(format!("controller unreachable: {e}"))),
        };

        match response.status() {
            StatusCode::NOT_FOUND => Ok(Probe::Pending("not registered".to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SwarmError::Unauthenticated {
                operation: OPERATION.to_string(),
                message: format!("controller returned {}", response.status()),
            }),
            status if status.is_success() => {
                let node: NodeStatus = match response.json().await {
                    Ok(node) => node,
                    Err(e) => return Ok(Probe::Pending(format!("unreadable node status: {e}"))),
                };
                if node.offline || node.temporarily_offline {
                    Ok(Probe::Pending("offline".to_string()))
                } else {
                    Ok(Probe::Ready)
                }
            }
            status => Ok(Probe::Pending(format!("controller returned {status}"))),
        }
    }
}

impl RegistrationWatcher for ControllerRegistrationWatcher {
    #[instrument(skip_all, fields(agent = %agent_label))]
    async fn await_registration(&self, agent_label: &str, timeout: Duration) -> Result<()> {
        let url = self.node_url(agent_label);
        info!(timeout_secs = timeout.as_secs(), "Waiting for agent to register");

        let attempts = wait_for_resource(
            self.wait.clone().with_timeout(timeout),
            self.cancel.as_ref(),
            OPERATION,
            agent_label,
            || self.probe(&url),
        )
        .await?;

        debug!(attempts, "Agent registered");
        Ok(())
    }
}
