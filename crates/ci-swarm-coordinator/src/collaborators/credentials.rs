//! Scoped agent credentials
//!
//! A credential lives only as long as it takes to render the bootstrap
//! script. Neither implementation caches what it resolves.

use super::CredentialResolver;
use crate::control_plane::{CommandArgs, ControlPlaneClient, Result, SwarmError};
use ci_swarm_common::CommandRunner;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

/// Username + secret for the agent to authenticate to the controller
#[derive(Clone, PartialEq, Eq)]
pub struct ScopedCredential {
    username: String,
    secret: String,
}

impl ScopedCredential {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        let username = username.into();
        let secret = secret.into();
        if username.trim().is_empty() {
            return Err(SwarmError::invalid("credential username cannot be empty"));
        }
        if secret.is_empty() {
            return Err(SwarmError::invalid("credential secret cannot be empty"));
        }
        Ok(Self { username, secret })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl std::fmt::Debug for ScopedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedCredential")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Environment variable prefix for a credentials reference.
///
/// `ci-agent.prod` becomes `CI_AGENT_PROD`.
pub fn env_prefix(credentials_ref: &str) -> String {
    credentials_ref
        .trim()
        .chars()
        .map(|c| match c {
            '-' | '.' | '/' | ':' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

/// Reads `<PREFIX>_USERNAME` and `<PREFIX>_PASSWORD`
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialResolver {
    // Fixed variables for tests; `None` reads the process environment.
    vars: Option<HashMap<String, String>>,
}

impl EnvCredentialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve against a fixed set of variables instead of the environment
    pub fn from_vars(vars: HashMap<String, String>) -> Self {
        Self { vars: Some(vars) }
    }

    fn lookup(&self, key: &str) -> Option<String> {
        match &self.vars {
            Some(vars) => vars.get(key).cloned(),
            None => std::env::var(key).ok(),
        }
    }
}

impl CredentialResolver for EnvCredentialResolver {
    async fn resolve_scoped_credential(&self, credentials_ref: &str) -> Result<ScopedCredential> {
        let prefix = env_prefix(credentials_ref);
        if prefix.is_empty() {
            return Err(SwarmError::invalid("credentials reference cannot be empty"));
        }
        let user_key = format!("{prefix}_USERNAME");
        let pass_key = format!("{prefix}_PASSWORD");

        let username = self
            .lookup(&user_key)
            .ok_or_else(|| SwarmError::invalid(format!("{user_key} is not set")))?;
        let secret = self
            .lookup(&pass_key)
            .ok_or_else(|| SwarmError::invalid(format!("{pass_key} is not set")))?;

        debug!(credentials_ref, "Resolved agent credential from environment");
        ScopedCredential::new(username, secret)
    }
}

#[derive(Deserialize)]
struct SecretPayload {
    username: Option<String>,
    password: Option<String>,
}

/// Fetches `{"username": ..., "password": ...}` from a secrets store
pub struct SecretsManagerResolver<R> {
    client: ControlPlaneClient<R>,
}

impl<R: CommandRunner> SecretsManagerResolver<R> {
    /// `client` must be scoped to the `secretsmanager` service
    pub fn new(client: ControlPlaneClient<R>) -> Self {
        Self { client }
    }
}

impl<R: CommandRunner> CredentialResolver for SecretsManagerResolver<R> {
    async fn resolve_scoped_credential(&self, credentials_ref: &str) -> Result<ScopedCredential> {
        const OPERATION: &str = "secretsmanager get-secret-value";

        if credentials_ref.trim().is_empty() {
            return Err(SwarmError::invalid("credentials reference cannot be empty"));
        }

        let result = self
            .client
            .execute(
                "get-secret-value",
                CommandArgs::new().flag("--secret-id", credentials_ref.trim()),
            )
            .await?;
        let secret_string = result.require_str(OPERATION, "/SecretString")?;

        let payload: SecretPayload =
            serde_json::from_str(secret_string).map_err(|_| SwarmError::UnexpectedResponse {
                operation: OPERATION.to_string(),
                field: "SecretString (JSON object)".to_string(),
            })?;

        let missing = |field: &str| SwarmError::UnexpectedResponse {
            operation: OPERATION.to_string(),
            field: format!("SecretString.{field}"),
        };
        let username = payload.username.ok_or_else(|| missing("username"))?;
        let password = payload.password.ok_or_else(|| missing("password"))?;

        debug!(credentials_ref, "Resolved agent credential from secrets store");
        ScopedCredential::new(username, password)
    }
}
