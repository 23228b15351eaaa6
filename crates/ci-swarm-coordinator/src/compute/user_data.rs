//! Swarm agent bootstrap script and bootstrap failure detection
//!
//! The script is passed as instance user data. It installs the swarm client
//! if the image does not ship it, writes the agent password to a root-only
//! file and execs the client, which then registers with the controller.

use super::types::SwarmSettings;
use crate::collaborators::ScopedCredential;
use crate::control_plane::{Result, SwarmError};

/// Where the bootstrap script writes the agent password on the instance
pub const AGENT_PASSWORD_FILE: &str = "/etc/ci-swarm/agent-password";

/// Patterns that indicate cloud-init/bootstrap failure
const BOOTSTRAP_FAILURE_PATTERNS: &[&str] = &[
    "unbound variable",
    "Failed to start cloud-final",
    "cc_scripts_user.py[WARNING]: Failed to run module scripts-user",
    "java: command not found",
    "Unable to access jarfile",
    "curl: (22)",
    "Could not resolve host",
    "401 Unauthorized",
];

/// Check if console output indicates a bootstrap failure
pub fn detect_bootstrap_failure(console_output: &str) -> Option<String> {
    BOOTSTRAP_FAILURE_PATTERNS
        .iter()
        .find(|pattern| console_output.contains(**pattern))
        .map(|pattern| pattern.to_string())
}

/// Characters that could break a double-quoted bash string or enable injection
const FORBIDDEN: &[char] = &['"', '\\', '`', '$', '\n', '\r'];

/// Validate that a user-data input is safe for shell interpolation.
pub fn validate_shell_input(value: &str, field_name: &str) -> Result<()> {
    if value.is_empty() {
        return Err(SwarmError::invalid(format!("{field_name} cannot be empty")));
    }
    if let Some(bad) = value.chars().find(|c| FORBIDDEN.contains(c)) {
        return Err(SwarmError::invalid(format!(
            "{field_name} contains forbidden character: {bad:?}"
        )));
    }
    Ok(())
}

/// Secrets are single-quoted in the script, so any character is allowed
/// except NUL. The error never echoes the value.
fn validate_secret_input(value: &str, field_name: &str) -> Result<()> {
    if value.is_empty() || value.contains('\0') {
        return Err(SwarmError::invalid(format!(
            "{field_name} is empty or contains characters that cannot be embedded in user data"
        )));
    }
    Ok(())
}

/// Quote a value as a single bash word that expands to itself.
fn shell_single_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Agent names double as CI labels and controller node paths, so they are
/// limited to ASCII letters, digits, `.`, `_` and `-`.
pub fn validate_agent_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SwarmError::invalid("agent name cannot be empty"));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(SwarmError::invalid(format!(
            "agent name '{name}' contains whitespace; it is also used as the CI agent label"
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(SwarmError::invalid(format!(
            "agent name contains forbidden character: {bad:?}"
        )));
    }
    Ok(())
}

/// Inputs for one bootstrap script
#[derive(Debug, Clone, Copy)]
pub struct SwarmBootstrap<'a> {
    pub agent_name: &'a str,
    pub agent_binary_path: &'a str,
    pub settings: &'a SwarmSettings,
}

/// Render the bootstrap script for a swarm agent.
///
/// Every interpolated value is validated first; nothing in the result is
/// logged by callers since it contains the agent password.
pub fn generate_swarm_user_data(
    bootstrap: &SwarmBootstrap<'_>,
    credential: &ScopedCredential,
) -> Result<String> {
    let settings = bootstrap.settings;
    validate_agent_name(bootstrap.agent_name)?;
    validate_shell_input(bootstrap.agent_name, "agent name")?;
    validate_shell_input(&settings.controller_url, "controller_url")?;
    validate_shell_input(bootstrap.agent_binary_path, "agent_binary_path")?;
    validate_shell_input(&settings.fs_root, "fs_root")?;
    for label in &settings.extra_labels {
        validate_agent_name(label)?;
        validate_shell_input(label, "label")?;
    }
    validate_shell_input(credential.username(), "agent username")?;
    validate_secret_input(credential.secret(), "agent password")?;

    if settings.executors == 0 {
        return Err(SwarmError::invalid("executors must be at least 1"));
    }

    let labels = std::iter::once(bootstrap.agent_name)
        .chain(settings.extra_labels.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");

    Ok(format!(
        r#"#!/bin/bash
set -euo pipefail

exec > >(tee /var/log/ci-swarm-bootstrap.log) 2>&1

CONTROLLER_URL="{controller_url}"
AGENT_NAME="{agent_name}"
AGENT_LABELS="{labels}"
AGENT_JAR="{agent_jar}"
FS_ROOT="{fs_root}"
EXECUTORS="{executors}"
AGENT_USER="{username}"

mkdir -p "$(dirname "$AGENT_JAR")" "$FS_ROOT" /etc/ci-swarm

if [ ! -f "$AGENT_JAR" ]; then
    echo "Fetching swarm client from controller..."
    curl -fsSL -o "$AGENT_JAR" "{download_url}"
fi

(umask 077 && printf '%s' {password} > {password_file})

echo "Starting swarm agent ${{AGENT_NAME}}..."
exec java -jar "$AGENT_JAR" \
    -url "$CONTROLLER_URL" \
    -name "$AGENT_NAME" \
    -labels "$AGENT_LABELS" \
    -executors "$EXECUTORS" \
    -fsroot "$FS_ROOT" \
    -mode exclusive \
    -disableClientsUniqueId \
    -username "$AGENT_USER" \
    -passwordFile {password_file}
"#,
        controller_url = settings.controller_url.trim_end_matches('/'),
        agent_name = bootstrap.agent_name,
        labels = labels,
        agent_jar = bootstrap.agent_binary_path,
        fs_root = settings.fs_root,
        executors = settings.executors,
        username = credential.username(),
        download_url = settings.download_url(),
        password = shell_single_quote(credential.secret()),
        password_file = AGENT_PASSWORD_FILE,
    ))
}
