//! Production `CommandRunner` backed by `tokio::process`

use anyhow::{Context, Result};
use ci_swarm_common::defaults::DEFAULT_COMMAND_TIMEOUT_SECS;
use ci_swarm_common::{CommandOutput, CommandRunner};
use std::process::Stdio;
use std::time::Duration;
use tracing::trace;

/// Runs each command as a child process with a hard timeout.
///
/// The child is spawned with `kill_on_drop`, so a timed-out or cancelled
/// invocation never leaves a CLI process behind.
#[derive(Debug, Clone)]
pub struct TokioCommandRunner {
    timeout: Duration,
}

impl Default for TokioCommandRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS))
    }
}

impl TokioCommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        trace!(program, argc = args.len(), "Spawning command");

        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| {
                anyhow::anyhow!("{program} timed out after {}s", self.timeout.as_secs())
            })?
            .with_context(|| format!("failed to run {program}"))?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
