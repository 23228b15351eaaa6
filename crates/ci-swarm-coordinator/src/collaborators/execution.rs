//! Local command as the orchestrated workload

use super::ExecutionTarget;
use anyhow::{Context, Result, bail};
use tracing::{info, instrument};

/// Environment variable carrying the agent label into the workload
pub const AGENT_LABEL_ENV: &str = "CI_SWARM_AGENT_LABEL";

/// Runs a local command once the agent is registered.
///
/// The command typically triggers a CI job pinned to the agent label, which
/// it reads from `CI_SWARM_AGENT_LABEL`.
#[derive(Debug, Clone)]
pub struct ShellExecutionTarget {
    program: String,
    args: Vec<String>,
}

impl ShellExecutionTarget {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a command line split on the first element
    pub fn from_command(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .context("workload command cannot be empty")?;
        Ok(Self::new(program.clone(), args.to_vec()))
    }
}

impl ExecutionTarget for ShellExecutionTarget {
    #[instrument(skip_all, fields(agent = %agent_label, program = %self.program))]
    async fn bind_and_run(&self, agent_label: &str) -> Result<()> {
        info!("Starting workload");

        let status = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .env(AGENT_LABEL_ENV, agent_label)
            .kill_on_drop(true)
            .status()
            .await
            .with_context(|| format!("failed to start {}", self.program))?;

        if !status.success() {
            bail!("{} exited with {}", self.program, status);
        }
        info!("Workload finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> ShellExecutionTarget {
        ShellExecutionTarget::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn test_label_is_exported() {
        sh("test \"$CI_SWARM_AGENT_LABEL\" = agent-1")
            .bind_and_run("agent-1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_an_error() {
        let err = sh("exit 4").bind_and_run("agent-1").await.unwrap_err();
        assert!(err.to_string().contains("exited with"));
    }

    #[test]
    fn test_from_command() {
        assert!(ShellExecutionTarget::from_command(&[]).is_err());
        let target =
            ShellExecutionTarget::from_command(&["make".to_string(), "test".to_string()]).unwrap();
        assert_eq!(target.program, "make");
        assert_eq!(target.args, vec!["test"]);
    }
}
