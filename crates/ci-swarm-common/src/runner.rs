//! Process execution seam
//!
//! The control-plane client never spawns processes itself; it goes through a
//! `CommandRunner` so tests can script responses without a real CLI.

use anyhow::Result;

/// Captured result of one process invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal
    pub exit_code: Option<i32>,
    /// Captured stdout (lossy UTF-8)
    pub stdout: String,
    /// Captured stderr (lossy UTF-8)
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// True if the process exited with status 0
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs one external program per call.
///
/// Implementations must not retry. A non-zero exit is returned as data in
/// `CommandOutput`; only spawn/wait failures and timeouts are errors.
#[allow(async_fn_in_trait)] // Internal seam, Send+Sync bounds on the trait are sufficient
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and capture its output
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

impl<T: CommandRunner> CommandRunner for std::sync::Arc<T> {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        (**self).run(program, args).await
    }
}

impl<T: CommandRunner> CommandRunner for &T {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        (**self).run(program, args).await
    }
}
