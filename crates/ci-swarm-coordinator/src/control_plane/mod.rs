//! Control-plane invocation layer
//!
//! Every remote operation is one CLI invocation of the form
//! `aws <service> <command> <args...> --region <region> --profile <ref> --output json`.
//! The per-service modules (`compute`, `triggers`, the secrets resolver)
//! build arguments and interpret the parsed JSON; this module owns the
//! invocation itself and error classification.

pub mod args;
pub mod context;
pub mod error;
pub mod runner;

pub use args::CommandArgs;
pub use context::ServiceContext;
pub use error::{Result, SwarmError};
pub use runner::TokioCommandRunner;

use ci_swarm_common::CommandRunner;
use ci_swarm_common::defaults::DEFAULT_CLI_PROGRAM;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};

/// Output of one control-plane invocation
#[derive(Clone, Default, PartialEq)]
pub struct CommandResult {
    /// Stdout exactly as printed by the CLI
    pub raw_output: String,
    /// Stdout parsed as JSON, if it was JSON
    pub parsed: Option<Value>,
}

impl CommandResult {
    /// Parse CLI stdout. Empty or non-JSON output leaves `parsed` unset.
    pub fn from_stdout(raw_output: String) -> Self {
        let trimmed = raw_output.trim();
        let parsed = if trimmed.is_empty() {
            None
        } else {
            serde_json::from_str(trimmed).ok()
        };
        Self { raw_output, parsed }
    }

    /// Look up a value by JSON pointer (e.g. `/Instances/0/InstanceId`)
    pub fn field(&self, pointer: &str) -> Option<&Value> {
        self.parsed.as_ref()?.pointer(pointer)
    }

    /// Look up a string by JSON pointer
    pub fn str_field(&self, pointer: &str) -> Option<&str> {
        self.field(pointer).and_then(Value::as_str)
    }

    /// Like [`str_field`](Self::str_field), failing with `UnexpectedResponse`
    pub fn require_str(&self, operation: &str, pointer: &str) -> Result<&str> {
        self.str_field(pointer)
            .ok_or_else(|| SwarmError::UnexpectedResponse {
                operation: operation.to_string(),
                field: pointer.trim_start_matches('/').replace('/', "."),
            })
    }

    /// Deserialize the whole response into a typed record
    pub fn deserialize<T: DeserializeOwned>(&self, operation: &str) -> Result<T> {
        let value = self
            .parsed
            .clone()
            .ok_or_else(|| SwarmError::UnexpectedResponse {
                operation: operation.to_string(),
                field: "<json body>".to_string(),
            })?;
        serde_json::from_value(value).map_err(|e| SwarmError::UnexpectedResponse {
            operation: operation.to_string(),
            field: e.to_string(),
        })
    }
}

impl std::fmt::Debug for CommandResult {
    // Responses can carry secret material; only show the shape.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandResult")
            .field("raw_len", &self.raw_output.len())
            .field("parsed", &self.parsed.is_some())
            .finish()
    }
}

/// Client for one remote service, scoped by its `ServiceContext`.
///
/// The client never retries: a failed invocation is classified and returned
/// to the caller, who decides what to do about it.
pub struct ControlPlaneClient<R> {
    context: ServiceContext,
    runner: R,
    program: String,
}

impl<R: CommandRunner> ControlPlaneClient<R> {
    pub fn new(context: ServiceContext, runner: R) -> Self {
        Self {
            context,
            runner,
            program: DEFAULT_CLI_PROGRAM.to_string(),
        }
    }

    /// Use a different CLI binary (e.g. a pinned path)
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn context(&self) -> &ServiceContext {
        &self.context
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Full argv for `command`, including the region/credential scope
    pub fn build_argv(&self, command: &str, args: &CommandArgs) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.as_slice().len() + 8);
        argv.push(self.context.service_name().to_string());
        argv.push(command.to_string());
        argv.extend(args.as_slice().iter().cloned());
        argv.extend([
            "--region".to_string(),
            self.context.region().to_string(),
            "--profile".to_string(),
            self.context.credentials_ref().to_string(),
            "--output".to_string(),
            "json".to_string(),
        ]);
        argv
    }

    /// Run one command against the service.
    ///
    /// Exactly one process is spawned per call. Arguments are not logged
    /// since some of them (user data) embed credentials.
    #[instrument(skip_all, fields(service = %self.context.service_name(), command = %command))]
    pub async fn execute(&self, command: &str, args: CommandArgs) -> Result<CommandResult> {
        let command = command.trim();
        if command.is_empty() {
            return Err(SwarmError::invalid("command cannot be empty"));
        }

        let operation = format!("{} {}", self.context.service_name(), command);
        let argv = self.build_argv(command, &args);
        debug!(argc = argv.len(), region = %self.context.region(), "Invoking control plane");

        let output = self
            .runner
            .run(&self.program, &argv)
            .await
            .map_err(|e| SwarmError::Unavailable {
                operation: operation.clone(),
                code: None,
                message: format!("{e:#}"),
            })?;

        if !output.is_success() {
            let err = error::classify_cli_failure(&operation, &output.stderr);
            debug!(exit_code = ?output.exit_code, error = %err, "Control plane call failed");
            return Err(err);
        }

        Ok(CommandResult::from_stdout(output.stdout))
    }
}
