//! Scripted command runner
//!
//! Stands in for the `aws` CLI. Every invocation is recorded so tests can
//! assert on the exact argv the control-plane client produced.

use anyhow::Result;
use ci_swarm_common::{CommandOutput, CommandRunner};
use std::collections::VecDeque;
use std::sync::Mutex;

type Handler = Box<dyn Fn(&[String]) -> Result<CommandOutput> + Send + Sync>;

/// One recorded invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub program: String,
    pub args: Vec<String>,
}

impl RecordedCall {
    /// Service name (first argument)
    pub fn service(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or_default()
    }

    /// Command name (second argument)
    pub fn command(&self) -> &str {
        self.args.get(1).map(String::as_str).unwrap_or_default()
    }

    /// True if `flag` appears anywhere in the argv
    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }

    /// First value following `flag`
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.flag_values(flag).into_iter().next()
    }

    /// All values following `flag` up to the next `--option`
    pub fn flag_values(&self, flag: &str) -> Vec<&str> {
        let Some(pos) = self.args.iter().position(|a| a == flag) else {
            return Vec::new();
        };
        self.args[pos + 1..]
            .iter()
            .take_while(|a| !a.starts_with("--"))
            .map(String::as_str)
            .collect()
    }

    /// Parse the JSON value following `flag`
    pub fn flag_json(&self, flag: &str) -> Option<serde_json::Value> {
        self.flag_value(flag)
            .and_then(|v| serde_json::from_str(v).ok())
    }
}

/// `CommandRunner` driven by a handler closure or a queue of responses
pub struct ScriptedRunner {
    calls: Mutex<Vec<RecordedCall>>,
    handler: Handler,
}

impl ScriptedRunner {
    /// Respond to each call with the handler's result
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&[String]) -> Result<CommandOutput> + Send + Sync + 'static,
    {
        Self {
            calls: Mutex::new(Vec::new()),
            handler: Box::new(handler),
        }
    }

    /// Respond with `responses` in order; extra calls fail
    pub fn with_responses(responses: Vec<Result<CommandOutput>>) -> Self {
        let queue = Mutex::new(VecDeque::from(responses));
        Self::new(move |args| {
            queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("no scripted response for {args:?}")))
        })
    }

    /// Respond to every call with the same successful stdout
    pub fn always(stdout: &str) -> Self {
        let stdout = stdout.to_string();
        Self::new(move |_| Ok(CommandOutput::success(stdout.clone())))
    }

    /// All invocations so far
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of invocations so far
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Invocations of a given command (e.g. "terminate-instances")
    pub fn calls_to(&self, command: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.command() == command)
            .collect()
    }
}

impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(RecordedCall {
            program: program.to_string(),
            args: args.to_vec(),
        });
        (self.handler)(args)
    }
}
