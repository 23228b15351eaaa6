//! ci-swarm: ephemeral CI agents and trigger state from the command line
//!
//! Launches, tears down and inspects swarm agent instances, runs a command
//! against a freshly provisioned agent, and enables or disables event-source
//! mappings. Every remote operation goes through the `aws` CLI.

use anyhow::{Context, Result, bail};
use ci_swarm_common::tags::parse_tag_pairs;
use ci_swarm_common::{CreditMode, Region, TagSet};
use ci_swarm_coordinator::collaborators::{
    ControllerRegistrationWatcher, CredentialResolver, EnvCredentialResolver, ScopedCredential,
    SecretsManagerResolver, ShellExecutionTarget,
};
use ci_swarm_coordinator::compute::{self, ComputeService, LaunchInstanceConfig, SwarmLaunchConfig};
use ci_swarm_coordinator::config::Settings;
use ci_swarm_coordinator::control_plane::{
    ControlPlaneClient, ServiceContext, SwarmError, TokioCommandRunner,
};
use ci_swarm_coordinator::orchestrator::{
    EphemeralAgentOrchestrator, OrchestrationError, TeardownMode, create_teardown_system,
};
use ci_swarm_coordinator::triggers::{self, TriggerFilter, TriggerReconciler};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "ci-swarm")]
#[command(about = "Ephemeral CI swarm agents and trigger state over the aws CLI")]
#[command(version)]
struct Args {
    /// JSON settings file
    #[arg(long, global = true, env = "CI_SWARM_CONFIG")]
    config: Option<PathBuf>,

    /// Region (overrides the settings file)
    #[arg(long, global = true, env = "CI_SWARM_REGION")]
    region: Option<String>,

    /// Credentials profile passed to the aws CLI
    #[arg(long, global = true, env = "CI_SWARM_PROFILE")]
    profile: Option<String>,

    #[command(subcommand)]
    command: Command,
}

/// Instance parameters shared by the launch commands
#[derive(clap::Args, Debug)]
struct LaunchArgs {
    /// Instance name (also the default Name tag)
    #[arg(long)]
    name: String,

    /// Machine image ID
    #[arg(long, env = "CI_SWARM_AMI")]
    ami: Option<String>,

    /// SSH key pair name
    #[arg(long, env = "CI_SWARM_KEY_PAIR")]
    key_pair: Option<String>,

    /// Instance type
    #[arg(long, env = "CI_SWARM_INSTANCE_TYPE")]
    instance_type: Option<String>,

    /// Security group ID (repeatable)
    #[arg(long = "security-group")]
    security_groups: Vec<String>,

    /// Tag as KEY=VALUE (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// CPU credit mode for burstable instance types
    #[arg(long, env = "CI_SWARM_CREDIT_MODE")]
    credit_mode: Option<CreditMode>,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum CredentialSource {
    /// `<REF>_USERNAME` / `<REF>_PASSWORD` environment variables
    #[default]
    Env,
    /// A secretsmanager secret holding `{"username", "password"}`
    SecretsManager,
}

/// Parameters for a self-registering swarm agent
#[derive(clap::Args, Debug)]
struct SwarmArgs {
    #[command(flatten)]
    launch: LaunchArgs,

    /// Reference resolved into the agent's controller credentials
    #[arg(long, env = "CI_SWARM_AGENT_CREDENTIALS")]
    credentials_ref: Option<String>,

    /// Where agent credentials are resolved from
    #[arg(long, value_enum, default_value_t, env = "CI_SWARM_CREDENTIAL_SOURCE")]
    credential_source: CredentialSource,

    /// CI controller base URL
    #[arg(long, env = "CI_SWARM_CONTROLLER_URL")]
    controller_url: Option<String>,

    /// Swarm client jar location on the instance
    #[arg(long)]
    agent_binary_path: Option<String>,

    /// Run ID recorded as a tag (generated for `run` when omitted)
    #[arg(long)]
    run_id: Option<String>,
}

/// Arguments for the run command (extracted to reduce enum size)
#[derive(clap::Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    swarm: SwarmArgs,

    /// Seconds to wait for the agent to register
    #[arg(long)]
    registration_timeout: Option<u64>,

    /// Stop or terminate the agent afterwards
    #[arg(long, env = "CI_SWARM_TEARDOWN")]
    teardown: Option<TeardownMode>,

    /// Credentials reference for the controller API (defaults to the agent's)
    #[arg(long)]
    controller_credentials_ref: Option<String>,

    /// Command to run once the agent is registered; it receives the agent
    /// label in CI_SWARM_AGENT_LABEL
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct FilterArgs {
    /// Function name or ARN
    #[arg(long)]
    function: Option<String>,

    /// Event source ARN
    #[arg(long)]
    event_source: Option<String>,
}

impl From<FilterArgs> for TriggerFilter {
    fn from(args: FilterArgs) -> Self {
        TriggerFilter {
            function_ref: args.function,
            event_source_arn: args.event_source,
        }
    }
}

#[derive(Subcommand, Debug)]
enum TriggerCommand {
    /// List event-source mappings
    List {
        #[command(flatten)]
        filter: FilterArgs,

        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Enable or disable mappings and wait until they converge
    Set {
        #[command(flatten)]
        filter: FilterArgs,

        /// A single mapping UUID instead of a filter
        #[arg(long, conflicts_with_all = ["function", "event_source"])]
        uuid: Option<String>,

        #[arg(long, conflicts_with = "disable", required_unless_present = "disable")]
        enable: bool,

        #[arg(long)]
        disable: bool,
    },
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch a single instance
    Launch {
        #[command(flatten)]
        launch: LaunchArgs,

        /// File passed as user data
        #[arg(long)]
        user_data_file: Option<PathBuf>,
    },

    /// Launch a swarm agent that registers with the CI controller
    LaunchSwarm(Box<SwarmArgs>),

    /// Stop instances
    Stop {
        #[arg(required = true)]
        instance_ids: Vec<String>,
    },

    /// Terminate instances (idempotent)
    Terminate {
        #[arg(required = true)]
        instance_ids: Vec<String>,
    },

    /// Reboot instances
    Reboot {
        #[arg(required = true)]
        instance_ids: Vec<String>,
    },

    /// Add or replace tags on a resource
    Tag {
        resource_id: String,

        /// Tag as KEY=VALUE (repeatable, at most 50)
        #[arg(long = "tag", required = true)]
        tags: Vec<String>,
    },

    /// Save a console screenshot
    Screenshot {
        instance_id: String,

        /// Output file (default: <instance-id>.jpg)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the serial console output
    ConsoleOutput { instance_id: String },

    /// Event-source mapping state
    Triggers {
        #[command(subcommand)]
        command: TriggerCommand,
    },

    /// Launch an agent, run a command against it, and tear it down
    Run(Box<RunArgs>),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if let Some(err) = e.downcast_ref::<OrchestrationError>() {
        if let Some(teardown) = &err.teardown {
            let _ = writeln!(stderr, "  \x1b[33mTeardown also failed:\x1b[0m {teardown}");
        }
        if err.instance_leaked() {
            if let Some(id) = &err.instance_id {
                let _ = writeln!(
                    stderr,
                    "\n\x1b[1;33mInstance {id} may still be running; run `ci-swarm terminate {id}`\x1b[0m"
                );
            }
        }
    }

    let suggestion = e
        .chain()
        .find_map(|cause| cause.downcast_ref::<SwarmError>())
        .and_then(SwarmError::suggestion);
    if let Some(suggestion) = suggestion {
        let _ = writeln!(stderr, "\n\x1b[36mHint:\x1b[0m {suggestion}");
    }

    if std::env::var("RUST_BACKTRACE").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_BACKTRACE=1 for a detailed backtrace\x1b[0m"
        );
    } else {
        let backtrace = e.backtrace();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            let _ = writeln!(stderr, "\n\x1b[2mBacktrace:\x1b[0m\n{backtrace}");
        }
    }
}

/// Agent credential resolver picked on the command line
enum AgentCredentials {
    Env(EnvCredentialResolver),
    SecretsManager(SecretsManagerResolver<TokioCommandRunner>),
}

impl CredentialResolver for AgentCredentials {
    async fn resolve_scoped_credential(
        &self,
        credentials_ref: &str,
    ) -> ci_swarm_coordinator::Result<ScopedCredential> {
        match self {
            AgentCredentials::Env(r) => r.resolve_scoped_credential(credentials_ref).await,
            AgentCredentials::SecretsManager(r) => r.resolve_scoped_credential(credentials_ref).await,
        }
    }
}

/// Region, profile and CLI settings resolved from flags and the settings file
struct Scope {
    settings: Settings,
    region: String,
    profile: String,
}

impl Scope {
    fn new(args: &Args) -> Result<Self> {
        let settings = Settings::load_optional(args.config.as_deref())?;
        let region = args
            .region
            .clone()
            .or_else(|| settings.aws.region.clone())
            .with_context(|| {
                format!(
                    "no region given; pass --region or set CI_SWARM_REGION (supported: {})",
                    Region::supported().join(", ")
                )
            })?;
        let profile = args
            .profile
            .clone()
            .or_else(|| settings.aws.profile.clone())
            .unwrap_or_else(|| "default".to_string());
        Ok(Self {
            settings,
            region,
            profile,
        })
    }

    fn client(&self, service: &str) -> Result<ControlPlaneClient<TokioCommandRunner>> {
        let context = ServiceContext::new(&self.region, &self.profile, service)?;
        let runner =
            TokioCommandRunner::new(Duration::from_secs(self.settings.aws.command_timeout_secs));
        Ok(ControlPlaneClient::new(context, runner).with_program(&self.settings.aws.cli_program))
    }

    fn resolver(&self, source: CredentialSource) -> Result<AgentCredentials> {
        Ok(match source {
            CredentialSource::Env => AgentCredentials::Env(EnvCredentialResolver::new()),
            CredentialSource::SecretsManager => AgentCredentials::SecretsManager(
                SecretsManagerResolver::new(self.client("secretsmanager")?),
            ),
        })
    }

    /// Compute service for commands that never resolve agent credentials
    fn compute(&self) -> Result<ComputeService<TokioCommandRunner, EnvCredentialResolver>> {
        Ok(ComputeService::new(
            self.client(compute::SERVICE_NAME)?,
            self.settings.compute.clone(),
            EnvCredentialResolver::new(),
        ))
    }

    fn launch_config(&self, args: LaunchArgs) -> Result<LaunchInstanceConfig> {
        let defaults = &self.settings.launch;
        let ami = args
            .ami
            .or_else(|| defaults.ami_id.clone())
            .context("no image given; pass --ami or set launch.ami_id")?;
        let key_pair = args
            .key_pair
            .or_else(|| defaults.key_pair.clone())
            .context("no key pair given; pass --key-pair or set launch.key_pair")?;
        let instance_type = args
            .instance_type
            .unwrap_or_else(|| defaults.instance_type.clone());
        let security_groups = if args.security_groups.is_empty() {
            defaults.security_group_ids.clone()
        } else {
            args.security_groups
        };

        let mut tags: TagSet = defaults.tags.clone();
        tags.extend(parse_tag_pairs(&args.tags).map_err(anyhow::Error::msg)?);

        Ok(LaunchInstanceConfig::new(ami, key_pair, instance_type, args.name)
            .with_tags(tags)
            .with_security_groups(security_groups))
    }

    /// File settings with command-line overrides applied
    fn compute_settings(
        &self,
        credit_mode: Option<CreditMode>,
        controller_url: Option<String>,
    ) -> compute::ComputeSettings {
        let mut settings = self.settings.compute.clone();
        if let Some(mode) = credit_mode {
            settings.credit_mode = mode;
        }
        if let Some(url) = controller_url {
            settings.swarm.controller_url = url;
        }
        settings
    }

    /// Swarm launch config plus the compute settings it needs
    fn swarm_config(
        &self,
        args: SwarmArgs,
        default_run_id: Option<String>,
    ) -> Result<(SwarmLaunchConfig, compute::ComputeSettings)> {
        let credentials_ref = args
            .credentials_ref
            .or_else(|| self.settings.launch.agent_credentials_ref.clone())
            .context("no agent credentials; pass --credentials-ref or set CI_SWARM_AGENT_CREDENTIALS")?;
        let settings = self.compute_settings(args.launch.credit_mode, args.controller_url);
        let base = self.launch_config(args.launch)?;

        let mut config = SwarmLaunchConfig::new(
            base.ami_id,
            base.key_pair,
            base.instance_type,
            base.name,
            credentials_ref,
        )
        .with_tags(base.tags)
        .with_security_groups(base.security_group_ids);
        if let Some(path) = args.agent_binary_path {
            config = config.with_agent_binary_path(path);
        }
        if let Some(run_id) = args.run_id.or(default_run_id) {
            config = config.with_run_id(run_id);
        }
        Ok((config, settings))
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling (teardown still runs)");
                cancel.cancel();
            }
        });
    }

    let scope = Scope::new(&args)?;

    match args.command {
        Command::Launch {
            launch,
            user_data_file,
        } => {
            let credit_mode = launch.credit_mode;
            let mut config = scope.launch_config(launch)?;
            if let Some(path) = user_data_file {
                let user_data = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                config = config.with_user_data(user_data);
            }
            let compute = ComputeService::new(
                scope.client(compute::SERVICE_NAME)?,
                scope.compute_settings(credit_mode, None),
                EnvCredentialResolver::new(),
            );
            println!("{}", compute.launch_instance(config).await?);
        }

        Command::LaunchSwarm(swarm) => {
            let resolver = scope.resolver(swarm.credential_source)?;
            let (config, settings) = scope.swarm_config(*swarm, None)?;
            let compute =
                ComputeService::new(scope.client(compute::SERVICE_NAME)?, settings, resolver);
            println!("{}", compute.launch_swarm_instance(config).await?);
        }

        Command::Stop { instance_ids } => scope.compute()?.stop_instances(&instance_ids).await?,

        Command::Terminate { instance_ids } => {
            scope.compute()?.terminate_instances(&instance_ids).await?
        }

        Command::Reboot { instance_ids } => scope.compute()?.reboot_instances(&instance_ids).await?,

        Command::Tag { resource_id, tags } => {
            let tags = parse_tag_pairs(&tags).map_err(anyhow::Error::msg)?;
            scope.compute()?.tag_resource(&resource_id, &tags).await?;
        }

        Command::Screenshot {
            instance_id,
            output,
        } => {
            let path = scope
                .compute()?
                .get_screenshot(&instance_id, output.as_deref())
                .await?;
            println!("{}", path.display());
        }

        Command::ConsoleOutput { instance_id } => {
            match scope.compute()?.get_console_output(&instance_id).await? {
                Some(output) => print!("{output}"),
                None => eprintln!("No console output for {instance_id} yet."),
            }
        }

        Command::Triggers { command } => handle_triggers(&scope, command, cancel).await?,

        Command::Run(run_args) => handle_run(&scope, *run_args, cancel).await?,
    }

    Ok(())
}

/// Handle the triggers subcommands
async fn handle_triggers(
    scope: &Scope,
    command: TriggerCommand,
    cancel: CancellationToken,
) -> Result<()> {
    let reconciler = TriggerReconciler::new(scope.client(triggers::SERVICE_NAME)?)
        .with_config(scope.settings.triggers.reconcile_config())
        .with_cancellation(cancel);

    match command {
        TriggerCommand::List { filter, format } => {
            let mappings = reconciler.list_mappings(&filter.into()).await?;
            if format == "json" {
                let rows: Vec<_> = mappings
                    .iter()
                    .map(|m| {
                        serde_json::json!({
                            "uuid": m.uuid,
                            "function": m.function_ref,
                            "event_source": m.event_source_arn,
                            "state": m.state.to_string(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if mappings.is_empty() {
                println!("No event-source mappings found.");
            } else {
                println!("{:<38} {:<14} {:<40}", "UUID", "STATE", "EVENT SOURCE");
                println!("{}", "-".repeat(92));
                for m in &mappings {
                    println!("{:<38} {:<14} {:<40}", m.uuid, m.state.to_string(), m.event_source_arn);
                }
            }
        }

        TriggerCommand::Set {
            filter,
            uuid,
            enable,
            disable,
        } => {
            // clap guarantees exactly one of the two
            let enabled = enable && !disable;
            let reports = match uuid {
                Some(uuid) => vec![reconciler.set_trigger_state(&uuid, enabled).await?],
                None => reconciler.set_triggers_state(&filter.into(), enabled).await?,
            };
            for report in &reports {
                println!(
                    "{} {} after {} polls ({}s)",
                    report.uuid,
                    report.state,
                    report.polls,
                    report.elapsed.as_secs()
                );
            }
        }
    }
    Ok(())
}

/// Handle the run command
async fn handle_run(scope: &Scope, args: RunArgs, cancel: CancellationToken) -> Result<()> {
    let run_id = uuid::Uuid::now_v7().to_string();
    let resolver = scope.resolver(args.swarm.credential_source)?;
    let (launch, settings) = scope.swarm_config(args.swarm, Some(run_id))?;

    if settings.swarm.controller_url.is_empty() {
        bail!("no controller URL; pass --controller-url or set CI_SWARM_CONTROLLER_URL");
    }

    let controller_ref = args
        .controller_credentials_ref
        .unwrap_or_else(|| launch.agent_credentials_ref.clone());
    let controller_credential = resolver
        .resolve_scoped_credential(&controller_ref)
        .await
        .context("failed to resolve controller API credentials")?;
    let watcher = ControllerRegistrationWatcher::new(settings.swarm.controller_url.clone())?
        .with_credential(controller_credential)
        .with_cancellation(cancel.clone());
    let target = ShellExecutionTarget::from_command(&args.command)?;

    let mut config = scope.settings.orchestrator.orchestrator_config();
    if let Some(secs) = args.registration_timeout {
        config.registration_timeout = Duration::from_secs(secs);
    }
    if let Some(mode) = args.teardown {
        config.teardown_mode = mode;
    }

    let compute = ComputeService::new(scope.client(compute::SERVICE_NAME)?, settings, resolver);
    let (teardown_tx, mut executor) = create_teardown_system(&compute);

    info!(
        agent = %launch.agent_label(),
        run_id = ?launch.run_id,
        teardown = %config.teardown_mode,
        registration_timeout_secs = config.registration_timeout.as_secs(),
        "Starting orchestrated run"
    );

    let orchestrator = EphemeralAgentOrchestrator::new(&compute, watcher, target, config)
        .with_cancellation(cancel)
        .with_teardown_channel(teardown_tx);
    let result = orchestrator.run(launch).await;
    drop(orchestrator);

    let drained = executor.drain_pending().await;
    if drained > 0 {
        warn!(drained, "Tore down instances left by an interrupted run");
    }

    let report = result?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "instance_id": report.instance_id,
            "agent_label": report.agent_label,
            "phase": report.phase.to_string(),
        }))?
    );
    Ok(())
}
