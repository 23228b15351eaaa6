//! End-to-end orchestration against a scripted control plane
//!
//! The compute service talks to a `ScriptedRunner` instead of the aws CLI,
//! the registration watcher polls a wiremock controller, and the workload is
//! a real `sh` process.

use base64::Engine;
use ci_swarm_common::CommandOutput;
use ci_swarm_common::tags::{TAG_RUN_ID, TAG_TOOL};
use ci_swarm_coordinator::collaborators::{
    ControllerRegistrationWatcher, EnvCredentialResolver, ShellExecutionTarget,
};
use ci_swarm_coordinator::compute::{ComputeService, ComputeSettings, SwarmLaunchConfig};
use ci_swarm_coordinator::orchestrator::{
    EphemeralAgentOrchestrator, OrchestratorConfig, Phase, TeardownMode, create_teardown_system,
};
use ci_swarm_coordinator::wait::WaitConfig;
use ci_swarm_coordinator::{ControlPlaneClient, ServiceContext, SwarmError};
use ci_swarm_test_utils::ScriptedRunner;
use ci_swarm_test_utils::fixtures::{cli_error, run_instances_output, state_change_output};
use std::collections::HashMap;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const INSTANCE_ID: &str = "i-0abc123def4567890";
const AGENT: &str = "agent-1";

type Compute = ComputeService<ScriptedRunner, EnvCredentialResolver>;

/// Control plane that launches `INSTANCE_ID` and accepts teardown
fn control_plane(terminate: fn() -> CommandOutput) -> ScriptedRunner {
    ScriptedRunner::new(move |args| {
        Ok(match args[1].as_str() {
            "run-instances" => run_instances_output(INSTANCE_ID),
            "terminate-instances" => terminate(),
            "stop-instances" => state_change_output("StoppingInstances", &[INSTANCE_ID], "stopping"),
            "get-console-output" => {
                let text = "Fetching swarm client from controller...\ncurl: (22) The requested URL returned error: 404\n";
                let encoded = base64::engine::general_purpose::STANDARD.encode(text);
                CommandOutput::success(
                    serde_json::json!({ "InstanceId": INSTANCE_ID, "Output": encoded }).to_string(),
                )
            }
            other => anyhow::bail!("unexpected command {other}"),
        })
    })
}

fn terminated() -> CommandOutput {
    state_change_output("TerminatingInstances", &[INSTANCE_ID], "shutting-down")
}

fn compute(runner: ScriptedRunner, controller_url: &str) -> Compute {
    let context = ServiceContext::new("us-east-2", "ci", "ec2").unwrap();
    let mut settings = ComputeSettings::default();
    settings.swarm.controller_url = controller_url.to_string();
    let credentials = EnvCredentialResolver::from_vars(HashMap::from([
        ("SWARM_AGENT_USERNAME".to_string(), "swarm".to_string()),
        ("SWARM_AGENT_PASSWORD".to_string(), "s3cret-pass".to_string()),
    ]));
    ComputeService::new(ControlPlaneClient::new(context, runner), settings, credentials)
}

fn watcher(server: &MockServer) -> ControllerRegistrationWatcher {
    ControllerRegistrationWatcher::new(server.uri())
        .unwrap()
        .with_wait_config(WaitConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            timeout: Duration::from_secs(1),
        })
}

fn launch() -> SwarmLaunchConfig {
    SwarmLaunchConfig::new("ami-0123456789abcdef0", "ci-key", "t3.medium", AGENT, "swarm-agent")
        .with_security_groups(["sg-1"])
        .with_run_id("run-42")
}

/// Workload that succeeds only when it sees the expected agent label
fn label_check() -> ShellExecutionTarget {
    ShellExecutionTarget::new(
        "sh",
        vec!["-c".to_string(), format!(r#"test "$CI_SWARM_AGENT_LABEL" = {AGENT}"#)],
    )
}

fn config(registration_timeout: Duration, teardown_mode: TeardownMode) -> OrchestratorConfig {
    OrchestratorConfig {
        teardown_mode,
        registration_timeout,
    }
}

async fn online_controller() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/computer/{AGENT}/api/json")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"offline": false})))
        .mount(&server)
        .await;
    server
}

async fn empty_controller() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_full_run_launches_executes_and_terminates() {
    let server = online_controller().await;
    let compute = compute(control_plane(terminated), &server.uri());
    let orchestrator = EphemeralAgentOrchestrator::new(
        &compute,
        watcher(&server),
        label_check(),
        config(Duration::from_secs(5), TeardownMode::Terminate),
    );

    let report = orchestrator.run(launch()).await.unwrap();
    assert_eq!(report.phase, Phase::Done);
    assert_eq!(report.instance_id, INSTANCE_ID);
    assert_eq!(report.agent_label, AGENT);
    assert!(orchestrator.live_instances().is_empty());

    let runner = compute.client().runner();
    let launches = runner.calls_to("run-instances");
    assert_eq!(launches.len(), 1);
    let user_data = launches[0].flag_value("--user-data").unwrap();
    assert!(user_data.contains(&server.uri()));
    assert!(user_data.contains(r#"AGENT_NAME="agent-1""#));

    let tags = launches[0].flag_json("--tag-specifications").unwrap();
    let tags = tags[0]["Tags"].as_array().unwrap();
    let value = |key: &str| {
        tags.iter()
            .find(|t| t["Key"] == key)
            .and_then(|t| t["Value"].as_str())
            .map(str::to_string)
    };
    assert_eq!(value("Name").as_deref(), Some(AGENT));
    assert_eq!(value(TAG_RUN_ID).as_deref(), Some("run-42"));
    assert_eq!(value(TAG_TOOL).as_deref(), Some("ci-swarm"));

    let teardown = runner.calls_to("terminate-instances");
    assert_eq!(teardown.len(), 1);
    assert_eq!(teardown[0].flag_values("--instance-ids"), vec![INSTANCE_ID]);
    assert!(runner.calls_to("stop-instances").is_empty());
}

#[tokio::test]
async fn test_unregistered_agent_is_diagnosed_and_stopped() {
    let server = empty_controller().await;
    let compute = compute(control_plane(terminated), &server.uri());
    let orchestrator = EphemeralAgentOrchestrator::new(
        &compute,
        watcher(&server),
        label_check(),
        config(Duration::from_millis(200), TeardownMode::Stop),
    );

    let err = orchestrator.run(launch()).await.unwrap_err();
    assert_eq!(err.phase, Phase::AwaitingRegistration);
    assert_eq!(err.instance_id.as_deref(), Some(INSTANCE_ID));
    assert!(err.source.is_timeout());
    assert!(err.teardown.is_none());
    assert!(!err.instance_leaked());

    let runner = compute.client().runner();
    assert_eq!(runner.calls_to("get-console-output").len(), 1);
    assert_eq!(runner.calls_to("stop-instances").len(), 1);
    assert!(runner.calls_to("terminate-instances").is_empty());
}

#[tokio::test]
async fn test_failed_workload_still_tears_down() {
    let server = online_controller().await;
    let compute = compute(control_plane(terminated), &server.uri());
    let orchestrator = EphemeralAgentOrchestrator::new(
        &compute,
        watcher(&server),
        ShellExecutionTarget::new("sh", vec!["-c".to_string(), "exit 3".to_string()]),
        config(Duration::from_secs(5), TeardownMode::Terminate),
    );

    let err = orchestrator.run(launch()).await.unwrap_err();
    assert_eq!(err.phase, Phase::Executing);
    assert!(matches!(err.source, SwarmError::Workload(_)));
    assert_eq!(
        compute
            .client()
            .runner()
            .calls_to("terminate-instances")
            .len(),
        1
    );
}

#[tokio::test]
async fn test_teardown_failure_is_reported_alongside_primary_error() {
    fn denied() -> CommandOutput {
        cli_error("UnauthorizedOperation", "TerminateInstances", "You are not authorized")
    }

    let server = empty_controller().await;
    let compute = compute(control_plane(denied), &server.uri());
    let orchestrator = EphemeralAgentOrchestrator::new(
        &compute,
        watcher(&server),
        label_check(),
        config(Duration::from_millis(200), TeardownMode::Terminate),
    );

    let err = orchestrator.run(launch()).await.unwrap_err();
    assert_eq!(err.phase, Phase::AwaitingRegistration);
    assert!(err.source.is_timeout());
    assert!(err.teardown.is_some());
    assert!(err.instance_leaked());
    assert!(orchestrator.live_instances().contains(INSTANCE_ID));
}

#[tokio::test]
async fn test_abandoned_run_is_torn_down_by_executor() {
    let server = empty_controller().await;
    let compute = compute(control_plane(terminated), &server.uri());
    let (tx, mut executor) = create_teardown_system(&compute);

    let orchestrator = EphemeralAgentOrchestrator::new(
        &compute,
        watcher(&server),
        label_check(),
        config(Duration::from_secs(60), TeardownMode::Terminate),
    )
    .with_teardown_channel(tx);

    let abandoned = tokio::time::timeout(Duration::from_millis(150), orchestrator.run(launch())).await;
    assert!(abandoned.is_err(), "run should still be waiting for registration");
    assert!(orchestrator.live_instances().is_empty());

    assert_eq!(executor.drain_pending().await, 1);
    let teardown = compute.client().runner().calls_to("terminate-instances");
    assert_eq!(teardown.len(), 1);
    assert_eq!(teardown[0].flag_values("--instance-ids"), vec![INSTANCE_ID]);
}

#[tokio::test]
async fn test_missing_agent_credentials_fail_before_launch() {
    let server = online_controller().await;
    let compute = compute(control_plane(terminated), &server.uri());
    let orchestrator = EphemeralAgentOrchestrator::new(
        &compute,
        watcher(&server),
        label_check(),
        OrchestratorConfig::default(),
    );

    let launch = SwarmLaunchConfig::new("ami-1", "ci-key", "t3.medium", AGENT, "other-agent")
        .with_security_groups(["sg-1"]);
    let err = orchestrator.run(launch).await.unwrap_err();
    assert_eq!(err.phase, Phase::Launching);
    assert!(err.instance_id.is_none());
    assert!(matches!(err.source, SwarmError::InvalidArgument(_)));
    assert_eq!(compute.client().runner().call_count(), 0);
}
