//! Ephemeral agent orchestration
//!
//! One run provisions a swarm agent, waits for it to register with the CI
//! controller, runs the workload against it and tears it down:
//!
//! ```text
//! Idle -> Launching -> AwaitingRegistration -> Executing -> TearingDown -> Done
//!            |                  |                  |             |
//!            +------------------+------------------+-------------+--> Failed
//! ```
//!
//! Teardown is unconditional once launch succeeded: registration failure,
//! workload failure and cancellation all still pass through `TearingDown`.
//! If the run future itself is dropped, the [`InstanceGuard`] hands the
//! instance to a [`TeardownExecutor`].

mod executor;
mod guard;
mod types;

pub use executor::{TeardownExecutor, create_teardown_system};
pub use guard::{InstanceGuard, LiveInstances, TeardownRequest};
pub use types::{OrchestrationError, OrchestratorConfig, Phase, RunReport, TeardownMode};

use crate::collaborators::{ExecutionTarget, RegistrationWatcher};
use crate::compute::{ComputeOperations, SwarmLaunchConfig, detect_bootstrap_failure};
use crate::control_plane::{Result, SwarmError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Runs the provision, await, execute, teardown cycle for one agent at a time
pub struct EphemeralAgentOrchestrator<C, W, X> {
    compute: C,
    watcher: W,
    target: X,
    config: OrchestratorConfig,
    live: LiveInstances,
    cancel: CancellationToken,
    teardown_tx: Option<mpsc::UnboundedSender<TeardownRequest>>,
}

impl<C, W, X> EphemeralAgentOrchestrator<C, W, X>
where
    C: ComputeOperations,
    W: RegistrationWatcher,
    X: ExecutionTarget,
{
    pub fn new(compute: C, watcher: W, target: X, config: OrchestratorConfig) -> Self {
        Self {
            compute,
            watcher,
            target,
            config,
            live: LiveInstances::new(),
            cancel: CancellationToken::new(),
            teardown_tx: None,
        }
    }

    /// Abort the registration wait or the workload when `token` fires.
    /// Teardown still runs.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Where guards send instances when a run is dropped before teardown
    pub fn with_teardown_channel(mut self, tx: mpsc::UnboundedSender<TeardownRequest>) -> Self {
        self.teardown_tx = Some(tx);
        self
    }

    /// Instances launched and not yet torn down
    pub fn live_instances(&self) -> &LiveInstances {
        &self.live
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run one agent through its full lifecycle.
    ///
    /// On failure the error names the phase that failed. A teardown failure
    /// after an earlier failure is attached as `teardown` and does not
    /// replace the original error.
    #[instrument(skip_all, fields(agent = %launch.agent_label()))]
    pub async fn run(
        &self,
        launch: SwarmLaunchConfig,
    ) -> std::result::Result<RunReport, OrchestrationError> {
        let agent_label = launch.agent_label().to_string();

        if self.cancel.is_cancelled() {
            return Err(OrchestrationError {
                phase: Phase::Idle,
                instance_id: None,
                source: SwarmError::Cancelled {
                    operation: "run".to_string(),
                    resource: agent_label,
                },
                teardown: None,
            });
        }

        info!(phase = %Phase::Launching, "Launching agent");
        let instance_id = match self.compute.launch_swarm_instance(launch).await {
            Ok(id) => id,
            Err(source) => {
                error!(phase = %Phase::Failed, error = %source, "Launch failed, nothing to tear down");
                return Err(OrchestrationError {
                    phase: Phase::Launching,
                    instance_id: None,
                    source,
                    teardown: None,
                });
            }
        };

        let mut guard = InstanceGuard::new(
            self.live.clone(),
            self.config.teardown_mode,
            self.teardown_tx.clone(),
        );
        guard.record(instance_id.clone());

        let outcome = self.register_and_execute(&instance_id, &agent_label).await;
        if let Err((phase, e)) = &outcome {
            error!(phase = %Phase::Failed, failed_in = %phase, instance_id = %instance_id, error = %e, "Run failed, tearing down");
        }

        info!(phase = %Phase::TearingDown, instance_id = %instance_id, mode = %self.config.teardown_mode, "Tearing down agent");
        let teardown = self.teardown(guard.instance_ids()).await;
        match &teardown {
            Ok(()) => guard.release(),
            Err(e) => {
                error!(instance_id = %instance_id, error = %e, "Teardown failed; instance may still be running");
                guard.disarm();
            }
        }

        match (outcome, teardown) {
            (Ok(()), Ok(())) => {
                info!(phase = %Phase::Done, instance_id = %instance_id, "Run complete");
                Ok(RunReport {
                    instance_id,
                    agent_label,
                    phase: Phase::Done,
                })
            }
            (Ok(()), Err(source)) => Err(OrchestrationError {
                phase: Phase::TearingDown,
                instance_id: Some(instance_id),
                source,
                teardown: None,
            }),
            (Err((phase, source)), teardown) => Err(OrchestrationError {
                phase,
                instance_id: Some(instance_id),
                source,
                teardown: teardown.err(),
            }),
        }
    }

    async fn register_and_execute(
        &self,
        instance_id: &str,
        agent_label: &str,
    ) -> std::result::Result<(), (Phase, SwarmError)> {
        info!(
            phase = %Phase::AwaitingRegistration,
            instance_id,
            timeout_secs = self.config.registration_timeout.as_secs(),
            "Waiting for agent to register"
        );
        let registered = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SwarmError::Cancelled {
                operation: "await_registration".to_string(),
                resource: agent_label.to_string(),
            }),
            result = self.watcher.await_registration(agent_label, self.config.registration_timeout) => result,
        };
        if let Err(e) = registered {
            if !e.is_cancelled() {
                self.diagnose(instance_id).await;
            }
            return Err((Phase::AwaitingRegistration, e));
        }

        info!(phase = %Phase::Executing, instance_id, "Agent registered, running workload");
        let executed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SwarmError::Cancelled {
                operation: "bind_and_run".to_string(),
                resource: agent_label.to_string(),
            }),
            result = self.target.bind_and_run(agent_label) => result.map_err(SwarmError::Workload),
        };
        executed.map_err(|e| (Phase::Executing, e))
    }

    /// Look for a known bootstrap failure in the console output.
    async fn diagnose(&self, instance_id: &str) {
        match self.compute.get_console_output(instance_id).await {
            Ok(Some(output)) => match detect_bootstrap_failure(&output) {
                Some(pattern) => warn!(instance_id, pattern = %pattern, "Bootstrap failure detected in console output"),
                None => debug!(instance_id, "No known bootstrap failure in console output"),
            },
            Ok(None) => debug!(instance_id, "No console output available"),
            Err(e) => debug!(instance_id, error = %e, "Could not fetch console output"),
        }
    }

    async fn teardown(&self, instance_ids: &[String]) -> Result<()> {
        match self.config.teardown_mode {
            TeardownMode::Stop => self.compute.stop_instances(instance_ids).await,
            TeardownMode::Terminate => self.compute.terminate_instances(instance_ids).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{MockExecutionTarget, MockRegistrationWatcher};
    use crate::compute::MockComputeOperations;
    use std::time::Duration;

    fn launch() -> SwarmLaunchConfig {
        SwarmLaunchConfig::new("ami-1", "kp", "t3.medium", "agent-9", "ci-agent")
            .with_security_groups(["sg-1"])
    }

    fn registration_timeout() -> SwarmError {
        SwarmError::Timeout {
            operation: "await_registration".to_string(),
            resource: "agent-9".to_string(),
            elapsed: Duration::from_secs(600),
            last_state: "not registered".to_string(),
        }
    }

    fn launched(compute: &mut MockComputeOperations) {
        compute
            .expect_launch_swarm_instance()
            .times(1)
            .returning(|_| Ok("i-9".to_string()));
    }

    fn is_i9(ids: &[String]) -> bool {
        ids.len() == 1 && ids[0] == "i-9"
    }

    /// Watcher that never returns
    struct StuckWatcher;

    impl RegistrationWatcher for StuckWatcher {
        async fn await_registration(&self, _: &str, _: Duration) -> Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_success_reaches_done() {
        let mut compute = MockComputeOperations::new();
        launched(&mut compute);
        compute
            .expect_terminate_instances()
            .withf(|ids| is_i9(ids))
            .times(1)
            .returning(|_| Ok(()));

        let mut watcher = MockRegistrationWatcher::new();
        watcher
            .expect_await_registration()
            .withf(|label, timeout| label == "agent-9" && *timeout == Duration::from_secs(600))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut target = MockExecutionTarget::new();
        target
            .expect_bind_and_run()
            .withf(|label| label == "agent-9")
            .times(1)
            .returning(|_| Ok(()));

        let orchestrator =
            EphemeralAgentOrchestrator::new(compute, watcher, target, OrchestratorConfig::default());
        let report = orchestrator.run(launch()).await.unwrap();

        assert_eq!(report.instance_id, "i-9");
        assert_eq!(report.agent_label, "agent-9");
        assert_eq!(report.phase, Phase::Done);
        assert!(orchestrator.live_instances().is_empty());
    }

    #[tokio::test]
    async fn test_registration_timeout_still_tears_down_and_wins() {
        let mut compute = MockComputeOperations::new();
        launched(&mut compute);
        compute
            .expect_get_console_output()
            .returning(|_| Ok(Some("[FAILED] Failed to start cloud-final.service".to_string())));
        compute
            .expect_terminate_instances()
            .withf(|ids| is_i9(ids))
            .times(1)
            .returning(|_| {
                Err(SwarmError::Unavailable {
                    operation: "ec2 terminate-instances".to_string(),
                    code: Some("RequestLimitExceeded".to_string()),
                    message: "Request limit exceeded.".to_string(),
                })
            });

        let mut watcher = MockRegistrationWatcher::new();
        watcher
            .expect_await_registration()
            .times(1)
            .returning(|_, _| Err(registration_timeout()));

        let mut target = MockExecutionTarget::new();
        target.expect_bind_and_run().never();

        let orchestrator =
            EphemeralAgentOrchestrator::new(compute, watcher, target, OrchestratorConfig::default());
        let err = orchestrator.run(launch()).await.unwrap_err();

        assert_eq!(err.phase, Phase::AwaitingRegistration);
        assert_eq!(err.instance_id.as_deref(), Some("i-9"));
        assert!(err.source.is_timeout());
        assert_eq!(
            err.teardown.as_ref().and_then(|e| e.code()),
            Some("RequestLimitExceeded")
        );
        assert!(err.instance_leaked());
        // Failed teardown leaves the instance visible
        assert_eq!(orchestrator.live_instances().snapshot(), vec!["i-9"]);
    }

    #[tokio::test]
    async fn test_launch_failure_skips_teardown() {
        let mut compute = MockComputeOperations::new();
        compute
            .expect_launch_swarm_instance()
            .times(1)
            .returning(|_| Err(SwarmError::invalid("agent name contains whitespace")));
        compute.expect_terminate_instances().never();
        compute.expect_stop_instances().never();

        let mut watcher = MockRegistrationWatcher::new();
        watcher.expect_await_registration().never();
        let mut target = MockExecutionTarget::new();
        target.expect_bind_and_run().never();

        let orchestrator =
            EphemeralAgentOrchestrator::new(compute, watcher, target, OrchestratorConfig::default());
        let err = orchestrator.run(launch()).await.unwrap_err();

        assert_eq!(err.phase, Phase::Launching);
        assert!(err.instance_id.is_none());
        assert!(err.teardown.is_none());
        assert!(orchestrator.live_instances().is_empty());
    }

    #[tokio::test]
    async fn test_workload_failure_tears_down() {
        let mut compute = MockComputeOperations::new();
        launched(&mut compute);
        compute
            .expect_terminate_instances()
            .withf(|ids| is_i9(ids))
            .times(1)
            .returning(|_| Ok(()));

        let mut watcher = MockRegistrationWatcher::new();
        watcher.expect_await_registration().returning(|_, _| Ok(()));
        let mut target = MockExecutionTarget::new();
        target
            .expect_bind_and_run()
            .returning(|_| Err(anyhow::anyhow!("job exited with 2")));

        let orchestrator =
            EphemeralAgentOrchestrator::new(compute, watcher, target, OrchestratorConfig::default());
        let err = orchestrator.run(launch()).await.unwrap_err();

        assert_eq!(err.phase, Phase::Executing);
        assert!(matches!(err.source, SwarmError::Workload(_)));
        assert!(err.teardown.is_none());
        assert!(!err.instance_leaked());
    }

    #[tokio::test]
    async fn test_teardown_failure_after_success_is_reported() {
        let mut compute = MockComputeOperations::new();
        launched(&mut compute);
        compute
            .expect_terminate_instances()
            .returning(|_| Err(SwarmError::invalid("boom")));

        let mut watcher = MockRegistrationWatcher::new();
        watcher.expect_await_registration().returning(|_, _| Ok(()));
        let mut target = MockExecutionTarget::new();
        target.expect_bind_and_run().returning(|_| Ok(()));

        let orchestrator =
            EphemeralAgentOrchestrator::new(compute, watcher, target, OrchestratorConfig::default());
        let err = orchestrator.run(launch()).await.unwrap_err();

        assert_eq!(err.phase, Phase::TearingDown);
        assert!(err.teardown.is_none());
    }

    #[tokio::test]
    async fn test_stop_mode_stops_instead_of_terminating() {
        let mut compute = MockComputeOperations::new();
        launched(&mut compute);
        compute
            .expect_stop_instances()
            .withf(|ids| is_i9(ids))
            .times(1)
            .returning(|_| Ok(()));
        compute.expect_terminate_instances().never();

        let mut watcher = MockRegistrationWatcher::new();
        watcher.expect_await_registration().returning(|_, _| Ok(()));
        let mut target = MockExecutionTarget::new();
        target.expect_bind_and_run().returning(|_| Ok(()));

        let config = OrchestratorConfig {
            teardown_mode: TeardownMode::Stop,
            ..Default::default()
        };
        let orchestrator = EphemeralAgentOrchestrator::new(compute, watcher, target, config);
        orchestrator.run(launch()).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_during_registration_tears_down() {
        let token = CancellationToken::new();

        let mut compute = MockComputeOperations::new();
        let cancel_on_launch = token.clone();
        compute
            .expect_launch_swarm_instance()
            .times(1)
            .returning(move |_| {
                cancel_on_launch.cancel();
                Ok("i-9".to_string())
            });
        compute.expect_get_console_output().never();
        compute
            .expect_terminate_instances()
            .withf(|ids| is_i9(ids))
            .times(1)
            .returning(|_| Ok(()));

        let mut target = MockExecutionTarget::new();
        target.expect_bind_and_run().never();

        let orchestrator = EphemeralAgentOrchestrator::new(
            compute,
            StuckWatcher,
            target,
            OrchestratorConfig::default(),
        )
        .with_cancellation(token);
        let err = orchestrator.run(launch()).await.unwrap_err();

        assert_eq!(err.phase, Phase::AwaitingRegistration);
        assert!(err.source.is_cancelled());
        assert!(orchestrator.live_instances().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_launch_does_nothing() {
        let token = CancellationToken::new();
        token.cancel();

        let mut compute = MockComputeOperations::new();
        compute.expect_launch_swarm_instance().never();

        let orchestrator = EphemeralAgentOrchestrator::new(
            compute,
            MockRegistrationWatcher::new(),
            MockExecutionTarget::new(),
            OrchestratorConfig::default(),
        )
        .with_cancellation(token);
        let err = orchestrator.run(launch()).await.unwrap_err();

        assert_eq!(err.phase, Phase::Idle);
        assert!(err.source.is_cancelled());
    }

    #[tokio::test]
    async fn test_dropped_run_queues_teardown() {
        let mut compute = MockComputeOperations::new();
        launched(&mut compute);
        compute.expect_terminate_instances().never();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let orchestrator = EphemeralAgentOrchestrator::new(
            compute,
            StuckWatcher,
            MockExecutionTarget::new(),
            OrchestratorConfig::default(),
        )
        .with_teardown_channel(tx);

        let result = tokio::time::timeout(Duration::from_millis(20), orchestrator.run(launch())).await;
        assert!(result.is_err());

        let request = rx.try_recv().unwrap();
        assert_eq!(request.instance_ids, vec!["i-9"]);
        assert_eq!(request.mode, TeardownMode::Terminate);
        assert!(orchestrator.live_instances().is_empty());
    }
}
