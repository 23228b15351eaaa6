//! Event-source mapping (trigger) state reconciliation
//!
//! Enabling or disabling a mapping is asynchronous on the remote side: the
//! update call returns while the mapping is still `Enabling`/`Disabling`.
//! [`TriggerReconciler::set_trigger_state`] issues the update and then polls
//! until the mapping reports the requested terminal state.

mod reconcile;
mod types;

pub use reconcile::poll_until_converged;
pub use types::{
    ReconcileConfig, ReconcilePhase, ReconcileReport, TriggerFilter, TriggerMapping, TriggerState,
};

use crate::control_plane::{CommandArgs, ControlPlaneClient, Result, SwarmError};
use ci_swarm_common::{Clock, CommandRunner, TokioClock};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use types::{ListMappingsResponse, RawMapping};

/// Service name the trigger client must be scoped to
pub const SERVICE_NAME: &str = "lambda";

/// Drives event-source mappings to a desired enabled/disabled state
pub struct TriggerReconciler<R, C = TokioClock> {
    client: ControlPlaneClient<R>,
    clock: C,
    config: ReconcileConfig,
    cancel: Option<CancellationToken>,
}

impl<R: CommandRunner> TriggerReconciler<R> {
    pub fn new(client: ControlPlaneClient<R>) -> Self {
        Self {
            client,
            clock: TokioClock,
            config: ReconcileConfig::default(),
            cancel: None,
        }
    }
}

impl<R: CommandRunner, C: Clock> TriggerReconciler<R, C> {
    /// Use a different time source (simulated time in tests)
    pub fn with_clock<C2: Clock>(self, clock: C2) -> TriggerReconciler<R, C2> {
        TriggerReconciler {
            client: self.client,
            clock,
            config: self.config,
            cancel: self.cancel,
        }
    }

    pub fn with_config(mut self, config: ReconcileConfig) -> Self {
        self.config = config;
        self
    }

    /// Abort in-flight polls when `token` fires
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn client(&self) -> &ControlPlaneClient<R> {
        &self.client
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// List mappings, narrowed by whichever filters are set.
    ///
    /// An empty filter lists every mapping visible to the context.
    pub async fn list_mappings(&self, filter: &TriggerFilter) -> Result<Vec<TriggerMapping>> {
        let args = CommandArgs::new()
            .flag_opt("--function-name", filter.function_ref())
            .flag_opt("--event-source-arn", filter.event_source_arn());

        let response: ListMappingsResponse = self
            .client
            .execute("list-event-source-mappings", args)
            .await?
            .deserialize("lambda list-event-source-mappings")?;

        Ok(response
            .event_source_mappings
            .into_iter()
            .map(TriggerMapping::from)
            .collect())
    }

    /// Fresh snapshot of one mapping
    pub async fn get_mapping(&self, uuid: &str) -> Result<TriggerMapping> {
        let raw: RawMapping = self
            .client
            .execute("get-event-source-mapping", CommandArgs::new().flag("--uuid", uuid))
            .await?
            .deserialize("lambda get-event-source-mapping")?;
        Ok(raw.into())
    }

    /// Request a state change; returns the state the update call reported,
    /// which usually lags behind.
    async fn request_state(&self, uuid: &str, enabled: bool) -> Result<TriggerState> {
        let switch = if enabled { "--enabled" } else { "--no-enabled" };
        let result = self
            .client
            .execute(
                "update-event-source-mapping",
                CommandArgs::new().flag("--uuid", uuid).switch(switch),
            )
            .await?;
        Ok(result
            .str_field("/State")
            .map(TriggerState::from_remote)
            .unwrap_or(TriggerState::Unknown))
    }

    /// Enable or disable one mapping and wait until it converges.
    ///
    /// Fails with `Timeout` (carrying the last observed state) if the mapping
    /// has not reached the requested state by the deadline.
    #[instrument(skip_all, fields(uuid = %uuid, enabled = enabled))]
    pub async fn set_trigger_state(&self, uuid: &str, enabled: bool) -> Result<ReconcileReport> {
        if uuid.trim().is_empty() {
            return Err(SwarmError::invalid("trigger uuid cannot be empty"));
        }
        let desired = TriggerState::desired(enabled);

        let reported = self.request_state(uuid, enabled).await?;
        info!(phase = %ReconcilePhase::Requested, %reported, %desired, "Trigger update requested");

        poll_until_converged(
            &self.clock,
            &self.config,
            self.cancel.as_ref(),
            uuid,
            desired,
            move || async move { self.get_mapping(uuid).await.map(|m| m.state) },
        )
        .await
    }

    /// Apply `enabled` to every mapping matching `filter`, one at a time.
    ///
    /// An empty filter is rejected before anything is listed. The first
    /// failure stops the fan-out; mappings after it are left untouched.
    #[instrument(skip_all, fields(function = ?filter.function_ref, source = ?filter.event_source_arn, enabled = enabled))]
    pub async fn set_triggers_state(
        &self,
        filter: &TriggerFilter,
        enabled: bool,
    ) -> Result<Vec<ReconcileReport>> {
        if filter.is_empty() {
            return Err(SwarmError::invalid(
                "refusing to change every trigger: give a function or an event source",
            ));
        }

        let mappings = self.list_mappings(filter).await?;
        info!(count = mappings.len(), "Reconciling matched triggers");

        let mut reports = Vec::with_capacity(mappings.len());
        for mapping in &mappings {
            reports.push(self.set_trigger_state(&mapping.uuid, enabled).await?);
        }
        Ok(reports)
    }
}
