//! Bounded fixed-interval poll until a mapping reaches the desired state

use super::types::{ReconcileConfig, ReconcilePhase, ReconcileReport, TriggerState};
use crate::control_plane::{Result, SwarmError};
use ci_swarm_common::Clock;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const OPERATION: &str = "set_trigger_state";

/// Poll `poll` every `config.interval` until it reports `desired`.
///
/// The first poll happens one interval after the update request, since the
/// update's own reported state lags. A poll at or past the deadline that
/// still disagrees ends the loop with `Timeout` carrying that state.
pub async fn poll_until_converged<C, F, Fut>(
    clock: &C,
    config: &ReconcileConfig,
    cancel: Option<&CancellationToken>,
    uuid: &str,
    desired: TriggerState,
    mut poll: F,
) -> Result<ReconcileReport>
where
    C: Clock,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<TriggerState>>,
{
    if config.interval.is_zero() {
        return Err(SwarmError::invalid("trigger poll interval must be positive"));
    }

    let start = clock.now();
    let mut polls = 0u32;
    debug!(uuid, phase = %ReconcilePhase::Polling, %desired, "Waiting for trigger state");

    loop {
        match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        return Err(SwarmError::Cancelled {
                            operation: OPERATION.to_string(),
                            resource: uuid.to_string(),
                        });
                    }
                    _ = clock.sleep(config.interval) => {}
                }
            }
            None => clock.sleep(config.interval).await,
        }

        let state = poll().await?;
        polls += 1;
        let elapsed = clock.now().saturating_duration_since(start);

        if state == desired {
            info!(uuid, phase = %ReconcilePhase::Converged, %state, polls, elapsed_secs = elapsed.as_secs(), "Trigger converged");
            return Ok(ReconcileReport {
                uuid: uuid.to_string(),
                polls,
                elapsed,
                state,
            });
        }

        if elapsed >= config.deadline {
            warn!(uuid, phase = %ReconcilePhase::TimedOut, %state, %desired, polls, "Trigger did not converge");
            return Err(SwarmError::Timeout {
                operation: OPERATION.to_string(),
                resource: uuid.to_string(),
                elapsed,
                last_state: state.to_string(),
            });
        }

        debug!(uuid, %state, polls, elapsed_secs = elapsed.as_secs(), "Trigger not converged yet");
    }
}
