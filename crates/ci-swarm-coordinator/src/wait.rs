//! Resource waiting with exponential backoff and cancellation support.
//!
//! Used for conditions with no fixed poll cadence, such as an agent showing
//! up on the CI controller. Trigger reconciliation has its own fixed-interval
//! loop in `triggers::reconcile`.

use crate::control_plane::{Result, SwarmError};
use backon::{BackoffBuilder, ExponentialBuilder};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration for resource waiting with exponential backoff.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Initial delay between checks
    pub initial_delay: Duration,
    /// Maximum delay between checks (cap for exponential growth)
    pub max_delay: Duration,
    /// Maximum total time to wait before timeout
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(15),
            timeout: Duration::from_secs(60),
        }
    }
}

impl WaitConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Result of a single readiness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Ready,
    /// Not ready yet, with the state observed (reported on timeout)
    Pending(String),
}

/// Wait for a resource to become ready with exponential backoff.
///
/// Fails with `Timeout` (carrying the last pending state) once `timeout`
/// elapses, or with `Cancelled` as soon as `cancel` fires. An `Err` from
/// `check` aborts the wait immediately.
///
/// # Example
/// ```ignore
/// wait_for_resource(
///     WaitConfig::default(),
///     Some(&cancel_token),
///     "await_registration",
///     "agent-1",
///     || async { Ok(Probe::Pending("offline".into())) },
/// ).await?;
/// ```
pub async fn wait_for_resource<F, Fut>(
    config: WaitConfig,
    cancel: Option<&CancellationToken>,
    operation: &str,
    resource: &str,
    mut check: F,
) -> Result<u32>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe>>,
{
    let start = Instant::now();
    let mut attempts = 0u32;
    let mut last_state = "unknown".to_string();

    let mut delays = ExponentialBuilder::default()
        .with_min_delay(config.initial_delay)
        .with_max_delay(config.max_delay)
        .with_factor(2.0)
        .with_jitter()
        .build();

    let cancelled = || SwarmError::Cancelled {
        operation: operation.to_string(),
        resource: resource.to_string(),
    };

    loop {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(cancelled());
        }

        let elapsed = start.elapsed();
        if elapsed >= config.timeout {
            warn!(resource, attempts, last_state = %last_state, "Timed out waiting for resource");
            return Err(SwarmError::Timeout {
                operation: operation.to_string(),
                resource: resource.to_string(),
                elapsed,
                last_state,
            });
        }

        attempts += 1;
        match check().await? {
            Probe::Ready => {
                debug!(resource, attempts, "Resource ready");
                return Ok(attempts);
            }
            Probe::Pending(state) => {
                let remaining = config.timeout.saturating_sub(start.elapsed());
                let delay = delays.next().unwrap_or(config.max_delay).min(remaining);
                debug!(
                    resource,
                    attempt = attempts,
                    state = %state,
                    delay_ms = delay.as_millis() as u64,
                    "Resource not ready, retrying"
                );
                last_state = state;

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = async {
                        match cancel {
                            Some(token) => token.cancelled().await,
                            None => std::future::pending::<()>().await,
                        }
                    } => return Err(cancelled()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> WaitConfig {
        WaitConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_retries() {
        let calls = &AtomicU32::new(0);
        let attempts = wait_for_resource(fast(), None, "wait", "thing", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(Probe::Pending("booting".to_string()))
            } else {
                Ok(Probe::Ready)
            }
        })
        .await
        .unwrap();
        assert_eq!(attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_carries_last_state() {
        let err = wait_for_resource(fast(), None, "await_registration", "agent-1", || async {
            Ok(Probe::Pending("offline".to_string()))
        })
        .await
        .unwrap_err();
        match err {
            SwarmError::Timeout {
                resource,
                last_state,
                elapsed,
                ..
            } => {
                assert_eq!(resource, "agent-1");
                assert_eq!(last_state, "offline");
                assert!(elapsed >= Duration::from_secs(10));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let err = wait_for_resource(fast(), Some(&token), "wait", "thing", || {
            trigger.cancel();
            async { Ok(Probe::Pending("x".to_string())) }
        })
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_error_aborts() {
        let err = wait_for_resource(fast(), None, "wait", "thing", || async {
            Err(SwarmError::invalid("boom"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, SwarmError::InvalidArgument(_)));
    }
}
