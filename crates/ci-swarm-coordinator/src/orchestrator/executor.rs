//! Teardown of instances whose guard was dropped mid-orchestration

use super::guard::TeardownRequest;
use super::types::TeardownMode;
use crate::compute::ComputeOperations;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Processes teardown requests from dropped [`InstanceGuard`](super::InstanceGuard)s.
///
/// The owner either awaits [`run`](Self::run), which returns once every
/// sender is gone, or calls [`drain_pending`](Self::drain_pending) at a
/// convenient point (e.g. after an aborted run).
pub struct TeardownExecutor<C> {
    compute: C,
    rx: mpsc::UnboundedReceiver<TeardownRequest>,
}

impl<C: ComputeOperations> TeardownExecutor<C> {
    pub fn new(compute: C, rx: mpsc::UnboundedReceiver<TeardownRequest>) -> Self {
        Self { compute, rx }
    }

    /// Process requests until the channel closes
    pub async fn run(mut self) {
        while let Some(request) = self.rx.recv().await {
            self.process(request).await;
        }
        debug!("Teardown executor shutting down");
    }

    /// Process whatever is queued right now; returns the number of requests
    pub async fn drain_pending(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(request) = self.rx.try_recv() {
            self.process(request).await;
            processed += 1;
        }
        processed
    }

    async fn process(&self, request: TeardownRequest) {
        let TeardownRequest { instance_ids, mode } = request;
        let result = match mode {
            TeardownMode::Stop => self.compute.stop_instances(&instance_ids).await,
            TeardownMode::Terminate => self.compute.terminate_instances(&instance_ids).await,
        };
        match result {
            Ok(()) => info!(instance_ids = ?instance_ids, %mode, "Tore down dropped instances"),
            Err(e) => error!(
                instance_ids = ?instance_ids,
                %mode,
                error = %e,
                "Failed to tear down dropped instances; remove them manually"
            ),
        }
    }
}

/// Create a sender for guards and the executor that serves it
pub fn create_teardown_system<C: ComputeOperations>(
    compute: C,
) -> (mpsc::UnboundedSender<TeardownRequest>, TeardownExecutor<C>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, TeardownExecutor::new(compute, rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::MockComputeOperations;
    use crate::control_plane::SwarmError;

    fn request(ids: &[&str], mode: TeardownMode) -> TeardownRequest {
        TeardownRequest {
            instance_ids: ids.iter().map(|s| s.to_string()).collect(),
            mode,
        }
    }

    #[tokio::test]
    async fn test_run_processes_until_closed() {
        let mut compute = MockComputeOperations::new();
        compute
            .expect_terminate_instances()
            .withf(|ids| ids.len() == 2 && ids[0] == "i-1" && ids[1] == "i-2")
            .times(1)
            .returning(|_| Ok(()));
        compute
            .expect_stop_instances()
            .withf(|ids| ids.len() == 1 && ids[0] == "i-3")
            .times(1)
            .returning(|_| Ok(()));

        let (tx, executor) = create_teardown_system(compute);
        tx.send(request(&["i-1", "i-2"], TeardownMode::Terminate)).unwrap();
        tx.send(request(&["i-3"], TeardownMode::Stop)).unwrap();
        drop(tx);

        executor.run().await;
    }

    #[tokio::test]
    async fn test_drain_pending_survives_failures() {
        let mut compute = MockComputeOperations::new();
        compute
            .expect_terminate_instances()
            .times(2)
            .returning(|_| Err(SwarmError::invalid("nope")));

        let (tx, mut executor) = create_teardown_system(compute);
        tx.send(request(&["i-1"], TeardownMode::Terminate)).unwrap();
        tx.send(request(&["i-2"], TeardownMode::Terminate)).unwrap();

        assert_eq!(executor.drain_pending().await, 2);
        assert_eq!(executor.drain_pending().await, 0);
    }
}
