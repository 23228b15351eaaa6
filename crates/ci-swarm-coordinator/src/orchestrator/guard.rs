//! Live instance accounting and the drop-time teardown guard

use super::types::TeardownMode;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Instances an orchestrator has launched and not yet torn down.
///
/// Cloneable so sub-work spawned during execution can record instances it
/// starts; all clones share one set.
#[derive(Debug, Clone, Default)]
pub struct LiveInstances {
    inner: Arc<Mutex<BTreeSet<String>>>,
}

impl LiveInstances {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        // The set stays consistent even if a holder panicked mid-insert
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, instance_id: impl Into<String>) {
        self.lock().insert(instance_id.into());
    }

    pub fn remove(&self, instance_id: &str) -> bool {
        self.lock().remove(instance_id)
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.lock().contains(instance_id)
    }

    /// Sorted copy of the current set
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    /// Take every recorded ID, leaving the set empty
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.lock()).into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Instances a dropped guard could not tear down itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownRequest {
    pub instance_ids: Vec<String>,
    pub mode: TeardownMode,
}

/// Scoped ownership of launched instances.
///
/// Every instance is recorded in the shared [`LiveInstances`] the moment it
/// is known. The normal path tears the instances down and then calls
/// [`release`](Self::release). If the guard is dropped first (the
/// orchestration future was dropped mid-flight), the IDs go to the
/// [`TeardownExecutor`](super::TeardownExecutor) channel instead.
pub struct InstanceGuard {
    live: LiveInstances,
    instance_ids: Vec<String>,
    mode: TeardownMode,
    teardown_tx: Option<mpsc::UnboundedSender<TeardownRequest>>,
    armed: bool,
}

impl InstanceGuard {
    pub fn new(
        live: LiveInstances,
        mode: TeardownMode,
        teardown_tx: Option<mpsc::UnboundedSender<TeardownRequest>>,
    ) -> Self {
        Self {
            live,
            instance_ids: Vec::new(),
            mode,
            teardown_tx,
            armed: true,
        }
    }

    /// Take ownership of a freshly launched instance
    pub fn record(&mut self, instance_id: impl Into<String>) {
        let instance_id = instance_id.into();
        debug!(instance_id = %instance_id, "Tracking live instance");
        self.live.record(instance_id.clone());
        self.instance_ids.push(instance_id);
    }

    pub fn instance_ids(&self) -> &[String] {
        &self.instance_ids
    }

    /// Teardown succeeded: forget the instances.
    pub fn release(mut self) {
        for id in &self.instance_ids {
            self.live.remove(id);
        }
        self.armed = false;
    }

    /// Teardown was attempted and failed: keep the instances in the live set
    /// for the caller to inspect, without queueing another teardown.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        if !self.armed || self.instance_ids.is_empty() {
            return;
        }

        let instance_ids = std::mem::take(&mut self.instance_ids);
        for id in &instance_ids {
            self.live.remove(id);
        }

        let request = TeardownRequest {
            instance_ids,
            mode: self.mode,
        };
        match &self.teardown_tx {
            Some(tx) => {
                warn!(instance_ids = ?request.instance_ids, "Guard dropped before teardown, queueing");
                if let Err(mpsc::error::SendError(request)) = tx.send(request) {
                    error!(
                        instance_ids = ?request.instance_ids,
                        "Teardown executor is gone; instances must be removed manually"
                    );
                }
            }
            None => {
                error!(
                    instance_ids = ?request.instance_ids,
                    "Guard dropped before teardown with no executor; instances must be removed manually"
                );
            }
        }
    }
}
