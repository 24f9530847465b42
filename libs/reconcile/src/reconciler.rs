//! Reconciler: capacity write, waiter discovery and wake as one operation.
//!
//! The sequence is linear. A failed capacity write stops everything; a
//! failed discovery stops after the write, which is kept (there is no
//! compensating write). Wake failures are per workflow and never stop
//! the run.

use std::sync::Arc;

use semsync_store::ObjectStore;
use tracing::{error, info, instrument, warn};

use crate::capacity::{CapacityRepository, CapacitySnapshot};
use crate::error::ReconcileError;
use crate::waiters::{SemaphoreKey, WaitSet, WaiterDiscovery};
use crate::wake::{WakeReport, WakeTrigger};

/// One request to resize a semaphore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileRequest {
    pub capacity: u64,
    pub resource_name: String,
    pub record_name: String,
    pub namespace: String,
}

impl ReconcileRequest {
    pub const DEFAULT_RESOURCE_NAME: &'static str = "resource";
    pub const DEFAULT_RECORD_NAME: &'static str = "sync";
    pub const DEFAULT_NAMESPACE: &'static str = "dev";

    /// Request for the default semaphore.
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            resource_name: Self::DEFAULT_RESOURCE_NAME.to_string(),
            record_name: Self::DEFAULT_RECORD_NAME.to_string(),
            namespace: Self::DEFAULT_NAMESPACE.to_string(),
        }
    }

    pub fn with_resource_name(mut self, resource_name: impl Into<String>) -> Self {
        self.resource_name = resource_name.into();
        self
    }

    pub fn with_record_name(mut self, record_name: impl Into<String>) -> Self {
        self.record_name = record_name.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Key waiters on this semaphore carry in their status.
    pub fn semaphore_key(&self) -> SemaphoreKey {
        SemaphoreKey::config_map(&self.namespace, &self.record_name, &self.resource_name)
    }
}

/// A run that reached the wake stage.
#[derive(Debug)]
pub struct ReconciliationResult {
    pub capacity: CapacitySnapshot,
    pub semaphore_key: SemaphoreKey,
    pub wait_set: WaitSet,
    pub wake_report: WakeReport,
}

impl ReconciliationResult {
    /// Human-readable summary of the write and the pings.
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{}\nPinged workflows: {:?}",
            self.capacity, self.wake_report.succeeded
        );
        if !self.wake_report.failed.is_empty() {
            let failed: Vec<_> = self.wake_report.failed.keys().collect();
            summary.push_str(&format!("\nFailed to ping: {failed:?}"));
        }
        summary
    }
}

/// Terminal state of a reconciliation.
#[derive(Debug)]
pub enum ReconcileOutcome {
    /// Capacity written, waiters discovered, pings attempted.
    Completed(ReconciliationResult),

    /// Nothing was changed.
    CapacitySetFailed(ReconcileError),

    /// Capacity was written and stays written; nobody was pinged.
    DiscoveryFailed {
        capacity: CapacitySnapshot,
        cause: ReconcileError,
    },
}

impl ReconcileOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Snapshot of the record if the capacity write went through.
    pub fn capacity(&self) -> Option<&CapacitySnapshot> {
        match self {
            Self::Completed(result) => Some(&result.capacity),
            Self::DiscoveryFailed { capacity, .. } => Some(capacity),
            Self::CapacitySetFailed(_) => None,
        }
    }
}

/// Runs reconciliations against one object store.
#[derive(Clone)]
pub struct Reconciler {
    capacity: CapacityRepository,
    discovery: WaiterDiscovery,
    wake: WakeTrigger,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            capacity: CapacityRepository::new(store.clone()),
            discovery: WaiterDiscovery::new(store.clone()),
            wake: WakeTrigger::new(store),
        }
    }

    /// Capacity repository sharing this reconciler's store.
    pub fn capacity_repository(&self) -> &CapacityRepository {
        &self.capacity
    }

    /// Run one reconciliation.
    #[instrument(
        skip_all,
        fields(
            namespace = %request.namespace,
            record = %request.record_name,
            resource = %request.resource_name,
            capacity = request.capacity,
        )
    )]
    pub async fn reconcile(&self, request: &ReconcileRequest) -> ReconcileOutcome {
        info!("Reconciling semaphore capacity");

        let capacity = match self
            .capacity
            .set_capacity(
                &request.record_name,
                &request.resource_name,
                &request.namespace,
                request.capacity,
            )
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, "Capacity write failed");
                return ReconcileOutcome::CapacitySetFailed(e);
            }
        };

        let semaphore_key = request.semaphore_key();
        let wait_set = match self
            .discovery
            .find_waiters(&semaphore_key, &request.namespace)
            .await
        {
            Ok(wait_set) => wait_set,
            Err(e) => {
                error!(error = %e, "Waiter discovery failed after capacity was written");
                return ReconcileOutcome::DiscoveryFailed { capacity, cause: e };
            }
        };

        let wake_report = self.wake.wake(&wait_set, &request.namespace).await;

        if wake_report.is_complete() {
            info!(
                waiters = wait_set.len(),
                pinged = wake_report.succeeded.len(),
                "Reconciliation complete"
            );
        } else {
            warn!(
                waiters = wait_set.len(),
                pinged = wake_report.succeeded.len(),
                failed = wake_report.failed.len(),
                "Reconciliation complete with failed pings"
            );
        }

        ReconcileOutcome::Completed(ReconciliationResult {
            capacity,
            semaphore_key,
            wait_set,
            wake_report,
        })
    }
}
