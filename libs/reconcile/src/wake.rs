//! Wake trigger.
//!
//! The workflow engine re-evaluates a workflow whenever the object
//! changes. Writing a fresh token into a label is the cheapest change
//! that carries no meaning of its own.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use semsync_store::{ObjectStore, PatchType, ResourceKind};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{ReconcileError, ReconcileResult};
use crate::waiters::WaitSet;

/// Label written on every woken workflow.
pub const PING_LABEL: &str = "usesSync";

/// Unique value written into [`PING_LABEL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PingToken(Uuid);

impl PingToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Merge patch that sets the ping label to this token.
    pub fn patch_body(&self) -> Value {
        json!({ "metadata": { "labels": { PING_LABEL: self.0.to_string() } } })
    }
}

impl Default for PingToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-workflow outcome of a wake pass.
#[derive(Debug)]
pub struct WakeReport {
    pub token: PingToken,
    pub attempted: usize,
    /// Woken workflows, in wait set order.
    pub succeeded: Vec<String>,
    pub failed: BTreeMap<String, ReconcileError>,
}

impl WakeReport {
    fn empty(token: PingToken) -> Self {
        Self {
            token,
            attempted: 0,
            succeeded: Vec::new(),
            failed: BTreeMap::new(),
        }
    }

    /// True when every attempted ping landed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Pings waiting workflows.
#[derive(Clone)]
pub struct WakeTrigger {
    store: Arc<dyn ObjectStore>,
}

impl WakeTrigger {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Ping every workflow in `wait_set` with a fresh token.
    pub async fn wake(&self, wait_set: &WaitSet, namespace: &str) -> WakeReport {
        self.wake_with_token(wait_set, namespace, PingToken::new())
            .await
    }

    /// Ping every workflow in `wait_set` with `token`.
    ///
    /// Each patch is independent: a failure is recorded and the next
    /// workflow is still attempted.
    #[instrument(skip_all, fields(namespace = %namespace, token = %token, waiters = wait_set.len()))]
    pub async fn wake_with_token(
        &self,
        wait_set: &WaitSet,
        namespace: &str,
        token: PingToken,
    ) -> WakeReport {
        let mut report = WakeReport::empty(token);
        if wait_set.is_empty() {
            return report;
        }

        let body = token.patch_body();
        for name in wait_set.iter() {
            report.attempted += 1;
            match self.ping(name, namespace, &body).await {
                Ok(()) => {
                    info!(workflow = %name, "Patched workflow");
                    report.succeeded.push(name.clone());
                }
                Err(e) => {
                    warn!(workflow = %name, error = %e, "Could not patch workflow");
                    report.failed.insert(name.clone(), e);
                }
            }
        }

        report
    }

    async fn ping(&self, name: &str, namespace: &str, body: &Value) -> ReconcileResult<()> {
        self.store
            .patch(
                &ResourceKind::WORKFLOW,
                namespace,
                name,
                body,
                PatchType::Merge,
            )
            .await
            .map(|_| ())
            .map_err(|e| ReconcileError::from_workflow_op(e, namespace, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semsync_testing::{Fault, MemoryStore};

    fn wait_set(names: &[&str]) -> WaitSet {
        WaitSet::from(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn test_patch_body_shape() {
        let token = PingToken::new();
        assert_eq!(
            token.patch_body(),
            json!({ "metadata": { "labels": { "usesSync": token.to_string() } } })
        );
    }

    #[test]
    fn test_tokens_are_unique() {
        assert_ne!(PingToken::new(), PingToken::new());
    }

    #[tokio::test]
    async fn test_wake_empty_set_makes_no_calls() {
        let store = Arc::new(MemoryStore::new());

        let report = WakeTrigger::new(store.clone())
            .wake(&WaitSet::default(), "dev")
            .await;

        assert_eq!(report.attempted, 0);
        assert!(report.succeeded.is_empty());
        assert!(report.failed.is_empty());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_wake_sets_label_with_merge_patch() {
        let store = Arc::new(MemoryStore::new());
        store.insert_workflow("dev", "wf-a", &["dev/ConfigMap/sync/r"]);
        let token = PingToken::new();

        let report = WakeTrigger::new(store.clone())
            .wake_with_token(&wait_set(&["wf-a"]), "dev", token)
            .await;

        assert_eq!(report.succeeded, vec!["wf-a"]);
        let workflow = store.object(&ResourceKind::WORKFLOW, "dev", "wf-a").unwrap();
        assert_eq!(
            workflow["metadata"]["labels"][PING_LABEL],
            token.to_string()
        );
    }

    #[tokio::test]
    async fn test_wake_isolates_failures() {
        let store = Arc::new(MemoryStore::new());
        for name in ["wf-a", "wf-b", "wf-c"] {
            store.insert_workflow("dev", name, &["dev/ConfigMap/sync/r"]);
        }
        store.fail_patch(&ResourceKind::WORKFLOW, "wf-b", Fault::Api(500));

        let report = WakeTrigger::new(store.clone())
            .wake(&wait_set(&["wf-a", "wf-b", "wf-c"]), "dev")
            .await;

        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, vec!["wf-a", "wf-c"]);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(
            report.failed.get("wf-b"),
            Some(ReconcileError::StoreUnavailable(_))
        ));
        assert_eq!(
            store.patched_names(&ResourceKind::WORKFLOW),
            vec!["wf-a", "wf-b", "wf-c"]
        );
    }

    #[tokio::test]
    async fn test_wake_reports_vanished_workflow() {
        let store = Arc::new(MemoryStore::new());
        store.insert_workflow("dev", "wf-a", &["dev/ConfigMap/sync/r"]);

        let report = WakeTrigger::new(store)
            .wake(&wait_set(&["wf-gone", "wf-a"]), "dev")
            .await;

        assert_eq!(report.succeeded, vec!["wf-a"]);
        assert!(matches!(
            report.failed.get("wf-gone"),
            Some(ReconcileError::WorkflowNotFound { .. })
        ));
        assert!(!report.is_complete());
    }
}
