//! Waiter discovery.
//!
//! The workflow engine records the semaphores a workflow is blocked on
//! under `status.synchronization.semaphore.waiting`, each entry naming a
//! semaphore key. The engine exposes no server-side filter on that
//! field, so discovery lists the whole namespace and filters here.

use std::fmt;
use std::sync::Arc;

use semsync_store::{ObjectStore, ResourceKind};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::error::{ReconcileError, ReconcileResult};

const WAITING_PATH: [&str; 4] = ["status", "synchronization", "semaphore", "waiting"];

/// Key a blocked workflow uses to name the semaphore it waits on.
///
/// Compared as an opaque string; it must match the engine's format
/// byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SemaphoreKey(String);

impl SemaphoreKey {
    /// Key of a ConfigMap-backed semaphore: `{namespace}/ConfigMap/{record}/{resource}`.
    pub fn config_map(namespace: &str, record_name: &str, resource_name: &str) -> Self {
        Self(format!(
            "{namespace}/{}/{record_name}/{resource_name}",
            ResourceKind::CONFIG_MAP.kind
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SemaphoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Names of workflows found waiting on a semaphore, in list order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct WaitSet(Vec<String>);

impl WaitSet {
    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }
}

impl From<Vec<String>> for WaitSet {
    fn from(names: Vec<String>) -> Self {
        Self(names)
    }
}

impl<'a> IntoIterator for &'a WaitSet {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// How a single workflow relates to the semaphore being reconciled.
#[derive(Debug, PartialEq, Eq)]
enum WaitState {
    Waiting,
    NotWaiting,
    /// The status is present but not shaped as expected.
    Malformed(String),
}

fn wait_state(workflow: &Value, key: &SemaphoreKey) -> WaitState {
    let mut node = workflow;
    for segment in WAITING_PATH {
        let Value::Object(map) = node else {
            return WaitState::Malformed(format!("parent of `{segment}` is not an object"));
        };
        match map.get(segment) {
            None | Some(Value::Null) => return WaitState::NotWaiting,
            Some(next) => node = next,
        }
    }

    let Value::Array(entries) = node else {
        return WaitState::Malformed("`waiting` is not a list".to_string());
    };

    let mut unnamed_entry = false;
    for entry in entries {
        match entry.get("semaphore").and_then(Value::as_str) {
            Some(semaphore) if semaphore == key.as_str() => return WaitState::Waiting,
            Some(_) => {}
            None => unnamed_entry = true,
        }
    }

    if unnamed_entry {
        WaitState::Malformed("`waiting` entry without a semaphore".to_string())
    } else {
        WaitState::NotWaiting
    }
}

/// Finds workflows blocked on a semaphore.
#[derive(Clone)]
pub struct WaiterDiscovery {
    store: Arc<dyn ObjectStore>,
}

impl WaiterDiscovery {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Scan the namespace and return every workflow waiting on `key`.
    ///
    /// Workflows without a waiting list are skipped silently; a list
    /// failure aborts the scan with no partial result.
    #[instrument(skip_all, fields(namespace = %namespace, semaphore = %key))]
    pub async fn find_waiters(
        &self,
        key: &SemaphoreKey,
        namespace: &str,
    ) -> ReconcileResult<WaitSet> {
        let workflows = self
            .store
            .list(&ResourceKind::WORKFLOW, namespace)
            .await
            .map_err(|e| {
                warn!(error = %e, "Could not list workflows");
                ReconcileError::from_store(e)
            })?;
        info!(count = workflows.len(), "Workflows found");

        let mut waiters = Vec::new();
        for workflow in &workflows {
            let Some(name) = workflow.pointer("/metadata/name").and_then(Value::as_str) else {
                warn!("Skipping workflow without metadata.name");
                continue;
            };

            match wait_state(workflow, key) {
                WaitState::Waiting => {
                    info!(workflow = %name, "Workflow is waiting for semaphore");
                    waiters.push(name.to_string());
                }
                WaitState::NotWaiting => {
                    debug!(workflow = %name, "Workflow is not waiting for semaphore");
                }
                WaitState::Malformed(problem) => {
                    warn!(workflow = %name, problem = %problem, "Workflow has a malformed synchronization status");
                }
            }
        }

        Ok(WaitSet(waiters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use semsync_testing::{Fault, MemoryStore};
    use serde_json::json;

    fn key() -> SemaphoreKey {
        SemaphoreKey::config_map("dev", "sync", "widgets")
    }

    #[test]
    fn test_semaphore_key_format() {
        assert_eq!(key().as_str(), "dev/ConfigMap/sync/widgets");
    }

    #[rstest]
    #[case::no_status(json!({ "metadata": { "name": "wf" } }))]
    #[case::no_synchronization(json!({ "status": { "phase": "Running" } }))]
    #[case::null_semaphore(json!({ "status": { "synchronization": { "semaphore": null } } }))]
    #[case::mutex_only(json!({ "status": { "synchronization": { "mutex": { "waiting": [] } } } }))]
    #[case::empty_waiting(json!({ "status": { "synchronization": { "semaphore": { "waiting": [] } } } }))]
    #[case::other_key(json!({ "status": { "synchronization": { "semaphore": {
        "waiting": [{ "semaphore": "dev/ConfigMap/sync/gpus" }]
    } } } }))]
    fn test_not_waiting(#[case] workflow: Value) {
        assert_eq!(wait_state(&workflow, &key()), WaitState::NotWaiting);
    }

    #[rstest]
    #[case::status_string(json!({ "status": "broken" }))]
    #[case::waiting_object(json!({ "status": { "synchronization": { "semaphore": { "waiting": {} } } } }))]
    #[case::entry_without_key(json!({ "status": { "synchronization": { "semaphore": {
        "waiting": [{ "holders": [] }]
    } } } }))]
    fn test_malformed(#[case] workflow: Value) {
        assert!(matches!(wait_state(&workflow, &key()), WaitState::Malformed(_)));
    }

    #[test]
    fn test_match_is_exact() {
        let upper = json!({ "status": { "synchronization": { "semaphore": {
            "waiting": [{ "semaphore": "dev/configmap/sync/widgets" }]
        } } } });
        assert_eq!(wait_state(&upper, &key()), WaitState::NotWaiting);
    }

    #[test]
    fn test_matching_entry_wins_over_unnamed_entry() {
        let workflow = json!({ "status": { "synchronization": { "semaphore": {
            "waiting": [{ "holders": [] }, { "semaphore": "dev/ConfigMap/sync/widgets" }]
        } } } });
        assert_eq!(wait_state(&workflow, &key()), WaitState::Waiting);
    }

    #[tokio::test]
    async fn test_find_waiters_filters_by_key() {
        let store = Arc::new(MemoryStore::new());
        store.insert_workflow("dev", "wf-a", &["dev/ConfigMap/sync/widgets"]);
        store.insert_workflow("dev", "wf-b", &["dev/ConfigMap/sync/gpus"]);

        let waiters = WaiterDiscovery::new(store)
            .find_waiters(&key(), "dev")
            .await
            .unwrap();

        assert_eq!(waiters.names(), ["wf-a".to_string()]);
    }

    #[tokio::test]
    async fn test_find_waiters_lists_once_when_multiple_entries_match() {
        let store = Arc::new(MemoryStore::new());
        store.insert_workflow(
            "dev",
            "wf-a",
            &["dev/ConfigMap/sync/widgets", "dev/ConfigMap/sync/widgets"],
        );

        let waiters = WaiterDiscovery::new(store)
            .find_waiters(&key(), "dev")
            .await
            .unwrap();

        assert_eq!(waiters.len(), 1);
    }

    #[tokio::test]
    async fn test_find_waiters_preserves_list_order() {
        let store = Arc::new(MemoryStore::new());
        for name in ["wf-c", "wf-a", "wf-b"] {
            store.insert_workflow("dev", name, &["dev/ConfigMap/sync/widgets"]);
        }

        let waiters = WaiterDiscovery::new(store)
            .find_waiters(&key(), "dev")
            .await
            .unwrap();

        assert_eq!(waiters.names(), ["wf-c", "wf-a", "wf-b"].map(String::from));
    }

    #[tokio::test]
    async fn test_find_waiters_skips_nameless_and_malformed() {
        let store = Arc::new(MemoryStore::new());
        store.insert(
            &ResourceKind::WORKFLOW,
            "dev",
            json!({ "metadata": { "name": "wf-bad" }, "status": 7 }),
        );
        store.insert_workflow("dev", "wf-ok", &["dev/ConfigMap/sync/widgets"]);

        let waiters = WaiterDiscovery::new(store)
            .find_waiters(&key(), "dev")
            .await
            .unwrap();

        assert_eq!(waiters.names(), ["wf-ok".to_string()]);
    }

    #[tokio::test]
    async fn test_find_waiters_list_failure() {
        let store = Arc::new(MemoryStore::new());
        store.insert_workflow("dev", "wf-a", &["dev/ConfigMap/sync/widgets"]);
        store.fail_list(&ResourceKind::WORKFLOW, Fault::Api(500));

        let err = WaiterDiscovery::new(store)
            .find_waiters(&key(), "dev")
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::StoreUnavailable(_)));
    }
}
