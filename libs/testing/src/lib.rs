//! Test fixtures for semsync.
//!
//! [`MemoryStore`] is an in-memory [`ObjectStore`] that keeps objects in
//! insertion order, records every call made against it, and can be told
//! to fail specific operations.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use semsync_store::{ObjectStore, PatchType, ResourceKind, StoreError, StoreResult};
use serde_json::{json, Map, Value};

/// One recorded call against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Get {
        kind: &'static str,
        namespace: String,
        name: String,
    },
    List {
        kind: &'static str,
        namespace: String,
    },
    Patch {
        kind: &'static str,
        namespace: String,
        name: String,
        body: Value,
        patch_type: PatchType,
    },
}

impl StoreCall {
    /// Kind the call targeted.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Get { kind, .. } | Self::List { kind, .. } | Self::Patch { kind, .. } => *kind,
        }
    }
}

/// Failure to inject into an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The API server answers with this HTTP status.
    Api(u16),

    /// Credentials are unusable.
    ConfigurationMissing,
}

impl Fault {
    fn into_error(self) -> StoreError {
        match self {
            Self::Api(status) => StoreError::Api {
                status,
                reason: None,
                message: format!("injected failure ({status})"),
            },
            Self::ConfigurationMissing => {
                StoreError::ConfigurationMissing("injected failure".to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Op {
    Get,
    List,
    Patch,
}

/// `(op, kind, name)`; a `None` name matches every object of the kind.
type FaultKey = (Op, &'static str, Option<String>);

#[derive(Default)]
struct Inner {
    /// `(kind, namespace)` -> objects in insertion order.
    objects: HashMap<(&'static str, String), Vec<Value>>,
    calls: Vec<StoreCall>,
    faults: HashMap<FaultKey, Fault>,
}

/// In-memory object store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store lock poisoned")
    }

    /// Insert or replace an object. `metadata.name` must be set.
    pub fn insert(&self, kind: &ResourceKind, namespace: &str, object: Value) {
        let name = object_name(&object)
            .expect("object inserted into MemoryStore needs metadata.name")
            .to_string();
        let mut inner = self.lock();
        let bucket = inner
            .objects
            .entry((kind.kind, namespace.to_string()))
            .or_default();
        match bucket
            .iter_mut()
            .find(|o| object_name(o) == Some(name.as_str()))
        {
            Some(existing) => *existing = object,
            None => bucket.push(object),
        }
    }

    /// Insert a ConfigMap with the given data entries.
    pub fn insert_config_map(&self, namespace: &str, name: &str, data: &[(&str, &str)]) {
        let data: Map<String, Value> = data
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        self.insert(
            &ResourceKind::CONFIG_MAP,
            namespace,
            json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": { "name": name, "namespace": namespace },
                "data": data,
            }),
        );
    }

    /// Insert a Workflow waiting on the given semaphore keys.
    ///
    /// An empty slice inserts a workflow with no synchronization status.
    pub fn insert_workflow(&self, namespace: &str, name: &str, waiting_on: &[&str]) {
        let mut workflow = json!({
            "apiVersion": "argoproj.io/v1alpha1",
            "kind": "Workflow",
            "metadata": { "name": name, "namespace": namespace },
            "status": { "phase": "Running" },
        });
        if !waiting_on.is_empty() {
            let waiting: Vec<Value> = waiting_on
                .iter()
                .map(|key| json!({ "semaphore": key, "holders": [] }))
                .collect();
            workflow["status"]["synchronization"] = json!({ "semaphore": { "waiting": waiting } });
        }
        self.insert(&ResourceKind::WORKFLOW, namespace, workflow);
    }

    /// Remove an object, simulating deletion by another actor.
    pub fn remove(&self, kind: &ResourceKind, namespace: &str, name: &str) {
        let mut inner = self.lock();
        if let Some(bucket) = inner.objects.get_mut(&(kind.kind, namespace.to_string())) {
            bucket.retain(|o| object_name(o) != Some(name));
        }
    }

    /// Current copy of an object, bypassing the call log.
    pub fn object(&self, kind: &ResourceKind, namespace: &str, name: &str) -> Option<Value> {
        let inner = self.lock();
        inner
            .objects
            .get(&(kind.kind, namespace.to_string()))
            .and_then(|bucket| bucket.iter().find(|o| object_name(o) == Some(name)))
            .cloned()
    }

    /// Fail `get` for one named object.
    pub fn fail_get(&self, kind: &ResourceKind, name: &str, fault: Fault) {
        self.lock()
            .faults
            .insert((Op::Get, kind.kind, Some(name.to_string())), fault);
    }

    /// Fail every `list` of a kind.
    pub fn fail_list(&self, kind: &ResourceKind, fault: Fault) {
        self.lock().faults.insert((Op::List, kind.kind, None), fault);
    }

    /// Fail `patch` for one named object.
    pub fn fail_patch(&self, kind: &ResourceKind, name: &str, fault: Fault) {
        self.lock()
            .faults
            .insert((Op::Patch, kind.kind, Some(name.to_string())), fault);
    }

    /// Fail every `patch` of a kind.
    pub fn fail_all_patches(&self, kind: &ResourceKind, fault: Fault) {
        self.lock().faults.insert((Op::Patch, kind.kind, None), fault);
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    /// Calls made against one kind.
    pub fn calls_for(&self, kind: &ResourceKind) -> Vec<StoreCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.kind() == kind.kind)
            .collect()
    }

    /// Names of objects patched successfully or not, in call order.
    pub fn patched_names(&self, kind: &ResourceKind) -> Vec<String> {
        self.calls_for(kind)
            .into_iter()
            .filter_map(|c| match c {
                StoreCall::Patch { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }

    fn fault(inner: &Inner, op: Op, kind: &'static str, name: Option<&str>) -> Option<Fault> {
        if let Some(name) = name {
            if let Some(fault) = inner.faults.get(&(op, kind, Some(name.to_string()))) {
                return Some(*fault);
            }
        }
        inner.faults.get(&(op, kind, None)).copied()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, kind: &ResourceKind, namespace: &str, name: &str) -> StoreResult<Value> {
        let mut inner = self.lock();
        inner.calls.push(StoreCall::Get {
            kind: kind.kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        if let Some(fault) = Self::fault(&inner, Op::Get, kind.kind, Some(name)) {
            return Err(fault.into_error());
        }
        inner
            .objects
            .get(&(kind.kind, namespace.to_string()))
            .and_then(|bucket| bucket.iter().find(|o| object_name(o) == Some(name)))
            .cloned()
            .ok_or_else(|| not_found(kind, namespace, name))
    }

    async fn list(&self, kind: &ResourceKind, namespace: &str) -> StoreResult<Vec<Value>> {
        let mut inner = self.lock();
        inner.calls.push(StoreCall::List {
            kind: kind.kind,
            namespace: namespace.to_string(),
        });
        if let Some(fault) = Self::fault(&inner, Op::List, kind.kind, None) {
            return Err(fault.into_error());
        }
        Ok(inner
            .objects
            .get(&(kind.kind, namespace.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn patch(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
        body: &Value,
        patch_type: PatchType,
    ) -> StoreResult<Value> {
        let mut inner = self.lock();
        inner.calls.push(StoreCall::Patch {
            kind: kind.kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            body: body.clone(),
            patch_type,
        });
        if let Some(fault) = Self::fault(&inner, Op::Patch, kind.kind, Some(name)) {
            return Err(fault.into_error());
        }
        let object = inner
            .objects
            .get_mut(&(kind.kind, namespace.to_string()))
            .and_then(|bucket| bucket.iter_mut().find(|o| object_name(o) == Some(name)))
            .ok_or_else(|| not_found(kind, namespace, name))?;
        merge_patch(object, body);
        Ok(object.clone())
    }
}

fn object_name(object: &Value) -> Option<&str> {
    object.pointer("/metadata/name").and_then(Value::as_str)
}

fn not_found(kind: &ResourceKind, namespace: &str, name: &str) -> StoreError {
    StoreError::NotFound {
        kind: kind.kind.to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

/// RFC 7386 merge. Strategic merge behaves the same for the map-only
/// bodies this system sends.
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}
