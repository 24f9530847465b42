//! Capacity record access.
//!
//! A capacity record is a ConfigMap whose `data` holds one entry per
//! semaphore resource, the value being the capacity as text.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use semsync_store::{ObjectStore, PatchType, ResourceKind, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info, instrument, warn};

use crate::error::{ReconcileError, ReconcileResult};

/// Record contents as returned by the store after a capacity write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapacitySnapshot {
    pub namespace: String,
    pub record: String,
    pub data: BTreeMap<String, String>,
}

impl fmt::Display for CapacitySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Data patched to: {:?}", self.data)
    }
}

#[derive(Debug, Deserialize)]
struct ConfigMapData {
    #[serde(default)]
    data: Option<BTreeMap<String, String>>,
}

/// Reads and writes capacity records.
#[derive(Clone)]
pub struct CapacityRepository {
    store: Arc<dyn ObjectStore>,
}

impl CapacityRepository {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Set `resource_name` to `value` in the record.
    ///
    /// Always issues exactly one patch, even if the stored value is
    /// already equal. The record must exist.
    #[instrument(skip_all, fields(namespace = %namespace, record = %record_name, resource = %resource_name))]
    pub async fn set_capacity(
        &self,
        record_name: &str,
        resource_name: &str,
        namespace: &str,
        value: u64,
    ) -> ReconcileResult<CapacitySnapshot> {
        info!(value, "Setting semaphore capacity");

        let mut entries = Map::new();
        entries.insert(resource_name.to_string(), Value::String(value.to_string()));
        let mut body = Map::new();
        body.insert("data".to_string(), Value::Object(entries));

        let patched = self
            .store
            .patch(
                &ResourceKind::CONFIG_MAP,
                namespace,
                record_name,
                &Value::Object(body),
                PatchType::StrategicMerge,
            )
            .await
            .map_err(|e| {
                error!(error = %e, "Could not patch capacity record");
                ReconcileError::from_record_op(e, namespace, record_name)
            })?;

        // The write has landed; an unreadable response only narrows the snapshot.
        let data = record_data(patched).unwrap_or_else(|e| {
            warn!(error = %e, "Capacity record patched but the response could not be decoded");
            BTreeMap::from([(resource_name.to_string(), value.to_string())])
        });
        let snapshot = CapacitySnapshot {
            namespace: namespace.to_string(),
            record: record_name.to_string(),
            data,
        };
        info!(data = ?snapshot.data, "Capacity record patched");
        Ok(snapshot)
    }

    /// Current capacity text for `resource_name`, if the record has an entry.
    #[instrument(skip_all, fields(namespace = %namespace, record = %record_name, resource = %resource_name))]
    pub async fn get_capacity(
        &self,
        record_name: &str,
        resource_name: &str,
        namespace: &str,
    ) -> ReconcileResult<Option<String>> {
        let record = self
            .store
            .get(&ResourceKind::CONFIG_MAP, namespace, record_name)
            .await
            .map_err(|e| ReconcileError::from_record_op(e, namespace, record_name))?;

        Ok(record_data(record)?.remove(resource_name))
    }
}

fn record_data(record: Value) -> ReconcileResult<BTreeMap<String, String>> {
    let parsed: ConfigMapData = serde_json::from_value(record)
        .map_err(|e| ReconcileError::StoreUnavailable(StoreError::Decode(e.to_string())))?;
    Ok(parsed.data.unwrap_or_default())
}
