//! Object store adapter for cluster objects.
//!
//! This library is the only place the system talks to the cluster API.
//! Everything above it sees structured objects (`serde_json::Value`) and
//! three operations:
//!
//! - **get**: fetch one named object of a kind
//! - **list**: fetch every object of a kind in a namespace
//! - **patch**: apply a merge-style patch to one named object
//!
//! [`KubeStore`] implements [`ObjectStore`] over the Kubernetes REST API.
//! Tests substitute an in-memory implementation.

mod credentials;
mod error;
mod kind;
mod kube;

use async_trait::async_trait;
use serde_json::Value;

pub use credentials::{Credentials, TlsMaterial};
pub use error::{StoreError, StoreResult};
pub use kind::ResourceKind;
pub use kube::KubeStore;

/// Patch flavours understood by the cluster API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchType {
    /// JSON merge patch (RFC 7386).
    Merge,

    /// Kubernetes strategic merge patch.
    StrategicMerge,
}

impl PatchType {
    /// Content type header sent with the patch body.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Merge => "application/merge-patch+json",
            Self::StrategicMerge => "application/strategic-merge-patch+json",
        }
    }
}

/// Generic access to structured cluster objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch a single named object.
    async fn get(&self, kind: &ResourceKind, namespace: &str, name: &str) -> StoreResult<Value>;

    /// List all objects of a kind in a namespace, in the order the store returns them.
    async fn list(&self, kind: &ResourceKind, namespace: &str) -> StoreResult<Vec<Value>>;

    /// Patch a named object and return the object as stored after the patch.
    async fn patch(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
        body: &Value,
        patch_type: PatchType,
    ) -> StoreResult<Value>;
}
