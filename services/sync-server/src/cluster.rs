//! Cluster connection factory.
//!
//! The server holds one object store for its lifetime. `/set_config`
//! asks the connector for a fresh one and swaps it in.

use std::path::PathBuf;
use std::sync::Arc;

use semsync_store::{Credentials, KubeStore, ObjectStore, StoreResult};
use tracing::info;

/// Builds an object store from whatever credentials are available now.
pub trait Connect: Send + Sync {
    fn connect(&self) -> StoreResult<Arc<dyn ObjectStore>>;
}

/// Connects to the Kubernetes API with in-cluster or kubeconfig credentials.
#[derive(Debug, Clone)]
pub struct KubeConnector {
    in_cluster: bool,
    kubeconfig: Option<PathBuf>,
}

impl KubeConnector {
    pub fn new(in_cluster: bool, kubeconfig: Option<PathBuf>) -> Self {
        Self {
            in_cluster,
            kubeconfig,
        }
    }
}

impl Connect for KubeConnector {
    fn connect(&self) -> StoreResult<Arc<dyn ObjectStore>> {
        let credentials = Credentials::load(self.in_cluster, self.kubeconfig.as_deref())?;
        let store = KubeStore::new(&credentials)?;
        info!(
            server = %store.base_url(),
            in_cluster = self.in_cluster,
            "Successfully set kube config"
        );
        Ok(Arc::new(store))
    }
}
