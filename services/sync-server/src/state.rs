//! Application state shared across request handlers.

use std::sync::{Arc, PoisonError, RwLock};

use semsync_reconcile::{ReconcileError, Reconciler};
use semsync_store::{ObjectStore, StoreResult};

use crate::cluster::Connect;
use crate::config::RequestDefaults;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    connector: Arc<dyn Connect>,
    store: RwLock<Option<Arc<dyn ObjectStore>>>,
    defaults: RequestDefaults,
}

impl AppState {
    /// Create state with no cluster connection yet.
    pub fn new(connector: Arc<dyn Connect>, defaults: RequestDefaults) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                connector,
                store: RwLock::new(None),
                defaults,
            }),
        }
    }

    /// (Re-)establish the cluster connection.
    ///
    /// On failure the previous connection, if any, stays in place.
    pub fn connect(&self) -> StoreResult<()> {
        let store = self.inner.connector.connect()?;
        *self
            .inner
            .store
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(store);
        Ok(())
    }

    /// Whether a cluster connection is available.
    pub fn is_connected(&self) -> bool {
        self.store().is_some()
    }

    fn store(&self) -> Option<Arc<dyn ObjectStore>> {
        self.inner
            .store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reconciler bound to the current connection.
    pub fn reconciler(&self) -> Result<Reconciler, ReconcileError> {
        self.store().map(Reconciler::new).ok_or_else(|| {
            ReconcileError::ConfigurationMissing(
                "cluster connection not initialised; call /set_config".to_string(),
            )
        })
    }

    pub fn defaults(&self) -> &RequestDefaults {
        &self.inner.defaults
    }
}
