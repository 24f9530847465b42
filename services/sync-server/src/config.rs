//! Sync server configuration (env-driven).

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use semsync_reconcile::ReconcileRequest;

/// Values used when a request omits the semaphore coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDefaults {
    pub namespace: String,
    pub record_name: String,
    pub resource_name: String,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            namespace: ReconcileRequest::DEFAULT_NAMESPACE.to_string(),
            record_name: ReconcileRequest::DEFAULT_RECORD_NAME.to_string(),
            resource_name: ReconcileRequest::DEFAULT_RESOURCE_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Load service account credentials instead of a kubeconfig.
    pub in_cluster: bool,

    /// Explicit kubeconfig path; `None` uses `KUBECONFIG` or `~/.kube/config`.
    pub kubeconfig: Option<PathBuf>,

    pub defaults: RequestDefaults,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration from any variable source.
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr = var("SEMSYNC_LISTEN_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8000".to_string())
            .parse()
            .context("SEMSYNC_LISTEN_ADDR must be a socket address (example: 0.0.0.0:8000).")?;

        let log_level = var("SEMSYNC_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        // Any non-empty value counts, "false" included.
        let in_cluster = var("RUNNING_IN_CLUSTER")
            .map(|v| !v.is_empty())
            .unwrap_or(false);

        let kubeconfig = var("SEMSYNC_KUBECONFIG").map(PathBuf::from);

        let fallback = RequestDefaults::default();
        let defaults = RequestDefaults {
            namespace: non_empty(var("SEMSYNC_DEFAULT_NAMESPACE")).unwrap_or(fallback.namespace),
            record_name: non_empty(var("SEMSYNC_DEFAULT_CM_NAME")).unwrap_or(fallback.record_name),
            resource_name: non_empty(var("SEMSYNC_DEFAULT_RESOURCE_NAME"))
                .unwrap_or(fallback.resource_name),
        };

        Ok(Self {
            listen_addr,
            log_level,
            in_cluster,
            kubeconfig,
            defaults,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
