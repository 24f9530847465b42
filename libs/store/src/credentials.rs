//! Cluster credential loading.
//!
//! Two sources are supported:
//! - the pod service account, when running inside the cluster
//! - a kubeconfig file, when running outside of it
//!
//! Anything missing or unreadable is reported as
//! [`StoreError::ConfigurationMissing`].

use std::fs;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Directory the kubelet mounts the service account into.
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// TLS settings for talking to the API server.
#[derive(Clone, Default)]
pub struct TlsMaterial {
    /// PEM bundle of trusted certificate authorities.
    pub ca_pem: Option<Vec<u8>>,

    /// PEM client certificate followed by its private key.
    pub identity_pem: Option<Vec<u8>>,

    /// Skip server certificate verification.
    pub insecure_skip_verify: bool,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_pem", &self.ca_pem.as_ref().map(|_| "<pem>"))
            .field("identity_pem", &self.identity_pem.as_ref().map(|_| "<redacted>"))
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .finish()
    }
}

/// Everything needed to open a connection to the cluster API.
#[derive(Clone)]
pub struct Credentials {
    /// API server base URL, e.g. `https://10.0.0.1:443`.
    pub server: String,

    /// Bearer token, if the user authenticates with one.
    pub token: Option<String>,

    pub tls: TlsMaterial,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("server", &self.server)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("tls", &self.tls)
            .finish()
    }
}

impl Credentials {
    /// Credentials for a server that needs no authentication.
    pub fn anonymous(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            token: None,
            tls: TlsMaterial::default(),
        }
    }

    /// Attach a bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Load credentials from the selected source.
    ///
    /// `kubeconfig` overrides the default kubeconfig location when
    /// running out of cluster.
    pub fn load(in_cluster: bool, kubeconfig: Option<&Path>) -> StoreResult<Self> {
        if in_cluster {
            return Self::in_cluster();
        }
        match kubeconfig {
            Some(path) => Self::from_kubeconfig(path),
            None => Self::from_kubeconfig(&default_kubeconfig_path()?),
        }
    }

    /// Load the pod's service account credentials.
    pub fn in_cluster() -> StoreResult<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
            StoreError::ConfigurationMissing("KUBERNETES_SERVICE_HOST is not set".to_string())
        })?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").map_err(|_| {
            StoreError::ConfigurationMissing("KUBERNETES_SERVICE_PORT is not set".to_string())
        })?;
        Self::from_service_account(&host, &port, Path::new(SERVICE_ACCOUNT_DIR))
    }

    /// Build credentials from a service account directory holding `token` and `ca.crt`.
    pub fn from_service_account(host: &str, port: &str, dir: &Path) -> StoreResult<Self> {
        let host = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]")
        } else {
            host.to_string()
        };
        let token = read_file(&dir.join("token"))?;
        let ca_pem = read_file_bytes(&dir.join("ca.crt"))?;

        debug!(host = %host, port = %port, "Loaded in-cluster service account credentials");

        Ok(Self {
            server: format!("https://{host}:{port}"),
            token: Some(token.trim().to_string()),
            tls: TlsMaterial {
                ca_pem: Some(ca_pem),
                identity_pem: None,
                insecure_skip_verify: false,
            },
        })
    }

    /// Load the current context of a kubeconfig file.
    pub fn from_kubeconfig(path: &Path) -> StoreResult<Self> {
        let raw = read_file(path)?;
        let config: Kubeconfig = serde_yaml::from_str(&raw).map_err(|e| {
            StoreError::ConfigurationMissing(format!(
                "invalid kubeconfig {}: {e}",
                path.display()
            ))
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve(base_dir)
    }
}

/// Kubeconfig location: first entry of `KUBECONFIG`, else `~/.kube/config`.
pub fn default_kubeconfig_path() -> StoreResult<PathBuf> {
    if let Some(value) = std::env::var_os("KUBECONFIG") {
        if let Some(first) = std::env::split_paths(&value).find(|p| !p.as_os_str().is_empty()) {
            return Ok(first);
        }
    }
    let home = std::env::var_os("HOME").ok_or_else(|| {
        StoreError::ConfigurationMissing("neither KUBECONFIG nor HOME is set".to_string())
    })?;
    Ok(PathBuf::from(home).join(".kube").join("config"))
}

fn read_file(path: &Path) -> StoreResult<String> {
    fs::read_to_string(path).map_err(|e| {
        StoreError::ConfigurationMissing(format!("cannot read {}: {e}", path.display()))
    })
}

fn read_file_bytes(path: &Path) -> StoreResult<Vec<u8>> {
    fs::read(path).map_err(|e| {
        StoreError::ConfigurationMissing(format!("cannot read {}: {e}", path.display()))
    })
}

fn decode_data(field: &str, data: &str) -> StoreResult<Vec<u8>> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| StoreError::ConfigurationMissing(format!("{field} is not valid base64: {e}")))
}

/// Inline `*-data` wins over the file reference, as in kubectl.
fn inline_or_file(
    field: &str,
    data: Option<&str>,
    file: Option<&str>,
    base_dir: &Path,
) -> StoreResult<Option<Vec<u8>>> {
    if let Some(data) = data {
        return decode_data(field, data).map(Some);
    }
    match file {
        Some(file) => read_file_bytes(&base_dir.join(file)).map(Some),
        None => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    users: Vec<NamedUser>,
    current_context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEntry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterEntry {
    server: String,
    certificate_authority: Option<String>,
    certificate_authority_data: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextEntry,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    cluster: String,
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: UserEntry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct UserEntry {
    token: Option<String>,
    #[serde(rename = "tokenFile")]
    token_file: Option<String>,
    client_certificate: Option<String>,
    client_certificate_data: Option<String>,
    client_key: Option<String>,
    client_key_data: Option<String>,
}

impl Kubeconfig {
    fn resolve(&self, base_dir: &Path) -> StoreResult<Credentials> {
        let context_name = self.current_context.as_deref().ok_or_else(|| {
            StoreError::ConfigurationMissing("kubeconfig has no current-context".to_string())
        })?;
        let context = self
            .contexts
            .iter()
            .find(|c| c.name == context_name)
            .map(|c| &c.context)
            .ok_or_else(|| {
                StoreError::ConfigurationMissing(format!("context {context_name} not found"))
            })?;
        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| {
                StoreError::ConfigurationMissing(format!("cluster {} not found", context.cluster))
            })?;
        let user = match &context.user {
            Some(name) => Some(
                self.users
                    .iter()
                    .find(|u| &u.name == name)
                    .map(|u| &u.user)
                    .ok_or_else(|| {
                        StoreError::ConfigurationMissing(format!("user {name} not found"))
                    })?,
            ),
            None => None,
        };

        let ca_pem = inline_or_file(
            "certificate-authority-data",
            cluster.certificate_authority_data.as_deref(),
            cluster.certificate_authority.as_deref(),
            base_dir,
        )?;

        let mut token = None;
        let mut identity_pem = None;
        if let Some(user) = user {
            token = match (&user.token, &user.token_file) {
                (Some(token), _) => Some(token.clone()),
                (None, Some(file)) => Some(read_file(&base_dir.join(file))?.trim().to_string()),
                (None, None) => None,
            };

            let cert = inline_or_file(
                "client-certificate-data",
                user.client_certificate_data.as_deref(),
                user.client_certificate.as_deref(),
                base_dir,
            )?;
            let key = inline_or_file(
                "client-key-data",
                user.client_key_data.as_deref(),
                user.client_key.as_deref(),
                base_dir,
            )?;
            identity_pem = match (cert, key) {
                (Some(mut cert), Some(key)) => {
                    if !cert.ends_with(b"\n") {
                        cert.push(b'\n');
                    }
                    cert.extend_from_slice(&key);
                    Some(cert)
                }
                (None, None) => None,
                _ => {
                    return Err(StoreError::ConfigurationMissing(
                        "client certificate and key must be provided together".to_string(),
                    ))
                }
            };
        }

        debug!(context = %context_name, server = %cluster.server, "Loaded kubeconfig credentials");

        Ok(Credentials {
            server: cluster.server.clone(),
            token,
            tls: TlsMaterial {
                ca_pem,
                identity_pem,
                insecure_skip_verify: cluster.insecure_skip_tls_verify,
            },
        })
    }
}
