//! Kubernetes REST implementation of [`ObjectStore`].

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::credentials::Credentials;
use crate::error::{StoreError, StoreResult};
use crate::kind::ResourceKind;
use crate::{ObjectStore, PatchType};

/// Object store backed by a Kubernetes API server.
#[derive(Debug, Clone)]
pub struct KubeStore {
    client: reqwest::Client,
    base_url: Url,
}

/// The `Status` object the API server returns on failures.
#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

impl KubeStore {
    /// Create a store from loaded credentials.
    ///
    /// No request is made; unreachable servers surface on first use.
    pub fn new(credentials: &Credentials) -> StoreResult<Self> {
        let base_url = Url::parse(&credentials.server).map_err(|e| {
            StoreError::ConfigurationMissing(format!(
                "invalid server URL {:?}: {e}",
                credentials.server
            ))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::ConfigurationMissing(format!(
                "server URL {:?} cannot carry a path",
                credentials.server
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(token) = &credentials.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                StoreError::ConfigurationMissing("bearer token is not a valid header".to_string())
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .use_rustls_tls();

        if let Some(ca_pem) = &credentials.tls.ca_pem {
            let certs = reqwest::Certificate::from_pem_bundle(ca_pem).map_err(|e| {
                StoreError::ConfigurationMissing(format!("invalid certificate authority: {e}"))
            })?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        if let Some(identity_pem) = &credentials.tls.identity_pem {
            let identity = reqwest::Identity::from_pem(identity_pem).map_err(|e| {
                StoreError::ConfigurationMissing(format!("invalid client certificate: {e}"))
            })?;
            builder = builder.identity(identity);
        }

        if credentials.tls.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build().map_err(|e| {
            StoreError::ConfigurationMissing(format!("failed to build HTTP client: {e}"))
        })?;

        Ok(Self { client, base_url })
    }

    /// API server base URL.
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// URL of a collection, or of one object when `name` is set.
    ///
    /// Each segment is percent-encoded, so names never change which
    /// resource is addressed.
    fn url(&self, kind: &ResourceKind, namespace: &str, name: Option<&str>) -> StoreResult<Url> {
        let segments = kind.path_segments(namespace, name)?;
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                StoreError::ConfigurationMissing(format!(
                    "server URL {} cannot carry a path",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Turn a response into a JSON value or a typed error.
    ///
    /// `name` is set for single-object requests, where a 404 means the
    /// object is gone rather than the kind being unknown.
    async fn handle_response(
        &self,
        response: reqwest::Response,
        kind: &ResourceKind,
        namespace: &str,
        name: Option<&str>,
    ) -> StoreResult<Value> {
        let status = response.status();

        if status.is_success() {
            let body = response.bytes().await?;
            return Ok(serde_json::from_slice(&body)?);
        }

        if status == StatusCode::NOT_FOUND {
            if let Some(name) = name {
                return Err(StoreError::NotFound {
                    kind: kind.kind.to_string(),
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                });
            }
        }

        let body = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<ApiStatus>(&body).ok();
        let (reason, message) = match parsed {
            Some(s) => (s.reason, s.message.unwrap_or_else(|| body.clone())),
            None => (None, body),
        };

        error!(
            status = status.as_u16(),
            kind = %kind,
            namespace = %namespace,
            name = name.unwrap_or(""),
            message = %message,
            "Cluster API request failed"
        );

        Err(StoreError::Api {
            status: status.as_u16(),
            reason,
            message,
        })
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, kind: &ResourceKind, namespace: &str, name: &str) -> StoreResult<Value> {
        let url = self.url(kind, namespace, Some(name))?;
        debug!(url = %url, "GET object");

        let response = self.client.get(url).send().await?;
        self.handle_response(response, kind, namespace, Some(name))
            .await
    }

    async fn list(&self, kind: &ResourceKind, namespace: &str) -> StoreResult<Vec<Value>> {
        let url = self.url(kind, namespace, None)?;
        debug!(url = %url, "LIST objects");

        let response = self.client.get(url).send().await?;
        let body = self.handle_response(response, kind, namespace, None).await?;

        match body {
            Value::Object(mut map) => match map.remove("items") {
                Some(Value::Array(items)) => Ok(items),
                // The API server omits `items` for empty lists in some versions.
                Some(Value::Null) | None => Ok(Vec::new()),
                Some(_) => Err(StoreError::Decode(format!(
                    "{} list `items` is not an array",
                    kind.kind
                ))),
            },
            _ => Err(StoreError::Decode(format!(
                "{} list response is not an object",
                kind.kind
            ))),
        }
    }

    async fn patch(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
        body: &Value,
        patch_type: PatchType,
    ) -> StoreResult<Value> {
        let url = self.url(kind, namespace, Some(name))?;
        debug!(url = %url, content_type = patch_type.content_type(), "PATCH object");

        let response = self
            .client
            .patch(url)
            .header(CONTENT_TYPE, patch_type.content_type())
            .body(serde_json::to_vec(body)?)
            .send()
            .await?;
        self.handle_response(response, kind, namespace, Some(name))
            .await
    }
}
