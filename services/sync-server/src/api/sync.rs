//! Semaphore endpoints.
//!
//! - `GET /` resizes a semaphore and wakes its waiters
//! - `GET /set_config` (re-)establishes the cluster connection
//! - `GET /capacity` reads the current capacity

use std::collections::BTreeMap;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use semsync_reconcile::{
    CapacitySnapshot, ReconcileOutcome, ReconcileRequest, SemaphoreKey, WaitSet,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::api::error::ApiError;
use crate::config::RequestDefaults;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(reconcile))
        .route("/set_config", get(set_config))
        .route("/capacity", get(get_capacity))
}

#[derive(Debug, Deserialize)]
struct ReconcileQuery {
    resources: i64,
    #[serde(default)]
    resource_name: Option<String>,
    #[serde(default)]
    cm_name: Option<String>,
    #[serde(default)]
    ns: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CapacityQuery {
    #[serde(default)]
    resource_name: Option<String>,
    #[serde(default)]
    cm_name: Option<String>,
    #[serde(default)]
    ns: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReconcileResponse {
    msg: String,
    capacity: CapacitySnapshot,
    semaphore: SemaphoreKey,
    waiting: WaitSet,
    pinged: Vec<String>,
    /// Workflow name -> reason its ping failed.
    failed: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct CapacityResponse {
    namespace: String,
    cm_name: String,
    resource_name: String,
    capacity: Option<String>,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    msg: &'static str,
}

/// Empty values count as omitted.
fn or_default(value: Option<String>, default: &str) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Lower-case alphanumerics and `-`, alphanumeric at both ends.
fn is_dns_label_chars(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !value.starts_with('-')
        && !value.ends_with('-')
}

/// RFC 1123 label, the namespace name format.
fn is_dns_label(value: &str) -> bool {
    value.len() <= 63 && is_dns_label_chars(value)
}

/// RFC 1123 subdomain, the ConfigMap name format.
fn is_dns_subdomain(value: &str) -> bool {
    value.len() <= 253 && value.split('.').all(is_dns_label_chars)
}

/// Resolved `(namespace, record, resource)` for a request.
fn coordinates(
    defaults: &RequestDefaults,
    ns: Option<String>,
    cm_name: Option<String>,
    resource_name: Option<String>,
) -> Result<(String, String, String), ApiError> {
    let namespace = or_default(ns, &defaults.namespace);
    if !is_dns_label(&namespace) {
        return Err(ApiError::bad_request(
            "invalid_query",
            format!("ns must be a DNS-1123 label, got {namespace:?}"),
        ));
    }

    let record_name = or_default(cm_name, &defaults.record_name);
    if !is_dns_subdomain(&record_name) {
        return Err(ApiError::bad_request(
            "invalid_query",
            format!("cm_name must be a DNS-1123 subdomain, got {record_name:?}"),
        ));
    }

    Ok((
        namespace,
        record_name,
        or_default(resource_name, &defaults.resource_name),
    ))
}

async fn reconcile(
    State(state): State<AppState>,
    query: Result<Query<ReconcileQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::bad_request("invalid_query", e.body_text()))?;

    let capacity = u64::try_from(query.resources).map_err(|_| {
        ApiError::bad_request(
            "invalid_resources",
            format!("resources must be non-negative, got {}", query.resources),
        )
    })?;

    let (namespace, record_name, resource_name) = coordinates(
        state.defaults(),
        query.ns,
        query.cm_name,
        query.resource_name,
    )?;
    info!(
        resources = capacity,
        resource_name = %resource_name,
        "Received a query to set semaphore capacity"
    );

    let request = ReconcileRequest::new(capacity)
        .with_namespace(namespace)
        .with_record_name(record_name)
        .with_resource_name(resource_name);

    let reconciler = state.reconciler()?;
    match reconciler.reconcile(&request).await {
        ReconcileOutcome::Completed(result) => {
            let failed = result
                .wake_report
                .failed
                .iter()
                .map(|(name, e)| (name.clone(), e.to_string()))
                .collect();
            Ok(Json(ReconcileResponse {
                msg: result.summary(),
                capacity: result.capacity,
                semaphore: result.semaphore_key,
                waiting: result.wait_set,
                pinged: result.wake_report.succeeded,
                failed,
            }))
        }
        ReconcileOutcome::CapacitySetFailed(cause) => Err(cause.into()),
        ReconcileOutcome::DiscoveryFailed { capacity, cause } => Err(ApiError::new(
            ApiError::status_for(&cause),
            "discovery_failed",
            format!(
                "{capacity}, but waiting workflows could not be discovered and none were pinged: {cause}"
            ),
        )),
    }
}

async fn set_config(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    // Credential loading reads files.
    let connected = tokio::task::spawn_blocking(move || state.connect())
        .await
        .map_err(|e| {
            error!(error = %e, "Cluster connection task failed");
            ApiError::internal("internal_error", "cluster connection task failed")
        })?;

    connected.map_err(|e| {
        error!(error = %e, "Failed to configure cluster connection");
        ApiError::service_unavailable("configuration_missing", e.to_string())
    })?;

    Ok(Json(MessageResponse { msg: "Success!" }))
}

async fn get_capacity(
    State(state): State<AppState>,
    query: Result<Query<CapacityQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::bad_request("invalid_query", e.body_text()))?;
    let (namespace, cm_name, resource_name) = coordinates(
        state.defaults(),
        query.ns,
        query.cm_name,
        query.resource_name,
    )?;

    let capacity = state
        .reconciler()?
        .capacity_repository()
        .get_capacity(&cm_name, &resource_name, &namespace)
        .await?;

    Ok(Json(CapacityResponse {
        namespace,
        cm_name,
        resource_name,
        capacity,
    }))
}
