//! Sync API integration tests.
//!
//! Runs the router on a real listener against an in-memory object store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rstest::rstest;
use semsync_server::{api, cluster::Connect, config::RequestDefaults, state::AppState};
use semsync_store::{ObjectStore, ResourceKind, StoreError, StoreResult};
use semsync_testing::{Fault, MemoryStore};
use serde_json::Value;
use tokio::net::TcpListener;

const RESOURCE_KEY: &str = "dev/ConfigMap/sync/resource";
const WIDGETS_KEY: &str = "dev/ConfigMap/sync/widgets";

/// Hands out the same in-memory store on every connect.
struct MemoryConnector {
    store: Arc<MemoryStore>,
}

impl Connect for MemoryConnector {
    fn connect(&self) -> StoreResult<Arc<dyn ObjectStore>> {
        Ok(self.store.clone())
    }
}

/// A connector with no credentials available.
struct NoCredentials;

impl Connect for NoCredentials {
    fn connect(&self) -> StoreResult<Arc<dyn ObjectStore>> {
        Err(StoreError::ConfigurationMissing(
            "no kubeconfig found".to_string(),
        ))
    }
}

/// Blocks inside `connect` until released, like a slow credential read.
struct GatedConnector {
    store: Arc<MemoryStore>,
    entered: Arc<AtomicBool>,
    release: Mutex<Receiver<()>>,
}

impl Connect for GatedConnector {
    fn connect(&self) -> StoreResult<Arc<dyn ObjectStore>> {
        self.entered.store(true, Ordering::SeqCst);
        let _ = self
            .release
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(5));
        Ok(self.store.clone())
    }
}

struct SyncApiHarness {
    base_url: String,
    client: reqwest::Client,
}

impl SyncApiHarness {
    async fn start(connector: Arc<dyn Connect>, connect_now: bool) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info,semsync_reconcile=debug".into()),
            )
            .with_test_writer()
            .try_init();

        let state = AppState::new(connector, RequestDefaults::default());
        if connect_now {
            state.connect().unwrap();
        }
        let app = api::create_router(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
        }
    }

    async fn with_store(store: Arc<MemoryStore>) -> Self {
        Self::start(Arc::new(MemoryConnector { store }), true).await
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        let body = response.json().await.unwrap_or(Value::Null);
        (status, body)
    }
}

fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.insert_config_map("dev", "sync", &[("resource", "1"), ("gpus", "2")]);
    store.insert_workflow("dev", "wf-a", &[WIDGETS_KEY]);
    store.insert_workflow("dev", "wf-b", &[RESOURCE_KEY]);
    store.insert_workflow("dev", "wf-c", &[]);
    store
}

#[tokio::test]
async fn test_reconcile_with_explicit_resource() {
    let store = seeded_store();
    let harness = SyncApiHarness::with_store(store.clone()).await;

    let (status, body) = harness
        .get("/?resources=3&resource_name=widgets&cm_name=sync&ns=dev")
        .await;

    assert_eq!(status, 200, "body: {body}");
    assert_eq!(body["capacity"]["data"]["widgets"], "3");
    assert_eq!(body["capacity"]["data"]["gpus"], "2");
    assert_eq!(body["semaphore"], WIDGETS_KEY);
    assert_eq!(body["waiting"], serde_json::json!(["wf-a"]));
    assert_eq!(body["pinged"], serde_json::json!(["wf-a"]));
    assert_eq!(body["failed"], serde_json::json!({}));
    assert!(body["msg"]
        .as_str()
        .unwrap()
        .starts_with("Data patched to: "));

    assert_eq!(store.patched_names(&ResourceKind::WORKFLOW), vec!["wf-a"]);
}

#[tokio::test]
async fn test_reconcile_uses_defaults() {
    let store = seeded_store();
    let harness = SyncApiHarness::with_store(store.clone()).await;

    let (status, body) = harness.get("/?resources=5&ns=&cm_name=").await;

    assert_eq!(status, 200, "body: {body}");
    assert_eq!(body["semaphore"], RESOURCE_KEY);
    assert_eq!(body["capacity"]["data"]["resource"], "5");
    assert_eq!(body["pinged"], serde_json::json!(["wf-b"]));
}

#[rstest]
#[case::missing_resources("/", "invalid_query")]
#[case::non_numeric("/?resources=many", "invalid_query")]
#[case::negative("/?resources=-1", "invalid_resources")]
#[tokio::test]
async fn test_reconcile_rejects_bad_queries(#[case] path: &str, #[case] code: &str) {
    let store = seeded_store();
    let harness = SyncApiHarness::with_store(store.clone()).await;

    let (status, body) = harness.get(path).await;

    assert_eq!(status, 400);
    assert_eq!(body["code"], code);
    assert!(store.calls().is_empty());
}

#[rstest]
#[case::traversal_record("/?resources=3&cm_name=..%2Fsecrets%2Fdb")]
#[case::dot_dot_record("/?resources=3&cm_name=..")]
#[case::query_in_record("/?resources=3&cm_name=sync%3FdryRun%3DAll")]
#[case::fragment_in_record("/?resources=3&cm_name=sync%23x")]
#[case::traversal_namespace("/?resources=3&ns=..%2Fkube-system")]
#[case::upper_case_namespace("/?resources=3&ns=Dev")]
#[case::capacity_read("/capacity?cm_name=..%2Fsecrets%2Fdb")]
#[tokio::test]
async fn test_names_that_are_not_object_names_are_rejected(#[case] path: &str) {
    let store = seeded_store();
    let harness = SyncApiHarness::with_store(store.clone()).await;

    let (status, body) = harness.get(path).await;

    assert_eq!(status, 400, "body: {body}");
    assert_eq!(body["code"], "invalid_query");
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn test_missing_record_is_404() {
    let store = Arc::new(MemoryStore::new());
    store.insert_workflow("dev", "wf-b", &[RESOURCE_KEY]);
    let harness = SyncApiHarness::with_store(store.clone()).await;

    let (status, body) = harness.get("/?resources=2").await;

    assert_eq!(status, 404);
    assert_eq!(body["code"], "record_not_found");
    assert!(store.calls_for(&ResourceKind::WORKFLOW).is_empty());
}

#[tokio::test]
async fn test_discovery_failure_reports_applied_capacity() {
    let store = seeded_store();
    store.fail_list(&ResourceKind::WORKFLOW, Fault::Api(500));
    let harness = SyncApiHarness::with_store(store.clone()).await;

    let (status, body) = harness.get("/?resources=7").await;

    assert_eq!(status, 502);
    assert_eq!(body["code"], "discovery_failed");
    assert!(body["detail"].as_str().unwrap().contains("\"resource\": \"7\""));

    let record = store.object(&ResourceKind::CONFIG_MAP, "dev", "sync").unwrap();
    assert_eq!(record["data"]["resource"], "7");
}

#[tokio::test]
async fn test_failed_ping_is_reported_not_fatal() {
    let store = seeded_store();
    store.insert_workflow("dev", "wf-d", &[RESOURCE_KEY]);
    store.fail_patch(&ResourceKind::WORKFLOW, "wf-b", Fault::Api(409));
    let harness = SyncApiHarness::with_store(store.clone()).await;

    let (status, body) = harness.get("/?resources=4").await;

    assert_eq!(status, 200, "body: {body}");
    assert_eq!(body["waiting"], serde_json::json!(["wf-b", "wf-d"]));
    assert_eq!(body["pinged"], serde_json::json!(["wf-d"]));
    assert!(body["failed"]["wf-b"].is_string());
}

#[tokio::test]
async fn test_unconfigured_server_until_set_config() {
    let store = seeded_store();
    let harness =
        SyncApiHarness::start(Arc::new(MemoryConnector { store: store.clone() }), false).await;

    let (status, body) = harness.get("/?resources=2").await;
    assert_eq!(status, 503);
    assert_eq!(body["code"], "configuration_missing");

    let (status, _) = harness.get("/readyz").await;
    assert_eq!(status, 503);

    let (status, body) = harness.get("/set_config").await;
    assert_eq!(status, 200);
    assert_eq!(body, serde_json::json!({ "msg": "Success!" }));

    let (status, body) = harness.get("/readyz").await;
    assert_eq!(status, 200);
    assert_eq!(body["components"]["cluster"], "ok");

    let (status, _) = harness.get("/?resources=2").await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn test_set_config_without_credentials() {
    let harness = SyncApiHarness::start(Arc::new(NoCredentials), false).await;

    let (status, body) = harness.get("/set_config").await;

    assert_eq!(status, 503);
    assert_eq!(body["code"], "configuration_missing");
    assert!(body["detail"].as_str().unwrap().contains("no kubeconfig found"));
}

#[tokio::test]
async fn test_get_capacity() {
    let store = seeded_store();
    let harness = SyncApiHarness::with_store(store).await;

    let (status, body) = harness.get("/capacity?resource_name=gpus").await;
    assert_eq!(status, 200);
    assert_eq!(body["capacity"], "2");
    assert_eq!(body["cm_name"], "sync");

    let (status, body) = harness.get("/capacity?resource_name=absent").await;
    assert_eq!(status, 200);
    assert!(body["capacity"].is_null());

    let (status, body) = harness.get("/capacity?cm_name=missing").await;
    assert_eq!(status, 404);
    assert_eq!(body["code"], "record_not_found");
}

#[tokio::test]
async fn test_capacity_read_store_failure_is_502() {
    let store = seeded_store();
    store.fail_get(&ResourceKind::CONFIG_MAP, "sync", Fault::Api(500));
    let harness = SyncApiHarness::with_store(store).await;

    let (status, body) = harness.get("/capacity").await;

    assert_eq!(status, 502);
    assert_eq!(body["code"], "store_unavailable");
    assert_eq!(body["retryable"], true);
}

#[tokio::test]
async fn test_slow_set_config_does_not_stall_other_requests() {
    let (release, gate) = mpsc::channel();
    let entered = Arc::new(AtomicBool::new(false));
    let connector = GatedConnector {
        store: seeded_store(),
        entered: entered.clone(),
        release: Mutex::new(gate),
    };
    let harness = Arc::new(SyncApiHarness::start(Arc::new(connector), false).await);
    let started = Instant::now();

    let pending = tokio::spawn({
        let harness = harness.clone();
        async move { harness.get("/set_config").await }
    });
    while !entered.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let (status, _) = harness.get("/livez").await;
    assert_eq!(status, 200);
    assert!(
        started.elapsed() < Duration::from_secs(4),
        "health check waited on the credential load"
    );

    release.send(()).unwrap();
    let (status, body) = pending.await.unwrap();
    assert_eq!(status, 200, "body: {body}");
    assert_eq!(body, serde_json::json!({ "msg": "Success!" }));
}

#[tokio::test]
async fn test_health_endpoints() {
    let harness = SyncApiHarness::with_store(seeded_store()).await;

    let (status, body) = harness.get("/healthz").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");

    let (status, _) = harness.get("/livez").await;
    assert_eq!(status, 200);
}
