//! End-to-end lifecycle tests: register, install, intercept, activate.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use guestbook_common::WorkerConfig;
use guestbook_sw::{
    register_service_worker, CacheStorage, CachedResponse, MemoryCacheStorage, NetError, Network,
    Request, RequestKey, Response, ServiceWorkerError, ServiceWorkerEvent, ServiceWorkerHost,
    ServiceWorkerState, WorkerRuntime,
};
use http::StatusCode;
use url::Url;

const ORIGIN: &str = "https://guestbook.test/";
const SCRIPT: &str = "/static/service-worker.js";

const PRECACHED: [&str; 4] = [
    "/",
    "/static/icons/icon-192x192.png",
    "/static/icons/icon-512x512.png",
    "/static/manifest.json",
];

/// Serves `<path>` bodies, records every call, and can be told to fail paths.
#[derive(Default)]
struct RecordingNetwork {
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl RecordingNetwork {
    fn fail(&self, path: &str) {
        self.failing.lock().unwrap().insert(path.to_string());
    }

    fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Network for RecordingNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        let path = request.url.path().to_string();
        self.calls.lock().unwrap().push(path.clone());
        if self.failing.lock().unwrap().contains(&path) {
            return Err(NetError::RequestFailed(format!("connection reset: {path}")));
        }
        let mut response = Response::new(request.url.clone(), StatusCode::OK, format!("net:{path}"));
        response
            .headers
            .insert("x-served-by", http::HeaderValue::from_static("origin"));
        Ok(response)
    }
}

/// Memory storage whose bucket deletion always fails.
#[derive(Default)]
struct StuckStorage {
    inner: MemoryCacheStorage,
}

#[async_trait]
impl CacheStorage for StuckStorage {
    async fn open(&self, name: &str) -> Result<bool, ServiceWorkerError> {
        self.inner.open(name).await
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(RequestKey, CachedResponse)>,
    ) -> Result<(), ServiceWorkerError> {
        self.inner.put_all(name, entries).await
    }

    async fn match_request(&self, key: &RequestKey) -> Option<CachedResponse> {
        self.inner.match_request(key).await
    }

    async fn has(&self, name: &str) -> bool {
        self.inner.has(name).await
    }

    async fn keys(&self) -> Vec<String> {
        self.inner.keys().await
    }

    async fn delete(&self, name: &str) -> Result<bool, ServiceWorkerError> {
        Err(ServiceWorkerError::CacheError(format!("{name} is locked")))
    }

    async fn entry_count(&self, name: &str) -> Option<usize> {
        self.inner.entry_count(name).await
    }
}

fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

fn config() -> WorkerConfig {
    WorkerConfig::default().with_origin(ORIGIN)
}

fn setup<S: CacheStorage + Default>(
    config: WorkerConfig,
) -> (
    WorkerRuntime<S, RecordingNetwork>,
    tokio::sync::mpsc::UnboundedReceiver<ServiceWorkerEvent>,
    Arc<S>,
    Arc<RecordingNetwork>,
) {
    let storage = Arc::new(S::default());
    let network = Arc::new(RecordingNetwork::default());
    let (runtime, rx) =
        WorkerRuntime::new(config, Arc::clone(&storage), Arc::clone(&network)).unwrap();
    (runtime, rx, storage, network)
}

#[tokio::test]
async fn install_stores_exactly_the_four_assets() {
    let (runtime, _rx, storage, _network) = setup::<MemoryCacheStorage>(config());

    // Drive install alone so the activate cleanup does not run.
    let installed = runtime.worker().install().await.unwrap();
    assert_eq!(installed, 4);
    assert_eq!(storage.entry_count("v1").await, Some(4));

    for path in PRECACHED {
        let entry = storage
            .match_request(&RequestKey::get(&url(path)))
            .await
            .unwrap_or_else(|| panic!("{path} not cached"));
        assert_eq!(&entry.body[..], format!("net:{path}").as_bytes());
    }
    assert!(storage
        .match_request(&RequestKey::get(&url("/static/back_image.png")))
        .await
        .is_none());
}

#[tokio::test]
async fn cached_request_never_touches_network() {
    let (runtime, _rx, storage, network) = setup::<MemoryCacheStorage>(config());
    runtime.worker().install().await.unwrap();
    let baseline = network.call_count();

    network.fail("/static/manifest.json");
    let response = runtime
        .worker()
        .handle_fetch(&Request::get(url("/static/manifest.json")))
        .await
        .unwrap();

    assert!(response.from_cache);
    assert_eq!(response.text().unwrap(), "net:/static/manifest.json");
    assert_eq!(response.headers.get("x-served-by").unwrap(), "origin");
    assert_eq!(network.call_count(), baseline);
    assert!(storage.has("v1").await);
}

#[tokio::test]
async fn uncached_request_hits_network_once_and_passes_through() {
    let (runtime, _rx, _storage, network) = setup::<MemoryCacheStorage>(config());
    runtime.register(SCRIPT).await.unwrap();
    let baseline = network.call_count();

    let response = runtime
        .handle_fetch(&Request::get(url("/uploads/cat.png")))
        .await
        .unwrap();
    assert!(!response.from_cache);
    assert_eq!(response.text().unwrap(), "net:/uploads/cat.png");
    assert_eq!(network.call_count(), baseline + 1);

    network.fail("/uploads/dog.png");
    let err = runtime
        .handle_fetch(&Request::get(url("/uploads/dog.png")))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Request failed: connection reset: /uploads/dog.png");
    assert_eq!(network.call_count(), baseline + 2);
}

#[tokio::test]
async fn activation_deletes_the_install_bucket() {
    let (runtime, _rx, storage, network) = setup::<MemoryCacheStorage>(config());
    storage.open("guestbook-cache-v1").await.unwrap();
    storage.open("guestbook-cache-v0").await.unwrap();

    runtime.register(SCRIPT).await.unwrap();
    assert_eq!(runtime.active_state().await, Some(ServiceWorkerState::Activated));

    // Only the version constant survives; the bucket install wrote to is gone.
    assert_eq!(storage.keys().await, vec!["guestbook-cache-v1"]);
    assert!(!storage.has("v1").await);

    // So every asset now goes back to the network.
    let baseline = network.call_count();
    let response = runtime.handle_fetch(&Request::get(url("/"))).await.unwrap();
    assert!(!response.from_cache);
    assert_eq!(network.call_count(), baseline + 1);
}

#[tokio::test]
async fn preserving_install_cache_keeps_assets_offline() {
    let config = WorkerConfig {
        preserve_install_cache: true,
        ..config()
    };
    let (runtime, _rx, storage, network) = setup::<MemoryCacheStorage>(config);
    storage.open("stale").await.unwrap();

    runtime.register(SCRIPT).await.unwrap();
    assert_eq!(storage.keys().await, vec!["v1"]);

    for path in PRECACHED {
        network.fail(path);
    }
    let baseline = network.call_count();
    for path in PRECACHED {
        let response = runtime.handle_fetch(&Request::get(url(path))).await.unwrap();
        assert!(response.from_cache, "{path} should be served offline");
    }
    assert_eq!(network.call_count(), baseline);
}

#[tokio::test]
async fn one_failing_asset_fails_the_whole_install() {
    let (runtime, mut rx, storage, network) = setup::<MemoryCacheStorage>(config());
    network.fail("/static/icons/icon-512x512.png");

    let err = runtime.register(SCRIPT).await.unwrap_err();
    assert!(matches!(err, ServiceWorkerError::InstallFailed { .. }));

    assert_eq!(storage.entry_count("v1").await.unwrap_or(0), 0);
    assert!(runtime.active_state().await.is_none());
    assert!(runtime.waiting_state().await.is_none());

    let mut saw_failure = false;
    while let Ok(event) = rx.try_recv() {
        if let ServiceWorkerEvent::InstallFailed { error, .. } = event {
            assert!(error.contains("icon-512x512.png"));
            saw_failure = true;
        }
    }
    assert!(saw_failure);

    // No asset was fetched twice.
    let calls = network.calls();
    let unique: HashSet<&String> = calls.iter().collect();
    assert_eq!(unique.len(), calls.len());
    assert!(calls.contains(&"/static/icons/icon-512x512.png".to_string()));
}

#[tokio::test]
async fn failed_update_leaves_previous_worker_in_control() {
    let (runtime, _rx, _storage, network) = setup::<MemoryCacheStorage>(config());
    let first = runtime.register(SCRIPT).await.unwrap();

    network.fail("/static/manifest.json");
    assert!(runtime.register(SCRIPT).await.is_err());
    assert_eq!(runtime.active_id().await, Some(first.worker_id));
    assert_eq!(runtime.active_state().await, Some(ServiceWorkerState::Activated));

    network.heal();
    let third = runtime.register(SCRIPT).await.unwrap();
    assert_ne!(third.worker_id, first.worker_id);
    assert_eq!(runtime.waiting_state().await, Some(ServiceWorkerState::Installed));
}

#[tokio::test]
async fn cleanup_failure_still_activates() {
    let (runtime, mut rx, storage, _network) = setup::<StuckStorage>(config());

    let handle = runtime.register(SCRIPT).await.unwrap();
    assert_eq!(runtime.active_id().await, Some(handle.worker_id));
    assert!(storage.has("v1").await);

    let direct = runtime.worker().activate().await;
    assert!(matches!(direct, Err(ServiceWorkerError::CacheError(_))));

    let mut controller_changes = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, ServiceWorkerEvent::ControllerChange { .. }) {
            controller_changes += 1;
        }
    }
    assert_eq!(controller_changes, 1);
}

#[tokio::test]
async fn page_registration_through_runtime() {
    let (runtime, _rx, _storage, _network) = setup::<MemoryCacheStorage>(config());
    assert!(runtime.supports_service_workers());

    let handle = register_service_worker(&runtime, SCRIPT).await.unwrap();
    assert_eq!(handle.script_url, url(SCRIPT));
    assert_eq!(runtime.registration_scope().await, Some(url("/static/")));
}

#[tokio::test]
async fn page_registration_swallows_insecure_origin() {
    let (runtime, _rx, _storage, network) =
        setup::<MemoryCacheStorage>(WorkerConfig::default().with_origin("http://guestbook.test/"));

    assert!(register_service_worker(&runtime, SCRIPT).await.is_none());
    assert_eq!(network.call_count(), 0);

    // The page keeps working without offline support.
    let response = runtime
        .handle_fetch(&Request::get(Url::parse("http://guestbook.test/").unwrap()))
        .await
        .unwrap();
    assert!(!response.from_cache);
}
