//! Cache Storage: named buckets of request → response pairs.

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, Method, StatusCode};
use tokio::sync::RwLock;
use tracing::{debug, trace};
use url::Url;

use crate::net::{Request, Response};
use crate::ServiceWorkerError;

/// Identity of a cached request: method plus absolute URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub method: Method,
    pub url: String,
}

impl RequestKey {
    /// Create a key for a request.
    pub fn new(method: Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method,
            url: url.into(),
        }
    }

    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        Self::new(Method::GET, url)
    }
}

impl From<&Request> for RequestKey {
    fn from(request: &Request) -> Self {
        Self::new(request.method.clone(), &request.url)
    }
}

/// A stored response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// Final response URL.
    pub url: Url,

    /// Response status.
    pub status: StatusCode,

    /// Response headers.
    pub headers: HeaderMap,

    /// Response body.
    pub body: Bytes,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CachedResponse {
    /// Snapshot a network response for storage.
    pub fn from_response(response: &Response) -> Self {
        Self {
            url: response.url.clone(),
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            cached_at: now_millis(),
        }
    }

    /// Rebuild a response to hand back to the page.
    pub fn to_response(&self) -> Response {
        Response {
            url: self.url.clone(),
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
            from_cache: true,
        }
    }
}

// ==================== Cache ====================

/// A cache bucket.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    entries: HashMap<RequestKey, CachedResponse>,
}

impl Cache {
    /// Create a new, empty cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, key: &RequestKey) -> Option<&CachedResponse> {
        self.entries.get(key)
    }

    /// Store an entry, replacing any previous one for the key.
    pub fn put(&mut self, key: RequestKey, response: CachedResponse) {
        self.entries.insert(key, response);
    }

    /// Delete entry.
    pub fn delete(&mut self, key: &RequestKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Get all keys.
    pub fn keys(&self) -> Vec<&RequestKey> {
        self.entries.keys().collect()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bucket holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// The origin's cache storage (`caches`).
///
/// Buckets are kept in creation order; unscoped matches search them in that
/// order.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a bucket, creating it if absent. Returns `true` if it was created.
    async fn open(&self, name: &str) -> Result<bool, ServiceWorkerError>;

    /// Store a batch into an open bucket. Either every entry is stored or none.
    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(RequestKey, CachedResponse)>,
    ) -> Result<(), ServiceWorkerError>;

    /// Match across all buckets; the first bucket with the key wins.
    async fn match_request(&self, key: &RequestKey) -> Option<CachedResponse>;

    /// Check if a bucket exists.
    async fn has(&self, name: &str) -> bool;

    /// Bucket names in creation order.
    async fn keys(&self) -> Vec<String>;

    /// Delete a bucket. Returns `true` if it existed.
    async fn delete(&self, name: &str) -> Result<bool, ServiceWorkerError>;

    /// Number of entries in a bucket, `None` if it does not exist.
    async fn entry_count(&self, name: &str) -> Option<usize>;
}

/// In-process cache storage.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<Vec<Cache>>,
}

impl MemoryCacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<bool, ServiceWorkerError> {
        let mut caches = self.caches.write().await;
        if caches.iter().any(|c| c.name == name) {
            return Ok(false);
        }
        debug!(cache = name, "Creating cache bucket");
        caches.push(Cache::new(name));
        Ok(true)
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(RequestKey, CachedResponse)>,
    ) -> Result<(), ServiceWorkerError> {
        let mut caches = self.caches.write().await;
        let cache = caches
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("cache `{name}`")))?;

        trace!(cache = name, count = entries.len(), "Storing batch");
        for (key, response) in entries {
            cache.put(key, response);
        }
        Ok(())
    }

    async fn match_request(&self, key: &RequestKey) -> Option<CachedResponse> {
        let caches = self.caches.read().await;
        caches
            .iter()
            .find_map(|cache| cache.match_request(key))
            .cloned()
    }

    async fn has(&self, name: &str) -> bool {
        self.caches.read().await.iter().any(|c| c.name == name)
    }

    async fn keys(&self) -> Vec<String> {
        self.caches
            .read()
            .await
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    async fn delete(&self, name: &str) -> Result<bool, ServiceWorkerError> {
        let mut caches = self.caches.write().await;
        let before = caches.len();
        caches.retain(|c| c.name != name);
        let removed = caches.len() != before;
        if removed {
            debug!(cache = name, "Deleted cache bucket");
        }
        Ok(removed)
    }

    async fn entry_count(&self, name: &str) -> Option<usize> {
        self.caches
            .read()
            .await
            .iter()
            .find(|c| c.name == name)
            .map(Cache::len)
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
