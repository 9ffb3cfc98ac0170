//! Install, fetch and activate handlers of the offline cache worker.

use std::sync::Arc;

use futures::future::try_join_all;
use guestbook_common::WorkerConfig;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheStorage, CachedResponse, RequestKey};
use crate::net::{NetError, Network, Request, Response};
use crate::ServiceWorkerError;

/// The worker script's event handlers, bound to a cache store and a network.
pub struct OfflineCacheWorker<S, N> {
    config: Arc<WorkerConfig>,
    origin: Url,
    storage: Arc<S>,
    network: Arc<N>,
}

impl<S: CacheStorage, N: Network> OfflineCacheWorker<S, N> {
    /// Bind handlers to their storage and network.
    pub fn new(
        config: Arc<WorkerConfig>,
        storage: Arc<S>,
        network: Arc<N>,
    ) -> Result<Self, ServiceWorkerError> {
        let origin = config.origin_url()?;
        Ok(Self {
            config,
            origin,
            storage,
            network,
        })
    }

    /// Configuration the handlers run with.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Install: pre-cache every asset or nothing.
    ///
    /// All assets are fetched concurrently. A transport error or a non-2xx
    /// status on any one of them fails the whole step before anything is
    /// stored. Returns the number of entries written.
    pub async fn install(&self) -> Result<usize, ServiceWorkerError> {
        let cache_name = self.config.install_cache_name.as_str();
        self.storage.open(cache_name).await?;

        let requests = self
            .config
            .precache_urls
            .iter()
            .map(|path| {
                self.origin
                    .join(path)
                    .map(Request::get)
                    .map_err(|e| NetError::InvalidUrl(format!("{path}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(cache = cache_name, count = requests.len(), "Pre-caching assets");

        let entries = try_join_all(requests.iter().map(|request| self.precache(request))).await?;
        let count = entries.len();
        self.storage.put_all(cache_name, entries).await?;

        info!(cache = cache_name, count, "Install complete");
        Ok(count)
    }

    async fn precache(
        &self,
        request: &Request,
    ) -> Result<(RequestKey, CachedResponse), ServiceWorkerError> {
        let response = self.network.fetch(request).await.map_err(|e| {
            warn!(url = %request.url, error = %e, "Pre-cache fetch failed");
            ServiceWorkerError::InstallFailed {
                url: request.url.to_string(),
                reason: e.to_string(),
            }
        })?;

        if !response.ok() {
            warn!(url = %request.url, status = %response.status, "Pre-cache got bad status");
            return Err(ServiceWorkerError::InstallFailed {
                url: request.url.to_string(),
                reason: format!("status {}", response.status),
            });
        }

        Ok((RequestKey::from(request), CachedResponse::from_response(&response)))
    }

    /// Fetch: cache first across every bucket, else the network unchanged.
    pub async fn handle_fetch(&self, request: &Request) -> Result<Response, NetError> {
        let key = RequestKey::from(request);
        if let Some(entry) = self.storage.match_request(&key).await {
            debug!(url = %request.url, "Serving from cache");
            return Ok(entry.to_response());
        }

        debug!(url = %request.url, "Cache miss, going to network");
        self.network.fetch(request).await
    }

    /// Activate: delete every bucket whose name is not retained.
    ///
    /// With default settings only the version constant survives, so the
    /// bucket install wrote to is removed as well. Returns the deleted names.
    pub async fn activate(&self) -> Result<Vec<String>, ServiceWorkerError> {
        let retained = self.config.retained_cache_names();
        let stale: Vec<String> = self
            .storage
            .keys()
            .await
            .into_iter()
            .filter(|name| !retained.contains(&name.as_str()))
            .collect();

        try_join_all(stale.iter().map(|name| self.storage.delete(name)))
            .await
            .map_err(|e| ServiceWorkerError::CacheError(format!("cleanup failed: {e}")))?;

        if stale.is_empty() {
            debug!("No stale caches");
        } else {
            info!(deleted = ?stale, "Deleted stale caches");
        }
        Ok(stale)
    }
}
