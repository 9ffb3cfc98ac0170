//! Worker configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::{GuestbookError, Result};

/// Version constant compared against bucket names during activation.
pub const CACHE_NAME: &str = "guestbook-cache-v1";

/// Bucket the install step actually writes to.
pub const INSTALL_CACHE_NAME: &str = "v1";

/// Path the page registers the worker script from.
pub const SCRIPT_PATH: &str = "/static/service-worker.js";

/// Assets fetched and stored by the install step.
pub const PRECACHE_URLS: [&str; 4] = [
    "/",
    "/static/icons/icon-192x192.png",
    "/static/icons/icon-512x512.png",
    "/static/manifest.json",
];

/// Asset list declared next to the version constant. Never consumed.
pub const DECLARED_URLS: [&str; 6] = [
    "/",
    "/static/manifest.json",
    "/static/service-worker.js",
    "/static/back_image.png",
    "/static/icons/icon-192x192.png",
    "/static/icons/icon-512x512.png",
];

/// Offline cache worker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Origin the worker is registered for
    pub origin: String,

    /// Script path passed to registration
    pub script_path: String,

    /// Version constant; activation keeps only buckets with this name
    pub cache_name: String,

    /// Bucket the install step populates
    pub install_cache_name: String,

    /// Paths fetched during install
    pub precache_urls: Vec<String>,

    /// Declared asset list, kept for parity only
    pub declared_urls: Vec<String>,

    /// Keep the install bucket during activation cleanup.
    ///
    /// Off by default, so the install bucket is deleted on activation.
    pub preserve_install_cache: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:8080/".to_string(),
            script_path: SCRIPT_PATH.to_string(),
            cache_name: CACHE_NAME.to_string(),
            install_cache_name: INSTALL_CACHE_NAME.to_string(),
            precache_urls: PRECACHE_URLS.iter().map(|s| s.to_string()).collect(),
            declared_urls: DECLARED_URLS.iter().map(|s| s.to_string()).collect(),
            preserve_install_cache: false,
        }
    }
}

impl WorkerConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: WorkerConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), origin = %config.origin, "Loaded worker config");
        Ok(config)
    }

    /// Set the origin.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Parse the origin URL.
    pub fn origin_url(&self) -> Result<Url> {
        Url::parse(&self.origin)
            .map_err(|e| GuestbookError::config_with_source(format!("invalid origin `{}`", self.origin), e))
    }

    /// Names activation cleanup leaves in place.
    pub fn retained_cache_names(&self) -> Vec<&str> {
        let mut names = vec![self.cache_name.as_str()];
        if self.preserve_install_cache && self.install_cache_name != self.cache_name {
            names.push(self.install_cache_name.as_str());
        }
        names
    }

    /// Check the configuration for values the worker cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cache_name.is_empty() {
            return Err(GuestbookError::config("cache_name must not be empty"));
        }
        if self.install_cache_name.is_empty() {
            return Err(GuestbookError::config("install_cache_name must not be empty"));
        }
        self.origin_url()?;
        let paths = std::iter::once(&self.script_path)
            .chain(&self.precache_urls)
            .chain(&self.declared_urls);
        for path in paths {
            if !path.starts_with('/') {
                return Err(GuestbookError::config(format!(
                    "asset path `{path}` must start with `/`"
                )));
            }
        }
        Ok(())
    }
}

/// HTTP client settings for the network fall-through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// User agent string
    pub user_agent: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum redirects followed
    pub max_redirects: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("guestbook-offline/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            max_redirects: 10,
        }
    }
}

impl NetworkConfig {
    /// Request timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
