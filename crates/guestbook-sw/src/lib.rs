//! # Guestbook Service Worker
//!
//! Offline asset cache for the guestbook pages.
//!
//! ## Features
//!
//! - **Registration**: capability check, then `navigator.serviceWorker.register()`
//! - **Lifecycle**: install, activate, fetch events on a checked state machine
//! - **Cache API**: named buckets keyed by request, unscoped `match`
//! - **Fetch Interception**: cache first, network fall-through
//!
//! ## Architecture
//!
//! ```text
//! WorkerRuntime (host side)
//!     │
//!     ├── ServiceWorkerRegistration
//!     │       ├── installing (ServiceWorker)
//!     │       ├── waiting (ServiceWorker)
//!     │       └── active (ServiceWorker)
//!     │
//!     └── OfflineCacheWorker (install / fetch / activate)
//!             ├── CacheStorage (caches)
//!             │       └── Cache: RequestKey → CachedResponse
//!             └── Network (fetch)
//! ```
//!
//! The cache store and the network are injected, so the handlers run the
//! same against [`MemoryCacheStorage`] + [`HttpNetwork`] as against test
//! doubles.

use thiserror::Error;

pub mod cache;
pub mod handlers;
pub mod net;
pub mod registration;
pub mod runtime;
pub mod worker;

pub use cache::{Cache, CacheStorage, CachedResponse, MemoryCacheStorage, RequestKey};
pub use handlers::OfflineCacheWorker;
pub use net::{HttpNetwork, NetError, Network, Request, Response};
pub use registration::{register_service_worker, RegistrationHandle, ServiceWorkerHost};
pub use runtime::{ServiceWorkerEvent, WorkerRuntime};
pub use worker::{ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Service workers are not supported by this host")]
    Unsupported,

    #[error("Security error: {0}")]
    SecurityError(String),

    #[error("Install failed for {url}: {reason}")]
    InstallFailed { url: String, reason: String },

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<guestbook_common::GuestbookError> for ServiceWorkerError {
    fn from(err: guestbook_common::GuestbookError) -> Self {
        ServiceWorkerError::RegistrationFailed(err.to_string())
    }
}
