//! Page-side registration (`navigator.serviceWorker.register`).

use async_trait::async_trait;
use tracing::{debug, error, info};
use url::Url;

use crate::worker::ServiceWorkerId;
use crate::ServiceWorkerError;

/// Result of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationHandle {
    pub scope: Url,
    pub script_url: Url,
    pub worker_id: ServiceWorkerId,
}

/// What a page sees of the host's service worker support.
#[async_trait]
pub trait ServiceWorkerHost: Send + Sync {
    /// Capability check (`'serviceWorker' in navigator`).
    fn supports_service_workers(&self) -> bool;

    /// Register the script at `script_path` for this origin.
    async fn register(&self, script_path: &str) -> Result<RegistrationHandle, ServiceWorkerError>;
}

/// Register the worker on page load.
///
/// Does nothing when the host lacks support. Failures are logged and the
/// page carries on without offline support; there is no retry.
pub async fn register_service_worker<H>(host: &H, script_path: &str) -> Option<RegistrationHandle>
where
    H: ServiceWorkerHost + ?Sized,
{
    if !host.supports_service_workers() {
        debug!("Service workers unsupported, skipping registration");
        return None;
    }

    match host.register(script_path).await {
        Ok(handle) => {
            info!(scope = %handle.scope, worker = %handle.worker_id, "Service worker registered");
            Some(handle)
        }
        Err(e) => {
            error!(script = script_path, error = %e, "Service worker registration failed");
            None
        }
    }
}
