//! Host-side driver: owns the registration, runs the lifecycle, dispatches fetches.

use std::sync::Arc;

use async_trait::async_trait;
use guestbook_common::WorkerConfig;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::handlers::OfflineCacheWorker;
use crate::net::{NetError, Network, Request, Response};
use crate::registration::{RegistrationHandle, ServiceWorkerHost};
use crate::worker::{ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState};
use crate::ServiceWorkerError;

/// Service worker events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// A new version started installing.
    UpdateFound { scope: String },
    /// State changed.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// Install step failed; the version was discarded.
    InstallFailed {
        worker_id: ServiceWorkerId,
        error: String,
    },
    /// A new worker controls the origin's pages.
    ControllerChange { worker_id: ServiceWorkerId },
}

/// Plays the browser's part for one origin.
pub struct WorkerRuntime<S, N> {
    origin: Url,
    worker: OfflineCacheWorker<S, N>,
    network: Arc<N>,
    registration: RwLock<Option<ServiceWorkerRegistration>>,
    /// Register jobs run one at a time, like the host's job queue.
    job_lock: Mutex<()>,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl<S: CacheStorage, N: Network> WorkerRuntime<S, N> {
    /// Create a runtime. Lifecycle events arrive on the returned receiver.
    pub fn new(
        config: WorkerConfig,
        storage: Arc<S>,
        network: Arc<N>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>), ServiceWorkerError> {
        config.validate()?;
        let origin = config.origin_url()?;
        let worker = OfflineCacheWorker::new(Arc::new(config), storage, Arc::clone(&network))?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok((
            Self {
                origin,
                worker,
                network,
                registration: RwLock::new(None),
                job_lock: Mutex::new(()),
                event_tx,
            },
            event_rx,
        ))
    }

    /// Handlers this runtime dispatches to.
    pub fn worker(&self) -> &OfflineCacheWorker<S, N> {
        &self.worker
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        // nobody listening is fine
        let _ = self.event_tx.send(event);
    }

    fn check_secure(&self, script_url: &Url) -> Result<(), ServiceWorkerError> {
        let secure = match self.origin.scheme() {
            "https" => true,
            "http" => matches!(
                self.origin.host_str(),
                Some("localhost") | Some("127.0.0.1") | Some("[::1]")
            ),
            _ => false,
        };
        if !secure {
            return Err(ServiceWorkerError::SecurityError(format!(
                "origin {} is not potentially trustworthy",
                self.origin.origin().ascii_serialization()
            )));
        }
        if script_url.origin() != self.origin.origin() {
            return Err(ServiceWorkerError::SecurityError(format!(
                "script {script_url} is not same-origin"
            )));
        }
        Ok(())
    }

    async fn install_new_version(
        &self,
        script_url: Url,
    ) -> Result<RegistrationHandle, ServiceWorkerError> {
        let scope = ServiceWorkerRegistration::default_scope(&script_url);

        let worker_id = {
            let mut registration = self.registration.write().await;
            let registration =
                registration.get_or_insert_with(|| ServiceWorkerRegistration::new(scope.clone()));
            registration.update(script_url.clone())?
        };

        self.emit(ServiceWorkerEvent::UpdateFound {
            scope: scope.to_string(),
        });
        self.emit(ServiceWorkerEvent::StateChange {
            worker_id,
            new_state: ServiceWorkerState::Installing,
        });

        let outcome = self.worker.install().await;

        let has_active = {
            let mut guard = self.registration.write().await;
            let registration = guard
                .as_mut()
                .ok_or_else(|| ServiceWorkerError::StateError("unregistered during install".to_string()))?;

            if let Err(e) = outcome {
                registration.install_failed(worker_id, e.to_string())?;
                warn!(worker = %worker_id, error = %e, "Install failed, version discarded");
                self.emit(ServiceWorkerEvent::InstallFailed {
                    worker_id,
                    error: e.to_string(),
                });
                self.emit(ServiceWorkerEvent::StateChange {
                    worker_id,
                    new_state: ServiceWorkerState::Redundant,
                });
                return Err(e);
            }

            registration.install_complete(worker_id)?;
            registration.active.is_some()
        };

        self.emit(ServiceWorkerEvent::StateChange {
            worker_id,
            new_state: ServiceWorkerState::Installed,
        });

        if has_active {
            debug!(worker = %worker_id, "Installed, waiting for old clients to go away");
        } else {
            self.activate_waiting().await?;
        }

        Ok(RegistrationHandle {
            scope,
            script_url,
            worker_id,
        })
    }

    /// Activate the waiting worker, as the host does once no page uses the old one.
    ///
    /// A failed cleanup is logged; the worker still takes control.
    pub async fn activate_waiting(&self) -> Result<ServiceWorkerId, ServiceWorkerError> {
        let worker_id = {
            let mut guard = self.registration.write().await;
            let registration = guard
                .as_mut()
                .ok_or_else(|| ServiceWorkerError::NotFound("registration".to_string()))?;
            registration.begin_activation()?
        };
        self.emit(ServiceWorkerEvent::StateChange {
            worker_id,
            new_state: ServiceWorkerState::Activating,
        });

        if let Err(e) = self.worker.activate().await {
            warn!(worker = %worker_id, error = %e, "Activate handler failed");
        }

        {
            let mut guard = self.registration.write().await;
            let registration = guard
                .as_mut()
                .ok_or_else(|| ServiceWorkerError::StateError("unregistered during activate".to_string()))?;
            registration.finish_activation(worker_id)?;
        }

        info!(worker = %worker_id, "Worker activated");
        self.emit(ServiceWorkerEvent::StateChange {
            worker_id,
            new_state: ServiceWorkerState::Activated,
        });
        self.emit(ServiceWorkerEvent::ControllerChange { worker_id });
        Ok(worker_id)
    }

    /// Route a page request: through the worker if one is activated, else straight out.
    pub async fn handle_fetch(&self, request: &Request) -> Result<Response, NetError> {
        let controlled = self
            .registration
            .read()
            .await
            .as_ref()
            .is_some_and(ServiceWorkerRegistration::is_controlling);

        if controlled {
            self.worker.handle_fetch(request).await
        } else {
            self.network.fetch(request).await
        }
    }

    /// Whether a page at `page_url` falls under the registration's scope.
    pub async fn controls(&self, page_url: &Url) -> bool {
        self.registration
            .read()
            .await
            .as_ref()
            .is_some_and(|r| r.is_controlling() && r.in_scope(page_url))
    }

    /// Scope of the current registration.
    pub async fn registration_scope(&self) -> Option<Url> {
        self.registration.read().await.as_ref().map(|r| r.scope.clone())
    }

    /// State of the active worker.
    pub async fn active_state(&self) -> Option<ServiceWorkerState> {
        self.registration
            .read()
            .await
            .as_ref()
            .and_then(|r| r.get_active())
            .map(|w| w.state())
    }

    /// ID of the active worker.
    pub async fn active_id(&self) -> Option<ServiceWorkerId> {
        self.registration
            .read()
            .await
            .as_ref()
            .and_then(|r| r.get_active())
            .map(|w| w.id)
    }

    /// State of the waiting worker.
    pub async fn waiting_state(&self) -> Option<ServiceWorkerState> {
        self.registration
            .read()
            .await
            .as_ref()
            .and_then(|r| r.waiting.as_ref())
            .map(|w| w.state())
    }

    /// Drop the registration. Returns `false` if there was none.
    pub async fn unregister(&self) -> bool {
        match self.registration.write().await.take() {
            Some(mut registration) => {
                registration.unregister();
                info!(scope = %registration.scope, "Unregistered");
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl<S, N> ServiceWorkerHost for WorkerRuntime<S, N>
where
    S: CacheStorage,
    N: Network,
{
    fn supports_service_workers(&self) -> bool {
        true
    }

    async fn register(&self, script_path: &str) -> Result<RegistrationHandle, ServiceWorkerError> {
        let script_url = self
            .origin
            .join(script_path)
            .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?;
        self.check_secure(&script_url)?;

        let _job = self.job_lock.lock().await;
        debug!(script = %script_url, "Registering service worker");
        self.install_new_version(script_url).await
    }
}
