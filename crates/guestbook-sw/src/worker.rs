//! Worker versions and the registration that holds them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::{trace, warn};
use url::Url;

use crate::ServiceWorkerError;

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceWorkerState {
    /// Initial state, script parsed.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

impl ServiceWorkerState {
    /// Script-visible name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceWorkerState::Parsed => "parsed",
            ServiceWorkerState::Installing => "installing",
            ServiceWorkerState::Installed => "installed",
            ServiceWorkerState::Activating => "activating",
            ServiceWorkerState::Activated => "activated",
            ServiceWorkerState::Redundant => "redundant",
        }
    }

    /// Whether the host may move a worker from `self` to `next`.
    pub fn can_transition_to(&self, next: ServiceWorkerState) -> bool {
        use ServiceWorkerState::*;
        matches!(
            (self, next),
            (Parsed, Installing)
                | (Installing, Installed)
                | (Installing, Redundant)
                | (Installed, Activating)
                | (Installed, Redundant)
                | (Activating, Activated)
                | (Activating, Redundant)
                | (Activated, Redundant)
        )
    }
}

impl std::fmt::Display for ServiceWorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==================== Service Worker ====================

/// One version of the worker script.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// Script URL.
    pub script_url: Url,

    state: ServiceWorkerState,

    /// Error message if install failed.
    pub error: Option<String>,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    /// Create a new service worker.
    pub fn new(script_url: Url) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            script_url,
            state: ServiceWorkerState::Parsed,
            error: None,
            state_changed_at: Instant::now(),
        }
    }

    /// Current state.
    pub fn state(&self) -> ServiceWorkerState {
        self.state
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: ServiceWorkerState) -> Result<(), ServiceWorkerError> {
        if !self.state.can_transition_to(next) {
            return Err(ServiceWorkerError::StateError(format!(
                "{} cannot go from {} to {}",
                self.id, self.state, next
            )));
        }
        trace!(worker = %self.id, from = %self.state, to = %next, "Worker state change");
        self.state = next;
        self.state_changed_at = Instant::now();
        Ok(())
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }

    fn make_redundant(&mut self) {
        if self.is_redundant() {
            return;
        }
        if let Err(e) = self.transition(ServiceWorkerState::Redundant) {
            warn!(worker = %self.id, error = %e, "Worker could not be discarded");
        }
    }
}

// ==================== Registration ====================

/// A service worker registration.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<ServiceWorker>,

    /// Active worker (activating or activated).
    pub active: Option<ServiceWorker>,
}

impl ServiceWorkerRegistration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    /// Default scope for a script: the directory it is served from.
    pub fn default_scope(script_url: &Url) -> Url {
        let mut scope = script_url.clone();
        let dir = script_url
            .path()
            .rsplit_once('/')
            .map(|(dir, _)| format!("{dir}/"))
            .unwrap_or_else(|| "/".to_string());
        scope.set_path(&dir);
        scope.set_query(None);
        scope.set_fragment(None);
        scope
    }

    /// Whether a page URL falls inside the scope.
    pub fn in_scope(&self, url: &Url) -> bool {
        url.as_str().starts_with(self.scope.as_str())
    }

    /// Get the active worker.
    pub fn get_active(&self) -> Option<&ServiceWorker> {
        self.active.as_ref()
    }

    /// Whether an activated worker controls this registration's pages.
    pub fn is_controlling(&self) -> bool {
        self.active.as_ref().is_some_and(ServiceWorker::is_active)
    }

    /// Start installing a new version. A version still installing is replaced.
    pub fn update(&mut self, script_url: Url) -> Result<ServiceWorkerId, ServiceWorkerError> {
        if let Some(mut stale) = self.installing.take() {
            stale.make_redundant();
        }
        let mut worker = ServiceWorker::new(script_url);
        worker.transition(ServiceWorkerState::Installing)?;
        let id = worker.id;
        self.installing = Some(worker);
        Ok(id)
    }

    /// Transition installing to waiting.
    pub fn install_complete(&mut self, id: ServiceWorkerId) -> Result<(), ServiceWorkerError> {
        let mut worker = self.take_installing(id)?;
        worker.transition(ServiceWorkerState::Installed)?;
        if let Some(mut previous) = self.waiting.replace(worker) {
            previous.make_redundant();
        }
        Ok(())
    }

    /// Discard a version whose install step failed. The active worker stays.
    pub fn install_failed(
        &mut self,
        id: ServiceWorkerId,
        error: impl Into<String>,
    ) -> Result<ServiceWorker, ServiceWorkerError> {
        let mut worker = self.take_installing(id)?;
        worker.error = Some(error.into());
        worker.transition(ServiceWorkerState::Redundant)?;
        Ok(worker)
    }

    /// Promote the waiting worker to `active` in the activating state.
    ///
    /// The previous active worker becomes redundant.
    pub fn begin_activation(&mut self) -> Result<ServiceWorkerId, ServiceWorkerError> {
        let mut worker = self
            .waiting
            .take()
            .ok_or_else(|| ServiceWorkerError::StateError("no waiting worker".to_string()))?;
        worker.transition(ServiceWorkerState::Activating)?;

        if let Some(mut old) = self.active.take() {
            old.make_redundant();
        }

        let id = worker.id;
        self.active = Some(worker);
        Ok(id)
    }

    /// Mark the activating worker as activated.
    pub fn finish_activation(&mut self, id: ServiceWorkerId) -> Result<(), ServiceWorkerError> {
        match self.active.as_mut() {
            Some(worker) if worker.id == id => worker.transition(ServiceWorkerState::Activated),
            _ => Err(ServiceWorkerError::NotFound(format!("activating worker {id}"))),
        }
    }

    /// Unregister (mark every version redundant).
    pub fn unregister(&mut self) {
        for worker in [
            self.active.take(),
            self.waiting.take(),
            self.installing.take(),
        ]
        .into_iter()
        .flatten()
        {
            let mut worker = worker;
            worker.make_redundant();
            trace!(worker = %worker.id, "Unregistered");
        }
    }

    fn take_installing(&mut self, id: ServiceWorkerId) -> Result<ServiceWorker, ServiceWorkerError> {
        match self.installing.take() {
            Some(worker) if worker.id == id => Ok(worker),
            other => {
                self.installing = other;
                Err(ServiceWorkerError::NotFound(format!("installing worker {id}")))
            }
        }
    }
}
