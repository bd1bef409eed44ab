//! Application state shared across request handlers.

use std::sync::Arc;
use std::time::Duration;

use fbox_events::NotificationBus;

use crate::store::EncryptedStore;
use crate::workers::Orchestrator;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<EncryptedStore>,
    orchestrator: Arc<Orchestrator>,
    bus: NotificationBus,
    worker_stop_timeout: Duration,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        store: Arc<EncryptedStore>,
        orchestrator: Arc<Orchestrator>,
        bus: NotificationBus,
        worker_stop_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                store,
                orchestrator,
                bus,
                worker_stop_timeout,
            }),
        }
    }

    /// The encrypted config store.
    pub fn store(&self) -> &Arc<EncryptedStore> {
        &self.inner.store
    }

    /// The worker orchestrator.
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.inner.orchestrator
    }

    /// The notification bus.
    pub fn bus(&self) -> &NotificationBus {
        &self.inner.bus
    }

    /// Graceful stop timeout applied to worker stop/restart requests.
    pub fn worker_stop_timeout(&self) -> Duration {
        self.inner.worker_stop_timeout
    }
}
