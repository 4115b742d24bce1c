//! Host-side lifecycle for offline cache workers.
//!
//! A `Registration` plays the role the browser plays for a service worker:
//! it installs new versions, decides when they activate, keeps track of which
//! version controls each client, and routes client fetches to that version.
//!
//! Ordering:
//! - install and activate run one at a time under the lifecycle lock
//! - a version only becomes active after its activate phase has finished
//! - a failed install leaves the previous active version in control
//! - fetches only take read locks and run concurrently with each other

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::WorkerConfig;
use crate::error::{CacheError, Result};
use crate::http::{Request, Response};
use crate::manager::{ActivateReport, FetchOutcome, InstallReport, OfflineCacheManager};
use crate::network::Network;
use crate::storage::CacheStorage;

/// Identifies a page/tab talking to the registration
pub type ClientId = u64;

type Worker<S, N> = Arc<OfflineCacheManager<S, N>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Installed and activated straight away
    Activated {
        install: InstallReport,
        activate: ActivateReport,
    },
    /// Installed; waits for the old version's clients to go away
    Waiting { install: InstallReport },
    /// A complete store from an earlier run was adopted without refetching
    Resumed { activate: ActivateReport },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationStatus {
    pub active: Option<String>,
    pub waiting: Option<String>,
    pub clients: usize,
}

pub struct Registration<S, N> {
    storage: Arc<S>,
    network: Arc<N>,
    lifecycle: Mutex<()>,
    active: RwLock<Option<Worker<S, N>>>,
    waiting: RwLock<Option<Worker<S, N>>>,
    clients: RwLock<HashMap<ClientId, Option<Worker<S, N>>>>,
    next_client: AtomicU64,
}

impl<S: CacheStorage, N: Network> Registration<S, N> {
    pub fn new(storage: Arc<S>, network: Arc<N>) -> Self {
        Self {
            storage,
            network,
            lifecycle: Mutex::new(()),
            active: RwLock::new(None),
            waiting: RwLock::new(None),
            clients: RwLock::new(HashMap::new()),
            next_client: AtomicU64::new(1),
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    fn build(&self, config: WorkerConfig) -> Result<Worker<S, N>> {
        Ok(Arc::new(OfflineCacheManager::new(
            Arc::new(config),
            Arc::clone(&self.storage),
            Arc::clone(&self.network),
        )?))
    }

    /// Install a new worker version and activate it when allowed.
    pub async fn register(&self, config: WorkerConfig) -> Result<RegisterOutcome> {
        let _lifecycle = self.lifecycle.lock().await;
        let worker = self.build(config)?;
        self.install_locked(worker).await
    }

    /// After a restart: adopt the configured version's store if it is already
    /// complete, otherwise install it like `register`.
    pub async fn resume(&self, config: WorkerConfig) -> Result<RegisterOutcome> {
        let _lifecycle = self.lifecycle.lock().await;
        let worker = self.build(config)?;

        if worker.adopt_existing().await? {
            let activate = self.promote(Arc::clone(&worker)).await?;
            return Ok(RegisterOutcome::Resumed { activate });
        }

        self.install_locked(worker).await
    }

    async fn install_locked(&self, worker: Worker<S, N>) -> Result<RegisterOutcome> {
        // On failure the active version is untouched
        let install = worker.install().await?;

        if let Some(previous) = self.waiting.write().await.take() {
            debug!(cache = previous.cache_name(), "Replacing waiting worker");
            previous.mark_redundant();
        }

        if self.may_activate_now(&worker).await {
            let activate = self.promote(worker).await?;
            Ok(RegisterOutcome::Activated { install, activate })
        } else {
            info!(cache = worker.cache_name(), "Installed, waiting for clients to close");
            *self.waiting.write().await = Some(worker);
            Ok(RegisterOutcome::Waiting { install })
        }
    }

    async fn may_activate_now(&self, worker: &Worker<S, N>) -> bool {
        if worker.config().skip_waiting {
            return true;
        }
        let active = self.active.read().await;
        match active.as_ref() {
            None => true,
            Some(current) => !self.controls_any_client(current).await,
        }
    }

    async fn controls_any_client(&self, worker: &Worker<S, N>) -> bool {
        self.clients
            .read()
            .await
            .values()
            .flatten()
            .any(|controller| Arc::ptr_eq(controller, worker))
    }

    /// Run the activate phase, then make the worker the active version.
    /// Caller holds the lifecycle lock.
    async fn promote(&self, worker: Worker<S, N>) -> Result<ActivateReport> {
        let report = worker.activate().await?;

        let previous = self.active.write().await.replace(Arc::clone(&worker));
        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, &worker) {
                previous.mark_redundant();
            }
        }

        if worker.config().claim_clients_immediately {
            let mut clients = self.clients.write().await;
            for controller in clients.values_mut() {
                *controller = Some(Arc::clone(&worker));
            }
            debug!(cache = worker.cache_name(), clients = clients.len(), "Claimed clients");
        }

        Ok(report)
    }

    // ===== Clients =====

    /// Attach a new client. It is controlled by the active version, if any.
    pub async fn connect_client(&self) -> ClientId {
        let id = self.next_client.fetch_add(1, Ordering::Relaxed);
        let controller = self.active.read().await.clone();
        self.clients.write().await.insert(id, controller);
        id
    }

    /// Detach a client. When this releases the last client of the active
    /// version, a waiting version is activated and its report returned.
    pub async fn disconnect_client(&self, id: ClientId) -> Result<Option<ActivateReport>> {
        if self.clients.write().await.remove(&id).is_none() {
            return Err(CacheError::InvalidState(format!("Unknown client {}", id)));
        }

        let _lifecycle = self.lifecycle.lock().await;
        if self.waiting.read().await.is_none() {
            return Ok(None);
        }
        let still_controlled = match self.active.read().await.as_ref() {
            Some(active) => self.controls_any_client(active).await,
            None => false,
        };
        if still_controlled {
            return Ok(None);
        }

        let waiting = self.waiting.write().await.take();
        match waiting {
            Some(worker) => {
                info!(cache = worker.cache_name(), "Old clients gone, activating waiting worker");
                self.promote(worker).await.map(Some)
            }
            None => Ok(None),
        }
    }

    /// Cache identifier of the version controlling `id`
    pub async fn controller(&self, id: ClientId) -> Option<String> {
        self.clients
            .read()
            .await
            .get(&id)
            .and_then(|c| c.as_ref().map(|w| w.cache_name().to_string()))
    }

    // ===== Fetch =====

    /// Route a client's request through its controlling version.
    ///
    /// `Ok(None)` is the empty response produced when neither the cache nor
    /// the network could answer and no fallback applies.
    pub async fn fetch(&self, client: ClientId, request: Request) -> Result<Option<Response>> {
        let controller = self
            .clients
            .read()
            .await
            .get(&client)
            .cloned()
            .ok_or_else(|| CacheError::InvalidState(format!("Unknown client {}", client)))?;

        let Some(worker) = controller else {
            return self.network.fetch(&request).await.map(Some);
        };

        match worker.handle_fetch(&request).await {
            FetchOutcome::PassThrough(reason) => {
                debug!(?reason, url = %request.url, "Forwarding to network");
                self.network.fetch(&request).await.map(Some)
            }
            outcome => Ok(outcome.into_response()),
        }
    }

    // ===== Introspection =====

    pub async fn active_cache(&self) -> Option<String> {
        self.active
            .read()
            .await
            .as_ref()
            .map(|w| w.cache_name().to_string())
    }

    pub async fn status(&self) -> RegistrationStatus {
        RegistrationStatus {
            active: self.active_cache().await,
            waiting: self
                .waiting
                .read()
                .await
                .as_ref()
                .map(|w| w.cache_name().to_string()),
            clients: self.clients.read().await.len(),
        }
    }
}
