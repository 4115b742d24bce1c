//! The offline cache manager.
//!
//! One manager is one worker version: it owns the cache identifier from its
//! `WorkerConfig` and runs the three lifecycle phases against it.
//!
//! - install: fetch every manifest asset and store the lot, or nothing
//! - activate: delete cache stores left behind by other versions
//! - fetch: cache-first lookup, then network, then the offline page

use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::WorkerConfig;
use crate::error::{CacheError, Result};
use crate::http::{cache_key, Request, Response};
use crate::network::Network;
use crate::storage::CacheStorage;

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of manifest assets fetched at once during install.
const MAX_CONCURRENT_FETCHES: usize = 8;

/// Suffix of the store an install writes into before it replaces the current one
const STAGING_SUFFIX: &str = ".staging";

fn staging_name(cache: &str) -> String {
    format!("{}{}", cache, STAGING_SUFFIX)
}

/// Assets from `assets` that have no entry in the store `cache`, in order
pub async fn missing_assets<S: CacheStorage + ?Sized>(
    storage: &S,
    cache: &str,
    assets: &[Url],
) -> Result<Vec<Url>> {
    let mut missing = Vec::new();
    for url in assets {
        if storage.lookup(cache, &cache_key(url)).await?.is_none() {
            missing.push(url.clone());
        }
    }
    Ok(missing)
}

// ============================================================================
// Lifecycle types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Created, not yet installed (or a previous install failed)
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    /// Superseded by another version
    Redundant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub cache_name: String,
    pub entries: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
    pub kept: String,
    pub evicted: Vec<String>,
    /// Stale stores that could not be deleted
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassThroughReason {
    /// Only GET is intercepted
    Method,
    /// URL carries the configured bypass marker
    Bypass,
}

/// What fetch interception decided for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Not intercepted; the host sends the request to the network unmodified
    PassThrough(PassThroughReason),
    Cached(Response),
    Network(Response),
    OfflineFallback(Response),
    /// Cache miss and network failure with no fallback content
    Unavailable,
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Cached(r) | FetchOutcome::Network(r) | FetchOutcome::OfflineFallback(r) => {
                Some(r)
            }
            FetchOutcome::PassThrough(_) | FetchOutcome::Unavailable => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            FetchOutcome::Cached(r) | FetchOutcome::Network(r) | FetchOutcome::OfflineFallback(r) => {
                Some(r)
            }
            FetchOutcome::PassThrough(_) | FetchOutcome::Unavailable => None,
        }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, FetchOutcome::PassThrough(_))
    }
}

// ============================================================================
// Manager
// ============================================================================

pub struct OfflineCacheManager<S, N> {
    config: Arc<WorkerConfig>,
    scope: Url,
    assets: Vec<Url>,
    storage: Arc<S>,
    network: Arc<N>,
    state: Mutex<WorkerState>,
}

impl<S: CacheStorage, N: Network> OfflineCacheManager<S, N> {
    pub fn new(config: Arc<WorkerConfig>, storage: Arc<S>, network: Arc<N>) -> Result<Self> {
        let scope = config.scope_url()?;
        let assets = config.assets.resolve(&scope)?;
        Ok(Self {
            config,
            scope,
            assets,
            storage,
            network,
            state: Mutex::new(WorkerState::Parsed),
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn cache_name(&self) -> &str {
        &self.config.cache_name
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    /// Manifest entries resolved against the scope, in manifest order
    pub fn assets(&self) -> &[Url] {
        &self.assets
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Move from `from` to `to`, or fail if the worker is elsewhere
    fn transition(&self, from: WorkerState, to: WorkerState) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != from {
            return Err(CacheError::InvalidState(format!(
                "worker '{}' is {:?}, expected {:?}",
                self.config.cache_name, *state, from
            )));
        }
        *state = to;
        Ok(())
    }

    pub(crate) fn mark_redundant(&self) {
        self.set_state(WorkerState::Redundant);
    }

    // ===== Install =====

    /// Populate the current cache store with every manifest asset.
    ///
    /// All-or-nothing: assets are written into a staging store that only
    /// replaces the current one once it is complete. On failure the current
    /// store is left exactly as it was and the worker returns to `Parsed`,
    /// so install can simply be retried.
    pub async fn install(&self) -> Result<InstallReport> {
        self.transition(WorkerState::Parsed, WorkerState::Installing)?;
        info!(cache = %self.config.cache_name, assets = self.assets.len(), "Installing");

        match self.populate().await {
            Ok(report) => {
                self.set_state(WorkerState::Installed);
                info!(
                    cache = %report.cache_name,
                    entries = report.entries,
                    bytes = report.bytes,
                    "Install complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.set_state(WorkerState::Parsed);
                warn!(cache = %self.config.cache_name, error = %e, "Install failed");
                Err(e)
            }
        }
    }

    async fn populate(&self) -> Result<InstallReport> {
        let cache = self.config.cache_name.as_str();
        let staging = staging_name(cache);

        let fetched = self.fetch_assets().await?;
        let bytes = fetched.iter().map(|(_, r)| r.body().len() as u64).sum();

        // Leftover from an interrupted install
        self.storage.delete(&staging).await?;
        self.storage.open(&staging).await?;

        let staged = match self.storage.put_all(&staging, &fetched).await {
            Ok(()) => self.storage.rename(&staging, cache).await,
            Err(e) => Err(e),
        };
        if let Err(e) = staged {
            self.discard(&staging).await;
            return Err(e);
        }

        Ok(InstallReport {
            cache_name: cache.to_string(),
            entries: fetched.len(),
            bytes,
        })
    }

    /// Fetch all manifest assets. Stops at the first failure.
    async fn fetch_assets(&self) -> Result<Vec<(String, Response)>> {
        let network = &self.network;
        let cache = &self.config.cache_name;

        stream::iter(self.assets.iter().cloned())
            .map(|url| async move {
                let key = cache_key(&url);
                let request = Request::get(url);
                let fetched = network.fetch(&request).await.and_then(|response| {
                    if response.is_success() {
                        Ok(response)
                    } else {
                        Err(CacheError::BadStatus {
                            url: key.clone(),
                            status: response.status().as_u16(),
                        })
                    }
                });
                match fetched {
                    Ok(response) => {
                        debug!(cache = %cache, url = %key, "Fetched asset");
                        Ok((key, response))
                    }
                    Err(source) => Err(CacheError::Install {
                        cache: cache.clone(),
                        url: key,
                        source: Box::new(source),
                    }),
                }
            })
            .buffered(MAX_CONCURRENT_FETCHES)
            .try_collect()
            .await
    }

    async fn discard(&self, cache: &str) {
        match self.storage.delete(cache).await {
            Ok(_) => debug!(cache = cache, "Discarded staging cache"),
            Err(e) => warn!(cache = cache, error = %e, "Failed to discard staging cache"),
        }
    }

    /// Take over a store that a previous run already populated.
    ///
    /// Returns false (and leaves the worker `Parsed`) unless every manifest
    /// asset is present under this worker's cache identifier.
    pub async fn adopt_existing(&self) -> Result<bool> {
        let cache = self.config.cache_name.as_str();
        if self.state() != WorkerState::Parsed || !self.storage.has(cache).await? {
            return Ok(false);
        }
        let missing = missing_assets(self.storage.as_ref(), cache, &self.assets).await?;
        if let Some(url) = missing.first() {
            debug!(cache = cache, url = %url, missing = missing.len(), "Existing cache incomplete");
            return Ok(false);
        }
        self.transition(WorkerState::Parsed, WorkerState::Installed)?;
        info!(cache = cache, "Adopted existing cache");
        Ok(true)
    }

    // ===== Activate =====

    /// Delete every cache store other than the current one (when enabled).
    /// Failures to enumerate or delete are logged and reported, never raised.
    pub async fn activate(&self) -> Result<ActivateReport> {
        self.transition(WorkerState::Installed, WorkerState::Activating)?;
        let current = self.config.cache_name.clone();
        let mut report = ActivateReport {
            kept: current.clone(),
            ..Default::default()
        };

        if self.config.evict_stale_caches {
            match self.storage.keys().await {
                Ok(keys) => {
                    let stale: Vec<String> = keys.into_iter().filter(|k| *k != current).collect();
                    let results =
                        futures::future::join_all(stale.iter().map(|k| self.storage.delete(k)))
                            .await;
                    for (key, result) in stale.into_iter().zip(results) {
                        match result {
                            Ok(_) => {
                                info!(cache = %key, "Evicted stale cache");
                                report.evicted.push(key);
                            }
                            Err(e) => {
                                warn!(cache = %key, error = %e, "Failed to delete stale cache");
                                report.failed.push(key);
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to enumerate caches, skipping eviction");
                }
            }
        }

        self.set_state(WorkerState::Activated);
        info!(cache = %current, evicted = report.evicted.len(), "Activated");
        Ok(report)
    }

    // ===== Fetch =====

    /// Decide how to answer one intercepted request.
    pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
        if !request.is_get() {
            debug!(method = %request.method, url = %request.url, "Not intercepting non-GET");
            return FetchOutcome::PassThrough(PassThroughReason::Method);
        }

        // An empty marker would match every URL, so it counts as unset
        if let Some(marker) = self.config.bypass_url_marker.as_deref().filter(|m| !m.is_empty()) {
            if request.url.as_str().contains(marker) {
                debug!(url = %request.url, "Bypass marker present, skipping cache");
                return FetchOutcome::PassThrough(PassThroughReason::Bypass);
            }
        }

        let key = request.cache_key();
        match self.storage.lookup(&self.config.cache_name, &key).await {
            Ok(Some(response)) => {
                debug!(url = %key, "Cache hit");
                return FetchOutcome::Cached(response);
            }
            Ok(None) => debug!(url = %key, "Cache miss"),
            Err(e) => warn!(url = %key, error = %e, "Cache lookup failed, treating as miss"),
        }

        match self.network.fetch(request).await {
            Ok(response) => FetchOutcome::Network(response),
            Err(e) => {
                debug!(url = %key, error = %e, "Network failed after cache miss");
                match self.config.offline_fallback_html {
                    Some(ref html) if request.accepts_html() => {
                        FetchOutcome::OfflineFallback(Response::html(html.clone()))
                    }
                    _ => FetchOutcome::Unavailable,
                }
            }
        }
    }

    /// Look up a URL, relative to the scope, in the current store
    pub async fn match_url(&self, url: &str) -> Result<Option<Response>> {
        let resolved = self.scope.join(url).map_err(|source| CacheError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        self.storage
            .lookup(&self.config.cache_name, &cache_key(&resolved))
            .await
    }
}

// ============================================================================
// Tests
// ============================================================================
