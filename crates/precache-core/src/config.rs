//! Worker configuration.
//!
//! A `WorkerConfig` carries the cache identifier, the asset manifest and the
//! switches that select between the caching behaviours. It is threaded through
//! install, activate and fetch as a single value.
//!
//! Configuration is stored at `~/.config/precache/config.json` unless an
//! explicit path is given.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::CacheError;
use crate::manifest::AssetManifest;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "precache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_CACHE_NAME: &str = "precache-v1";

const DEFAULT_SCOPE: &str = "http://localhost:8080/";

/// Page served for HTML requests when neither the cache nor the network can answer
pub const DEFAULT_OFFLINE_HTML: &str = "<html><body><h1>App is offline</h1><p>Please check your internet connection.</p></body></html>";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Version-tagged identifier of the current cache generation
    pub cache_name: String,
    /// Absolute URL that manifest entries are resolved against
    pub scope: String,
    pub assets: AssetManifest,
    pub evict_stale_caches: bool,
    pub claim_clients_immediately: bool,
    pub skip_waiting: bool,
    pub offline_fallback_html: Option<String>,
    pub bypass_url_marker: Option<String>,
    /// Root directory of the on-disk cache stores
    pub storage_dir: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::offline_first(DEFAULT_CACHE_NAME, AssetManifest::new(["./", "./index.html"]))
    }
}

impl WorkerConfig {
    /// Every behaviour on: stale eviction, skip-waiting, claim and the offline page.
    pub fn offline_first(cache_name: impl Into<String>, assets: AssetManifest) -> Self {
        Self {
            cache_name: cache_name.into(),
            scope: DEFAULT_SCOPE.to_string(),
            assets,
            evict_stale_caches: true,
            claim_clients_immediately: true,
            skip_waiting: true,
            offline_fallback_html: Some(DEFAULT_OFFLINE_HTML.to_string()),
            bypass_url_marker: None,
            storage_dir: None,
        }
    }

    /// Plain pre-cache and cache-first serving, nothing else.
    pub fn minimal(cache_name: impl Into<String>, assets: AssetManifest) -> Self {
        Self {
            cache_name: cache_name.into(),
            scope: DEFAULT_SCOPE.to_string(),
            assets,
            evict_stale_caches: false,
            claim_clients_immediately: false,
            skip_waiting: false,
            offline_fallback_html: None,
            bypass_url_marker: None,
            storage_dir: None,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_bypass_marker(mut self, marker: impl Into<String>) -> Self {
        self.bypass_url_marker = Some(marker.into());
        self
    }

    /// Load from the default location, falling back to defaults when absent
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn storage_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.storage_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Parsed scope, always ending in `/` so that `./` names the scope itself
    pub fn scope_url(&self) -> crate::Result<Url> {
        let mut scope = self.scope.clone();
        if !scope.ends_with('/') {
            scope.push('/');
        }
        let url = Url::parse(&scope).map_err(|source| CacheError::InvalidUrl {
            url: self.scope.clone(),
            source,
        })?;
        if url.cannot_be_a_base() {
            return Err(CacheError::InvalidUrl {
                url: self.scope.clone(),
                source: url::ParseError::RelativeUrlWithCannotBeABaseBase,
            });
        }
        Ok(url)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_name.trim().is_empty() {
            anyhow::bail!("cache_name must not be empty");
        }
        let scope = self.scope_url().context("Invalid scope")?;
        self.assets
            .resolve(&scope)
            .context("Invalid asset manifest")?;
        if let Some(ref marker) = self.bypass_url_marker {
            if marker.is_empty() {
                anyhow::bail!("bypass_url_marker must not be empty when set");
            }
        }
        Ok(())
    }
}
