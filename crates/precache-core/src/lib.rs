//! precache-core - offline pre-caching of static application assets.
//!
//! An `OfflineCacheManager` populates a versioned cache store with a fixed
//! asset manifest on install, evicts stores from older versions on activate,
//! and answers GET requests cache-first with a network fallback and an
//! optional offline HTML page. A `Registration` sequences those phases the
//! way a service-worker host does.
//!
//! Storage and network access sit behind the `CacheStorage` and `Network`
//! traits so the policy runs unchanged against memory, disk or a test double.

pub mod config;
pub mod error;
pub mod http;
pub mod manager;
pub mod manifest;
pub mod network;
pub mod registration;
pub mod storage;

pub use config::{WorkerConfig, DEFAULT_OFFLINE_HTML};
pub use error::{CacheError, Result};
pub use http::{cache_key, Request, Response};
pub use manager::{
    missing_assets, ActivateReport, FetchOutcome, InstallReport, OfflineCacheManager,
    PassThroughReason, WorkerState,
};
pub use manifest::AssetManifest;
pub use network::{HttpNetwork, Network};
pub use registration::{ClientId, RegisterOutcome, Registration, RegistrationStatus};
pub use storage::{CacheStorage, DiskStorage, MemoryStorage};

// Re-exported so callers can build requests without depending on reqwest directly
pub use reqwest::header;
pub use reqwest::{Method, StatusCode};
pub use url::Url;
