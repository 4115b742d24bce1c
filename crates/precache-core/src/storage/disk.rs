//! On-disk cache storage.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<sha256(name)[..32]>/cache.json        store descriptor (name, created_at)
//! <root>/<sha256(name)[..32]>/<sha256(url)>.json entry metadata (url, status, headers)
//! <root>/<sha256(name)[..32]>/<sha256(url)>.body entry body
//! ```
//!
//! Files are written to a temporary sibling and renamed into place. The
//! metadata file is written last, so an entry exists only once it is whole.
//! `rename` swaps whole store directories: the old directory is moved aside,
//! the new one moved into place, and the old one removed.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::CacheStorage;
use crate::error::{CacheError, Result};
use crate::http::Response;

/// Store descriptor file name inside each store directory
const DESCRIPTOR_FILE: &str = "cache.json";

const META_EXT: &str = "json";
const BODY_EXT: &str = "body";

/// Hex characters of the name digest used for store directory names
const STORE_DIR_LEN: usize = 32;

/// Suffix of a store directory moved aside while being replaced
const RETIRED_SUFFIX: &str = ".retired";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreDescriptor {
    name: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
    stored_at: DateTime<Utc>,
}

impl StoredEntry {
    fn from_response(url: &str, response: &Response) -> Self {
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        Self {
            url: url.to_string(),
            status: response.status().as_u16(),
            headers,
            stored_at: Utc::now(),
        }
    }

    fn into_response(self, body: Vec<u8>) -> Result<Response> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| CacheError::Storage(format!("Bad stored status for {}: {}", self.url, e)))?;
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                CacheError::Storage(format!("Bad stored header for {}: {}", self.url, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                CacheError::Storage(format!("Bad stored header for {}: {}", self.url, e))
            })?;
            headers.append(name, value);
        }
        Ok(Response::new(status, headers, body))
    }
}

/// Cache storage persisted under a root directory.
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn digest(value: &str) -> String {
        hex::encode(Sha256::digest(value.as_bytes()))
    }

    fn store_dir(&self, name: &str) -> PathBuf {
        let mut digest = Self::digest(name);
        digest.truncate(STORE_DIR_LEN);
        self.root.join(digest)
    }

    fn entry_paths(&self, name: &str, url: &str) -> (PathBuf, PathBuf) {
        let dir = self.store_dir(name);
        let stem = Self::digest(url);
        (
            dir.join(format!("{}.{}", stem, META_EXT)),
            dir.join(format!("{}.{}", stem, BODY_EXT)),
        )
    }

    async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn remove_dir_if_present(dir: &Path) -> Result<bool> {
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_descriptor(dir: &Path) -> Result<Option<StoreDescriptor>> {
        match Self::read_optional(&dir.join(DESCRIPTOR_FILE)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn require_store(&self, name: &str) -> Result<PathBuf> {
        let dir = self.store_dir(name);
        if Self::read_descriptor(&dir).await?.is_none() {
            return Err(CacheError::Storage(format!("No cache named '{}'", name)));
        }
        Ok(dir)
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<()> {
        let dir = self.store_dir(name);
        if Self::read_descriptor(&dir).await?.is_some() {
            return Ok(());
        }
        tokio::fs::create_dir_all(&dir).await?;
        let descriptor = StoreDescriptor {
            name: name.to_string(),
            created_at: Utc::now(),
        };
        Self::write_atomic(&dir.join(DESCRIPTOR_FILE), &serde_json::to_vec_pretty(&descriptor)?)
            .await?;
        debug!(cache = name, dir = %dir.display(), "Created cache store");
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(Self::read_descriptor(&self.store_dir(name)).await?.is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut descriptors = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let retired = entry
                .file_name()
                .to_str()
                .map(|n| n.ends_with(RETIRED_SUFFIX))
                .unwrap_or(false);
            if retired || !entry.file_type().await?.is_dir() {
                continue;
            }
            match Self::read_descriptor(&entry.path()).await {
                Ok(Some(descriptor)) => descriptors.push(descriptor),
                Ok(None) => {
                    debug!(dir = %entry.path().display(), "Skipping directory without descriptor");
                }
                Err(e) => {
                    debug!(dir = %entry.path().display(), error = %e, "Skipping unreadable store");
                }
            }
        }
        descriptors.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(descriptors.into_iter().map(|d| d.name).collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Self::remove_dir_if_present(&self.store_dir(name)).await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let src = self.require_store(from).await?;
        let dst = self.store_dir(to);
        let mut retired = dst.as_os_str().to_owned();
        retired.push(RETIRED_SUFFIX);
        let retired = PathBuf::from(retired);

        // Leftover from an interrupted replace
        Self::remove_dir_if_present(&retired).await?;

        let descriptor = StoreDescriptor {
            name: to.to_string(),
            created_at: Utc::now(),
        };
        Self::write_atomic(&src.join(DESCRIPTOR_FILE), &serde_json::to_vec_pretty(&descriptor)?)
            .await?;

        let had_old = match tokio::fs::rename(&dst, &retired).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = tokio::fs::rename(&src, &dst).await {
            if had_old {
                if let Err(restore) = tokio::fs::rename(&retired, &dst).await {
                    warn!(cache = to, error = %restore, "Failed to restore replaced store");
                }
            }
            return Err(e.into());
        }

        if had_old {
            if let Err(e) = Self::remove_dir_if_present(&retired).await {
                warn!(cache = to, error = %e, "Failed to remove replaced store");
            }
        }
        debug!(from = from, to = to, "Renamed cache store");
        Ok(())
    }

    async fn put(&self, name: &str, url: &str, response: &Response) -> Result<()> {
        self.require_store(name).await?;
        let (meta_path, body_path) = self.entry_paths(name, url);
        let meta = StoredEntry::from_response(url, response);

        Self::write_atomic(&body_path, response.body()).await?;
        Self::write_atomic(&meta_path, &serde_json::to_vec_pretty(&meta)?).await?;
        Ok(())
    }

    async fn lookup(&self, name: &str, url: &str) -> Result<Option<Response>> {
        let (meta_path, body_path) = self.entry_paths(name, url);
        let meta = match Self::read_optional(&meta_path).await? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let meta: StoredEntry = serde_json::from_slice(&meta)?;
        if meta.url != url {
            // Digest collision; treat as absent rather than serve the wrong asset
            return Ok(None);
        }
        let body = Self::read_optional(&body_path)
            .await?
            .ok_or_else(|| CacheError::Storage(format!("Missing body for cached {}", url)))?;
        meta.into_response(body).map(Some)
    }

    async fn entry_count(&self, name: &str) -> Result<usize> {
        let dir = self.store_dir(name);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_meta = path.extension().and_then(|e| e.to_str()) == Some(META_EXT);
            let is_descriptor = path.file_name().and_then(|n| n.to_str()) == Some(DESCRIPTOR_FILE);
            if is_meta && !is_descriptor {
                count += 1;
            }
        }
        Ok(count)
    }
}
