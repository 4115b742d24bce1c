//! Cache storage backends.
//!
//! A `CacheStorage` holds any number of named cache stores, each mapping a
//! request URL (see [`crate::http::cache_key`]) to a response. Two backends
//! are provided:
//! - `MemoryStorage`: process-local, for tests and embedding
//! - `DiskStorage`: one directory per store, survives restarts

pub mod disk;
pub mod memory;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

use async_trait::async_trait;

use crate::error::Result;
use crate::http::Response;

#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open the named store, creating it if absent
    async fn open(&self, name: &str) -> Result<()>;

    async fn has(&self, name: &str) -> Result<bool>;

    /// Names of every store, in creation order
    async fn keys(&self) -> Result<Vec<String>>;

    /// Delete the named store. Returns false if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Store a response under `url` in an existing store
    async fn put(&self, name: &str, url: &str, response: &Response) -> Result<()>;

    async fn lookup(&self, name: &str, url: &str) -> Result<Option<Response>>;

    async fn entry_count(&self, name: &str) -> Result<usize>;

    /// Give store `from` the name `to`, replacing any store already called `to`.
    /// Readers of `to` see either the old store or the new one, never a mix.
    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    async fn put_all(&self, name: &str, entries: &[(String, Response)]) -> Result<()> {
        for (url, response) in entries {
            self.put(name, url, response).await?;
        }
        Ok(())
    }
}
