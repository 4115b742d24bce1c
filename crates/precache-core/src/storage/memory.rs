use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::CacheStorage;
use crate::error::{CacheError, Result};
use crate::http::Response;

#[derive(Debug)]
struct NamedStore {
    name: String,
    entries: HashMap<String, Response>,
}

/// In-process cache storage. Stores live as long as the value does.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    // Vec keeps creation order for `keys()`
    stores: RwLock<Vec<NamedStore>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<()> {
        let mut stores = self.stores.write().await;
        if !stores.iter().any(|s| s.name == name) {
            stores.push(NamedStore {
                name: name.to_string(),
                entries: HashMap::new(),
            });
        }
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.stores.read().await.iter().any(|s| s.name == name))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .stores
            .read()
            .await
            .iter()
            .map(|s| s.name.clone())
            .collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut stores = self.stores.write().await;
        let before = stores.len();
        stores.retain(|s| s.name != name);
        Ok(stores.len() != before)
    }

    async fn put(&self, name: &str, url: &str, response: &Response) -> Result<()> {
        let mut stores = self.stores.write().await;
        let store = stores
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| CacheError::Storage(format!("No cache named '{}'", name)))?;
        store.entries.insert(url.to_string(), response.clone());
        Ok(())
    }

    async fn lookup(&self, name: &str, url: &str) -> Result<Option<Response>> {
        Ok(self
            .stores
            .read()
            .await
            .iter()
            .find(|s| s.name == name)
            .and_then(|s| s.entries.get(url).cloned()))
    }

    async fn entry_count(&self, name: &str) -> Result<usize> {
        Ok(self
            .stores
            .read()
            .await
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.entries.len())
            .unwrap_or(0))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut stores = self.stores.write().await;
        let idx = stores
            .iter()
            .position(|s| s.name == from)
            .ok_or_else(|| CacheError::Storage(format!("No cache named '{}'", from)))?;
        let mut store = stores.remove(idx);
        store.name = to.to_string();
        match stores.iter().position(|s| s.name == to) {
            Some(existing) => stores[existing] = store,
            None => stores.insert(idx, store),
        }
        Ok(())
    }

    async fn put_all(&self, name: &str, entries: &[(String, Response)]) -> Result<()> {
        // Single write lock so readers never observe half of the batch
        let mut stores = self.stores.write().await;
        let store = stores
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| CacheError::Storage(format!("No cache named '{}'", name)))?;
        for (url, response) in entries {
            store.entries.insert(url.clone(), response.clone());
        }
        Ok(())
    }
}
