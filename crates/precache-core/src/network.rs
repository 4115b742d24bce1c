//! Network access for cache misses, pass-through requests and install.
//!
//! `Network` is the fetch primitive the cache manager consumes. A transport
//! failure is an `Err`; an HTTP error status is still a response, exactly as a
//! browser's fetch resolves on a 404.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::http::{cache_key, Request, Response};

/// HTTP request timeout in seconds.
/// 30s allows for large wasm bundles on slow links while still failing eventually.
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Network backed by reqwest.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpNetwork {
    client: Client,
}

impl HttpNetwork {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client })
    }

    /// Share an existing client and its connection pool
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        // Fragments never go on the wire
        let url = cache_key(&request.url);
        debug!(method = %request.method, url = %url, "Network fetch");

        let response = self
            .client
            .request(request.method.clone(), &url)
            .headers(request.headers.clone())
            .send()
            .await
            .map_err(|e| CacheError::network(url.clone(), e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| CacheError::network(url.clone(), e.to_string()))?;

        Ok(Response::new(status, headers, body))
    }
}
