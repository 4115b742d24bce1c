//! Request and response values exchanged with the cache and the network.
//!
//! These mirror the small subset of the fetch API the cache policy needs:
//! a method, an absolute URL and headers on the way out, and a status,
//! headers and a body on the way back. The HTTP primitives themselves
//! (`Method`, `StatusCode`, `HeaderMap`) are the ones reqwest exposes.

use bytes::Bytes;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use url::Url;

use crate::error::{CacheError, Result};

/// Media type the offline fallback is served for and with
pub const HTML_CONTENT_TYPE: &str = "text/html";

/// An outgoing request as seen by the fetch interceptor.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Absolute URL. The fragment is kept so bypass markers stay visible.
    pub url: Url,
    pub headers: HeaderMap,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Parse an absolute URL string into a request
    pub fn parse(method: Method, url: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|source| CacheError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        Ok(Self::new(method, parsed))
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Shorthand for the `Accept` header a browser sends on navigations
    pub fn accepting_html(self) -> Self {
        self.with_header(
            header::ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,*/*;q=0.8"),
        )
    }

    /// Whether the declared acceptable content types include HTML.
    /// A missing or non-ASCII `Accept` header counts as "no".
    pub fn accepts_html(&self) -> bool {
        self.headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains(HTML_CONTENT_TYPE))
            .unwrap_or(false)
    }

    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }

    pub fn cache_key(&self) -> String {
        cache_key(&self.url)
    }
}

/// Key used to file a URL in a cache store: the absolute URL without its fragment.
pub fn cache_key(url: &Url) -> String {
    let mut keyed = url.clone();
    keyed.set_fragment(None);
    keyed.into()
}

/// A response held in a cache store or returned by the network.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// 200 response with no headers
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, HeaderMap::new(), body)
    }

    /// 200 response with `Content-Type: text/html`
    pub fn html(body: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(HTML_CONTENT_TYPE),
        );
        Self::new(StatusCode::OK, headers, body.into())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, Bytes) {
        (self.status, self.headers, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_strips_fragment() {
        let url = Url::parse("http://localhost:8080/app/index.html#dev").unwrap();
        assert_eq!(cache_key(&url), "http://localhost:8080/app/index.html");
    }

    #[test]
    fn test_accepts_html() {
        let req = Request::parse(Method::GET, "http://localhost/").unwrap();
        assert!(!req.accepts_html());

        let req = req.accepting_html();
        assert!(req.accepts_html());

        let json = Request::parse(Method::GET, "http://localhost/data")
            .unwrap()
            .with_header(header::ACCEPT, HeaderValue::from_static("application/json"));
        assert!(!json.accepts_html());
    }

    #[test]
    fn test_parse_rejects_relative_url() {
        let err = Request::parse(Method::GET, "./index.html").unwrap_err();
        assert!(matches!(err, CacheError::InvalidUrl { .. }));
    }

    #[test]
    fn test_html_response() {
        let resp = Response::html("<p>hi</p>");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.content_type(), Some("text/html"));
        assert_eq!(resp.body().as_ref(), b"<p>hi</p>");
    }
}
