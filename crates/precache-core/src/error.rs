use thiserror::Error;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} for {url}")]
    BadStatus { url: String, status: u16 },

    #[error("Install of cache '{cache}' failed on {url}: {source}")]
    Install {
        cache: String,
        url: String,
        #[source]
        source: Box<CacheError>,
    },

    #[error("Duplicate asset in manifest: {0}")]
    DuplicateAsset(String),

    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid lifecycle state: {0}")]
    InvalidState(String),
}

/// Maximum length for reasons carried in error messages
const MAX_REASON_LENGTH: usize = 300;

impl CacheError {
    /// Build a network error, truncating overly long reasons
    pub fn network(url: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let reason = if reason.len() <= MAX_REASON_LENGTH {
            reason
        } else {
            let mut cut = MAX_REASON_LENGTH;
            while !reason.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &reason[..cut], reason.len())
        };
        CacheError::Network {
            url: url.into(),
            reason,
        }
    }

    /// True when the error came from the transport rather than the store
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            CacheError::Network { .. } | CacheError::Http(_) | CacheError::BadStatus { .. }
        )
    }
}
