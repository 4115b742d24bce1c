//! The build-time list of assets that must be cached on install.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{CacheError, Result};
use crate::http::cache_key;

/// Ordered list of asset URLs, relative to the worker scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetManifest {
    entries: Vec<String>,
}

impl AssetManifest {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(Into::into).collect(),
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve every entry against `scope`, preserving order.
    ///
    /// Two entries that land on the same cache key are rejected, the same
    /// way a host's add-all refuses duplicate requests.
    pub fn resolve(&self, scope: &Url) -> Result<Vec<Url>> {
        let mut seen = HashSet::with_capacity(self.entries.len());
        let mut resolved = Vec::with_capacity(self.entries.len());

        for entry in &self.entries {
            let url = scope.join(entry).map_err(|source| CacheError::InvalidUrl {
                url: entry.clone(),
                source,
            })?;
            if !seen.insert(cache_key(&url)) {
                return Err(CacheError::DuplicateAsset(entry.clone()));
            }
            resolved.push(url);
        }

        Ok(resolved)
    }
}

impl<S: Into<String>> FromIterator<S> for AssetManifest {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Url {
        Url::parse("http://localhost:8080/app/").unwrap()
    }

    #[test]
    fn test_resolve_keeps_order() {
        let manifest = AssetManifest::new(["./", "./index.html", "./app.wasm"]);
        let urls: Vec<String> = manifest
            .resolve(&scope())
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            urls,
            vec![
                "http://localhost:8080/app/",
                "http://localhost:8080/app/index.html",
                "http://localhost:8080/app/app.wasm",
            ]
        );
    }

    #[test]
    fn test_resolve_rejects_duplicates() {
        let manifest = AssetManifest::new(["./index.html", "index.html"]);
        let err = manifest.resolve(&scope()).unwrap_err();
        assert!(matches!(err, CacheError::DuplicateAsset(ref e) if e == "index.html"));
    }

    #[test]
    fn test_fragment_only_difference_is_duplicate() {
        let manifest = AssetManifest::new(["./index.html", "./index.html#top"]);
        assert!(manifest.resolve(&scope()).is_err());
    }

    #[test]
    fn test_deserializes_from_plain_array() {
        let manifest: AssetManifest = serde_json::from_str(r#"["./", "./a.js"]"#).unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.entries()[1], "./a.js");
    }
}
