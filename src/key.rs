use sha2::{Digest, Sha256};

use crate::gate::SourceUrl;

/// SHA-256 fingerprint of a source URL, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key from the URL with its query pairs sorted and its fragment
    /// dropped, so `?a=1&b=2` and `?b=2&a=1` share an entry.
    pub fn for_source(source: &SourceUrl) -> Self {
        let mut url = source.url().clone();
        url.set_fragment(None);

        if url.query().is_some() {
            let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
            pairs.sort();
            if pairs.is_empty() {
                url.set_query(None);
            } else {
                url.query_pairs_mut().clear().extend_pairs(pairs);
            }
        }

        let mut hasher = Sha256::new();
        hasher.update(url.as_str().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn etag(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
