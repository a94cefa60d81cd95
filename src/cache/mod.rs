// Re-export modules
pub mod disk;
pub mod memory;
pub mod sled_cache;

pub use disk::DiskCache;
pub use memory::MemoryCache;
pub use sled_cache::SledCache;

use crate::config::{CacheBackend, ImageFormat, ThumbConfig};
use crate::key::CacheKey;
use std::sync::Arc;
use crate::transform::TransformedImage;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Encoded thumbnail bytes and the format they were encoded in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
}

impl CacheEntry {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }
}

impl From<TransformedImage> for CacheEntry {
    fn from(img: TransformedImage) -> Self {
        Self { bytes: img.bytes, format: img.format }
    }
}

/// Statistics about a cache backend
#[derive(Debug, Default, Serialize)]
pub struct CacheStats {
    pub backend: &'static str,
    pub entry_count: usize,
    pub total_size_bytes: u64,
}

/// Store of transformed thumbnails keyed by source-URL fingerprint.
///
/// Entries are never expired by this crate. A backend is free to lose entries;
/// callers treat that as an ordinary miss.
#[async_trait::async_trait]
pub trait ThumbnailCache: Send + Sync {
    async fn has(&self, key: &CacheKey) -> Result<bool, CacheError>;

    /// `Ok(None)` on a miss.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Overwrites any existing entry.
    async fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), CacheError>;

    async fn stats(&self) -> Result<CacheStats, CacheError>;
}

/// Opens the backend selected by the configuration.
pub fn open(config: &ThumbConfig) -> Result<Arc<dyn ThumbnailCache>, CacheError> {
    let cache: Arc<dyn ThumbnailCache> = match config.cache_backend {
        CacheBackend::Sled => Arc::new(SledCache::new(&config.cache_dir)?),
        CacheBackend::Disk => Arc::new(DiskCache::new(config.cache_dir.clone())),
        CacheBackend::Memory => Arc::new(MemoryCache::new()),
    };
    tracing::info!("Opened {:?} thumbnail cache at {}", config.cache_backend, config.cache_dir.display());
    Ok(cache)
}
