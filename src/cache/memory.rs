use crate::cache::{CacheEntry, CacheError, CacheStats, ThumbnailCache};
use crate::key::CacheKey;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local cache. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ThumbnailCache for MemoryCache {
    async fn has(&self, key: &CacheKey) -> Result<bool, CacheError> {
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), CacheError> {
        self.entries.write().await.insert(key.clone(), entry.clone());
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = self.entries.read().await;
        Ok(CacheStats {
            backend: "memory",
            entry_count: entries.len(),
            total_size_bytes: entries.values().map(|e| e.bytes.len() as u64).sum(),
        })
    }
}
