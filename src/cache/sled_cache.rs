use crate::cache::{CacheEntry, CacheError, CacheStats, ThumbnailCache};
use crate::config::ImageFormat;
use crate::key::CacheKey;
use serde::{Deserialize, Serialize};
use sled::Db;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Metadata stored alongside cached thumbnails
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CacheMetadata {
    pub key: String,
    pub format: ImageFormat,
    pub size: usize,
    pub created_at: u64,
}

/// Sled-backed thumbnail cache
///
/// This cache provides:
/// - Persistent storage across restarts
/// - Atomic data + metadata writes via a batch
/// - Metadata for statistics and debugging
/// - Pure Rust (no C++ compilation needed)
pub struct SledCache {
    db: Db,
}

impl SledCache {
    /// Open (or create) the database under `path`
    pub fn new(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// In-memory database that is discarded on drop
    pub fn temporary() -> Result<Self, CacheError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn metadata_key(key: &CacheKey) -> String {
        format!("meta:{}", key)
    }

    fn data_key(key: &CacheKey) -> String {
        format!("data:{}", key)
    }

    fn read_metadata(&self, key: &CacheKey) -> Result<Option<CacheMetadata>, CacheError> {
        match self.db.get(Self::metadata_key(key).as_bytes())? {
            Some(raw) => match serde_json::from_slice::<CacheMetadata>(&raw) {
                Ok(meta) => Ok(Some(meta)),
                Err(e) => {
                    tracing::warn!("Unreadable cache metadata for key={}: {}", key, e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl ThumbnailCache for SledCache {
    async fn has(&self, key: &CacheKey) -> Result<bool, CacheError> {
        Ok(self.db.contains_key(Self::data_key(key).as_bytes())?)
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let data = match self.db.get(Self::data_key(key).as_bytes())? {
            Some(d) => d.to_vec(),
            None => return Ok(None),
        };

        // Older or damaged entries may lack metadata; the bytes carry their own format
        let format = match self.read_metadata(key)? {
            Some(meta) => Some(meta.format),
            None => ImageFormat::sniff(&data),
        };

        match format {
            Some(format) => Ok(Some(CacheEntry { bytes: data, format })),
            None => {
                tracing::warn!("Cache entry key={} has no recognizable format, ignoring", key);
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), CacheError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let metadata = CacheMetadata {
            key: key.to_string(),
            format: entry.format,
            size: entry.bytes.len(),
            created_at: now,
        };

        let mut batch = sled::Batch::default();
        batch.insert(Self::data_key(key).as_bytes(), entry.bytes.as_slice());
        batch.insert(Self::metadata_key(key).as_bytes(), serde_json::to_vec(&metadata)?);
        self.db.apply_batch(batch)?;

        // Flush to disk
        self.db.flush()?;

        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats { backend: "sled", ..CacheStats::default() };

        for item in self.db.scan_prefix("meta:") {
            let (_, value) = item?;
            if let Ok(meta) = serde_json::from_slice::<CacheMetadata>(&value) {
                stats.entry_count += 1;
                stats.total_size_bytes += meta.size as u64;
            }
        }

        Ok(stats)
    }
}
