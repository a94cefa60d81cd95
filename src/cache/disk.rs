use crate::cache::{CacheEntry, CacheError, CacheStats, ThumbnailCache};
use crate::config::ImageFormat;
use crate::key::CacheKey;
use std::io::Write;
use std::path::PathBuf;
use tokio::fs;

const FORMATS: [ImageFormat; 4] = [ImageFormat::png, ImageFormat::jpeg, ImageFormat::gif, ImageFormat::webp];

/// One file per entry, named `{key}.{ext}`; the extension records the format.
///
/// Writes go to a temporary file in the same directory and are renamed into
/// place, so readers never observe a partial entry.
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, key: &CacheKey, format: ImageFormat) -> PathBuf {
        self.dir.join(format!("{}.{}", key, format.extension()))
    }

    async fn locate(&self, key: &CacheKey) -> Result<Option<(PathBuf, ImageFormat)>, CacheError> {
        for format in FORMATS {
            let p = self.path_for(key, format);
            match fs::metadata(&p).await {
                Ok(meta) if meta.is_file() => return Ok(Some((p, format))),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }
}

#[async_trait::async_trait]
impl ThumbnailCache for DiskCache {
    async fn has(&self, key: &CacheKey) -> Result<bool, CacheError> {
        Ok(self.locate(key).await?.is_some())
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let Some((path, format)) = self.locate(key).await? else {
            return Ok(None);
        };

        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(CacheEntry { bytes, format })),
            // Removed between locate and read
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), CacheError> {
        let dir = self.dir.clone();
        let target = self.path_for(key, entry.format);
        let bytes = entry.bytes.clone();

        tokio::task::spawn_blocking(move || -> Result<(), CacheError> {
            std::fs::create_dir_all(&dir)?;
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| CacheError::Io(std::io::Error::other(e)))?
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats { backend: "disk", ..CacheStats::default() };

        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(stats),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let known = path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(ImageFormat::from_extension)
                .is_some();
            if known {
                let meta = entry.metadata().await?;
                if meta.is_file() {
                    stats.entry_count += 1;
                    stats.total_size_bytes += meta.len();
                }
            }
        }

        Ok(stats)
    }
}
