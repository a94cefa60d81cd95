//! Request orchestration: gate, cache lookup, fetch, transform, store, serve.
//!
//! Every failure is absorbed here and answered with the fallback asset. Concurrent
//! misses for the same key are not coalesced; both requests do the work and the
//! second write replaces the first with identical bytes.

use bytes::Bytes;
use std::sync::Arc;

use crate::cache::{self, CacheEntry, ThumbnailCache};
use crate::config::{TargetSize, ThumbConfig, FALLBACK_CACHE_CONTROL, THUMBNAIL_CACHE_CONTROL};
use crate::fallback::FallbackAsset;
use crate::fetch::{HttpFetcher, SourceFetcher};
use crate::gate::{self, OriginAllowList, SourceUrl};
use crate::key::CacheKey;
use crate::metrics::{Metrics, METRICS};
use crate::transform;
use crate::ThumbError;

/// Why a request was answered with the fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    MalformedInput,
    OriginNotAllowed,
    Fetch,
    Decode,
    /// A failure outside the request path, such as a broken collaborator.
    Internal,
}

impl From<&ThumbError> for FallbackReason {
    fn from(err: &ThumbError) -> Self {
        match err {
            ThumbError::MalformedInput(_) => Self::MalformedInput,
            ThumbError::OriginNotAllowed(_) => Self::OriginNotAllowed,
            ThumbError::Fetch { .. } => Self::Fetch,
            ThumbError::Decode { .. } => Self::Decode,
            ThumbError::CacheStore(_)
            | ThumbError::StartupAssetMissing(_)
            | ThumbError::Config(_)
            | ThumbError::Client(_) => Self::Internal,
        }
    }
}

/// Which path produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Served {
    Fresh,
    Cached,
    Fallback(FallbackReason),
}

/// A response body and the headers that describe it.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub bytes: Bytes,
    pub content_type: &'static str,
    pub cache_control: &'static str,
    pub etag: String,
    pub served: Served,
}

pub struct ThumbnailService {
    allow_list: OriginAllowList,
    target: TargetSize,
    cache: Arc<dyn ThumbnailCache>,
    fetcher: Arc<dyn SourceFetcher>,
    fallback: Arc<FallbackAsset>,
}

impl ThumbnailService {
    pub fn new(
        allow_list: OriginAllowList,
        target: TargetSize,
        cache: Arc<dyn ThumbnailCache>,
        fetcher: Arc<dyn SourceFetcher>,
        fallback: Arc<FallbackAsset>,
    ) -> Self {
        Self { allow_list, target, cache, fetcher, fallback }
    }

    /// Wires the production collaborators. Fails if the configuration is invalid,
    /// the cache cannot be opened or the fallback asset cannot be loaded.
    pub fn from_config(config: &ThumbConfig) -> Result<Self, ThumbError> {
        config.validate()?;
        let allow_list = OriginAllowList::new(config.allowed_origins.as_slice())?;
        let fallback = FallbackAsset::load(&config.fallback_path)?;
        let cache = cache::open(config)?;
        let fetcher = HttpFetcher::new(allow_list.clone(), config.fetch_timeout, config.max_input_size)
            .map_err(|e| ThumbError::Client(e.to_string()))?;

        tracing::info!(
            "Thumbnail service ready: origins={:?}, target={}x{}, timeout={:?}",
            allow_list.origins(),
            config.target.width,
            config.target.height,
            config.fetch_timeout
        );

        Ok(Self::new(allow_list, config.target, cache, Arc::new(fetcher), Arc::new(fallback)))
    }

    pub fn cache(&self) -> &Arc<dyn ThumbnailCache> {
        &self.cache
    }

    /// Always yields an image: the thumbnail for `encoded`, or the fallback.
    pub async fn thumbnail(&self, encoded: &str) -> Thumbnail {
        match self.produce(encoded).await {
            Ok(thumb) => thumb,
            Err(err) => {
                match &err {
                    ThumbError::MalformedInput(cause) => {
                        tracing::warn!("Rejected malformed thumbnail argument {:?}: {}", encoded, cause)
                    }
                    ThumbError::OriginNotAllowed(origin) => {
                        tracing::warn!("Rejected thumbnail source from disallowed origin {}", origin)
                    }
                    ThumbError::Fetch { url, source } => {
                        tracing::error!("Failed to fetch {}: {}", url, source)
                    }
                    ThumbError::Decode { url, source } => {
                        tracing::warn!("Failed to transform {}: {}", url, source)
                    }
                    other => tracing::error!("Unexpected thumbnail failure: {}", other),
                }
                let reason = FallbackReason::from(&err);
                self.fallback_response(reason)
            }
        }
    }

    async fn produce(&self, encoded: &str) -> Result<Thumbnail, ThumbError> {
        let source = gate::resolve(encoded, &self.allow_list)?;
        let key = CacheKey::for_source(&source);

        match self.cache.get(&key).await {
            Ok(Some(entry)) => {
                tracing::debug!("Cache hit for key={} url={}", key, source);
                Metrics::incr(&METRICS.cache_hits);
                return Ok(Thumbnail {
                    content_type: entry.content_type(),
                    bytes: Bytes::from(entry.bytes),
                    cache_control: THUMBNAIL_CACHE_CONTROL,
                    etag: key.etag(),
                    served: Served::Cached,
                });
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Cache lookup failed for key={}, treating as miss: {}", key, e),
        }

        tracing::info!("Cache miss for key={}, fetching {}", key, source);
        Metrics::incr(&METRICS.cache_misses);

        let raw = self
            .fetcher
            .fetch(&source)
            .await
            .map_err(|e| ThumbError::Fetch { url: source.to_string(), source: e })?;

        let image = self.transform(&source, raw).await?;
        Metrics::incr(&METRICS.transforms);

        let entry = CacheEntry::from(image);
        if let Err(e) = self.cache.put(&key, &entry).await {
            Metrics::incr(&METRICS.cache_store_errors);
            tracing::warn!("Failed to cache thumbnail for key={}: {}", key, ThumbError::CacheStore(e));
            // Continue anyway - we can still serve the image
        }

        Ok(Thumbnail {
            content_type: entry.content_type(),
            bytes: Bytes::from(entry.bytes),
            cache_control: THUMBNAIL_CACHE_CONTROL,
            etag: key.etag(),
            served: Served::Fresh,
        })
    }

    /// Runs the CPU-bound transform off the async workers.
    async fn transform(&self, source: &SourceUrl, raw: Vec<u8>) -> Result<transform::TransformedImage, ThumbError> {
        let target = self.target;
        let decode_err = |e| ThumbError::Decode { url: source.to_string(), source: e };

        tokio::task::spawn_blocking(move || transform::transform(&raw, target))
            .await
            .map_err(|e| decode_err(transform::TransformError::Aborted(e.to_string())))?
            .map_err(decode_err)
    }

    fn fallback_response(&self, reason: FallbackReason) -> Thumbnail {
        Metrics::incr(&METRICS.fallbacks);
        Thumbnail {
            bytes: self.fallback.bytes(),
            content_type: self.fallback.content_type(),
            cache_control: FALLBACK_CACHE_CONTROL,
            etag: "\"fallback\"".to_string(),
            served: Served::Fallback(reason),
        }
    }
}
