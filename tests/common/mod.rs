#![allow(dead_code)]

use async_trait::async_trait;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thumbproxy::cache::{CacheEntry, CacheError, CacheStats, MemoryCache, ThumbnailCache};
use thumbproxy::config::TargetSize;
use thumbproxy::fallback::FallbackAsset;
use thumbproxy::fetch::{FetchError, SourceFetcher};
use thumbproxy::gate::{OriginAllowList, SourceUrl};
use thumbproxy::key::CacheKey;
use thumbproxy::pipeline::ThumbnailService;

pub const ALLOWED_ORIGIN: &str = "https://allowed.example";

/// Encodes a gradient so different sizes produce different bytes.
pub fn image_bytes(width: u32, height: u32, format: image::ImageFormat) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let img = match format {
        image::ImageFormat::Gif => image::DynamicImage::ImageRgba8(image::DynamicImage::ImageRgb8(img).to_rgba8()),
        _ => image::DynamicImage::ImageRgb8(img),
    };
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), format).unwrap();
    out
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    image_bytes(width, height, image::ImageFormat::Png)
}

type Responder = Box<dyn Fn() -> Result<Vec<u8>, FetchError> + Send + Sync>;

/// Fetcher double that counts calls and answers from a closure.
pub struct FakeFetcher {
    calls: AtomicUsize,
    respond: Responder,
}

impl FakeFetcher {
    pub fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn() -> Result<Vec<u8>, FetchError> + Send + Sync + 'static,
    {
        Arc::new(Self { calls: AtomicUsize::new(0), respond: Box::new(respond) })
    }

    pub fn serving(bytes: Vec<u8>) -> Arc<Self> {
        Self::new(move || Ok(bytes.clone()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(&self, _url: &SourceUrl) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)()
    }
}

/// Cache that forgets everything, as an evicting store might.
pub struct ForgetfulCache;

#[async_trait]
impl ThumbnailCache for ForgetfulCache {
    async fn has(&self, _key: &CacheKey) -> Result<bool, CacheError> {
        Ok(false)
    }

    async fn get(&self, _key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        Ok(None)
    }

    async fn put(&self, _key: &CacheKey, _entry: &CacheEntry) -> Result<(), CacheError> {
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(CacheStats::default())
    }
}

/// Cache whose backend is down.
pub struct BrokenCache;

#[async_trait]
impl ThumbnailCache for BrokenCache {
    async fn has(&self, _key: &CacheKey) -> Result<bool, CacheError> {
        Err(CacheError::Io(std::io::Error::other("store offline")))
    }

    async fn get(&self, _key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        Err(CacheError::Io(std::io::Error::other("store offline")))
    }

    async fn put(&self, _key: &CacheKey, _entry: &CacheEntry) -> Result<(), CacheError> {
        Err(CacheError::Io(std::io::Error::other("store offline")))
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Err(CacheError::Io(std::io::Error::other("store offline")))
    }
}

pub fn allow_list() -> OriginAllowList {
    OriginAllowList::new(&[ALLOWED_ORIGIN]).unwrap()
}

pub fn fallback() -> Arc<FallbackAsset> {
    Arc::new(FallbackAsset::load("assets/fallback.png").unwrap())
}

pub fn key_for(url: &str) -> CacheKey {
    CacheKey::for_source(&allow_list().approve(url).unwrap())
}

pub fn service(
    cache: Arc<dyn ThumbnailCache>,
    fetcher: Arc<dyn SourceFetcher>,
) -> ThumbnailService {
    ThumbnailService::new(allow_list(), TargetSize::default(), cache, fetcher, fallback())
}

pub fn memory_service(fetcher: Arc<dyn SourceFetcher>) -> (ThumbnailService, Arc<MemoryCache>) {
    let cache = Arc::new(MemoryCache::new());
    (service(cache.clone(), fetcher), cache)
}

/// Shared sink for formatted log lines emitted while a test runs.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    /// Routes this thread's `tracing` events into the buffer until the guard drops.
    pub fn capture(&self) -> tracing::subscriber::DefaultGuard {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
