use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::gate::OriginAllowList;

pub const DEFAULT_TARGET_WIDTH: u32 = 500;
pub const DEFAULT_TARGET_HEIGHT: u32 = 281;
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_INPUT_SIZE: usize = 8 * 1024 * 1024;
pub const DEFAULT_ALLOWED_ORIGIN: &str = "https://admin.insights.ubuntu.com";

/// Thumbnails are immutable per source URL, so clients may hold on to them.
pub const THUMBNAIL_CACHE_CONTROL: &str = "public, max-age=86400";
/// Fallbacks are often caused by transient upstream failures.
pub const FALLBACK_CACHE_CONTROL: &str = "no-cache";

/// Image format families the transformer decodes and re-encodes.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    png,
    jpeg,
    gif,
    webp,
}

impl ImageFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ImageFormat::png => "image/png",
            ImageFormat::jpeg => "image/jpeg",
            ImageFormat::gif => "image/gif",
            ImageFormat::webp => "image/webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::png => "png",
            ImageFormat::jpeg => "jpeg",
            ImageFormat::gif => "gif",
            ImageFormat::webp => "webp",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "png" => Some(ImageFormat::png),
            "jpeg" | "jpg" => Some(ImageFormat::jpeg),
            "gif" => Some(ImageFormat::gif),
            "webp" => Some(ImageFormat::webp),
            _ => None,
        }
    }

    /// Maps a format detected by the `image` crate onto a supported family.
    pub fn from_detected(detected: image::ImageFormat) -> Option<Self> {
        match detected {
            image::ImageFormat::Png => Some(ImageFormat::png),
            image::ImageFormat::Jpeg => Some(ImageFormat::jpeg),
            image::ImageFormat::Gif => Some(ImageFormat::gif),
            image::ImageFormat::WebP => Some(ImageFormat::webp),
            _ => None,
        }
    }

    /// Sniffs the magic bytes of an encoded image.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        image::guess_format(bytes).ok().and_then(Self::from_detected)
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Fixed output size of every thumbnail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl Default for TargetSize {
    fn default() -> Self {
        Self { width: DEFAULT_TARGET_WIDTH, height: DEFAULT_TARGET_HEIGHT }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    Sled,
    Disk,
    Memory,
}

impl std::str::FromStr for CacheBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sled" => Ok(CacheBackend::Sled),
            "disk" => Ok(CacheBackend::Disk),
            "memory" => Ok(CacheBackend::Memory),
            other => Err(ConfigError::UnknownCacheBackend(other.to_string())),
        }
    }
}

/// Per-IP request budget for the thumbnail routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub per_second: u64,
    pub burst: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self { per_second: 10, burst: 30 }
    }
}

#[derive(Debug, Clone)]
pub struct ThumbConfig {
    pub allowed_origins: Vec<String>,
    pub target: TargetSize,
    pub fetch_timeout: Duration,
    pub max_input_size: usize, // bytes
    pub cache_backend: CacheBackend,
    pub cache_dir: PathBuf,
    pub fallback_path: PathBuf,
    pub rate_limit: Option<RateLimit>,
    pub port: u16,
}

impl Default for ThumbConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![DEFAULT_ALLOWED_ORIGIN.to_string()],
            target: TargetSize::default(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_input_size: DEFAULT_MAX_INPUT_SIZE,
            cache_backend: CacheBackend::Sled,
            cache_dir: PathBuf::from("./cache"),
            fallback_path: PathBuf::from("./assets/fallback.png"),
            rate_limit: Some(RateLimit::default()),
            port: 8080,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Allowed origin list cannot be empty")] EmptyAllowList,
    #[error("Invalid allowed origin: {0}")] InvalidOrigin(String),
    #[error("Target dimensions must be > 0")] InvalidTarget,
    #[error("Fetch timeout must be > 0")] InvalidTimeout,
    #[error("Max input size must be > 0")] InvalidMaxInput,
    #[error("Rate limit values must be > 0")] InvalidRateLimit,
    #[error("Unknown cache backend: {0}")] UnknownCacheBackend(String),
    #[error("Invalid value for {name}: {value}")] InvalidValue { name: &'static str, value: String },
}

impl ThumbConfig {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable source, falling back to defaults
    /// for unset variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let allowed_origins = match lookup("THUMB_ALLOWED_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            None => defaults.allowed_origins,
        };

        let target = TargetSize {
            width: parse_var(&lookup, "THUMB_TARGET_WIDTH")?.unwrap_or(defaults.target.width),
            height: parse_var(&lookup, "THUMB_TARGET_HEIGHT")?.unwrap_or(defaults.target.height),
        };

        let fetch_timeout = parse_var::<u64, _>(&lookup, "THUMB_FETCH_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.fetch_timeout);

        let cache_backend = match lookup("THUMB_CACHE_BACKEND") {
            Some(raw) => raw.parse()?,
            None => defaults.cache_backend,
        };

        let rate_limit = if lookup("DISABLE_RATE_LIMIT").is_some() {
            None
        } else {
            let base = RateLimit::default();
            Some(RateLimit {
                per_second: parse_var(&lookup, "THUMB_RATE_LIMIT_PER_SECOND")?.unwrap_or(base.per_second),
                burst: parse_var(&lookup, "THUMB_RATE_LIMIT_BURST")?.unwrap_or(base.burst),
            })
        };

        Ok(Self {
            allowed_origins,
            target,
            fetch_timeout,
            max_input_size: parse_var(&lookup, "THUMB_MAX_INPUT_SIZE")?.unwrap_or(defaults.max_input_size),
            cache_backend,
            cache_dir: lookup("THUMB_CACHE_DIR").map(PathBuf::from).unwrap_or(defaults.cache_dir),
            fallback_path: lookup("THUMB_FALLBACK_PATH").map(PathBuf::from).unwrap_or(defaults.fallback_path),
            rate_limit,
            port: parse_var(&lookup, "PORT")?.unwrap_or(defaults.port),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        OriginAllowList::new(self.allowed_origins.as_slice())?;
        if self.target.width == 0 || self.target.height == 0 { return Err(ConfigError::InvalidTarget); }
        if self.fetch_timeout.is_zero() { return Err(ConfigError::InvalidTimeout); }
        if self.max_input_size == 0 { return Err(ConfigError::InvalidMaxInput); }
        if let Some(limit) = self.rate_limit {
            if limit.per_second == 0 || limit.burst == 0 { return Err(ConfigError::InvalidRateLimit); }
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        None => Ok(None),
    }
}
