use bytes::Bytes;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::ImageFormat;

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("cannot read fallback asset {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("fallback asset {0} is not a supported image")]
    NotAnImage(PathBuf),
}

/// Placeholder served whenever a real thumbnail cannot be produced.
///
/// Loaded once at startup and shared read-only; cloning the bytes is a refcount
/// bump.
#[derive(Debug, Clone)]
pub struct FallbackAsset {
    bytes: Bytes,
    format: ImageFormat,
}

impl FallbackAsset {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FallbackError> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|source| FallbackError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;

        let asset = Self::from_bytes(raw).ok_or_else(|| FallbackError::NotAnImage(path.to_path_buf()))?;
        tracing::info!(
            "Loaded fallback asset {} ({} bytes, {})",
            path.display(),
            asset.bytes.len(),
            asset.content_type()
        );
        Ok(asset)
    }

    /// `None` when the bytes are not a recognizable image.
    pub fn from_bytes(raw: impl Into<Bytes>) -> Option<Self> {
        let bytes = raw.into();
        let format = ImageFormat::sniff(&bytes)?;
        Some(Self { bytes, format })
    }

    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }
}
