//! Decoding of caller-supplied source URLs and the origin allow-list.
//!
//! This is the only thing standing between a caller-chosen string and an outbound
//! request, so every check here runs before the fetcher is involved.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::config::ConfigError;

const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("origin not allowed: {0}")]
    OriginNotAllowed(String),
}

/// An absolute http(s) URL that has passed the origin allow-list.
///
/// Only the gate can construct one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUrl(Url);

impl SourceUrl {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn url(&self) -> &Url {
        &self.0
    }
}

impl std::fmt::Display for SourceUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Exact-origin allow-list. Entries are normalized by the URL parser once, at
/// construction, and compared as serialized origins.
#[derive(Debug, Clone)]
pub struct OriginAllowList {
    origins: Arc<[String]>,
}

impl OriginAllowList {
    pub fn new<S: AsRef<str>>(entries: &[S]) -> Result<Self, ConfigError> {
        if entries.is_empty() {
            return Err(ConfigError::EmptyAllowList);
        }

        let mut origins = Vec::with_capacity(entries.len());
        for entry in entries {
            let raw = entry.as_ref();
            let invalid = || ConfigError::InvalidOrigin(raw.to_string());
            let url = Url::parse(raw.trim()).map_err(|_| invalid())?;

            // An entry must be a bare origin; a path here would silently widen to the
            // whole host.
            let bare = is_http(&url)
                && url.has_host()
                && url.username().is_empty()
                && url.password().is_none()
                && url.path() == "/"
                && url.query().is_none()
                && url.fragment().is_none();
            if !bare {
                return Err(invalid());
            }

            let origin = url.origin().ascii_serialization();
            if !origins.contains(&origin) {
                origins.push(origin);
            }
        }

        Ok(Self { origins: origins.into() })
    }

    pub fn origins(&self) -> &[String] {
        &self.origins
    }

    /// True when `url` is http(s) and its origin is one of the allowed origins.
    pub fn allows(&self, url: &Url) -> bool {
        if !is_http(url) {
            return false;
        }
        let origin = url.origin().ascii_serialization();
        self.origins.iter().any(|allowed| *allowed == origin)
    }

    /// Parses an already-decoded URL string and checks it against the list.
    pub fn approve(&self, raw: &str) -> Result<SourceUrl, Rejection> {
        let url = Url::parse(raw)
            .map_err(|e| Rejection::MalformedInput(format!("not an absolute URL ({e})")))?;

        if !is_http(&url) || !url.has_host() {
            return Err(Rejection::MalformedInput(format!("unsupported URL: {}", url.scheme())));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(Rejection::MalformedInput("credentials in URL".into()));
        }
        if !self.allows(&url) {
            return Err(Rejection::OriginNotAllowed(url.origin().ascii_serialization()));
        }

        Ok(SourceUrl(url))
    }
}

/// Decodes the base64 argument into a URL string. Standard and URL-safe alphabets are
/// accepted, with or without padding.
pub fn decode_url(encoded: &str) -> Result<String, Rejection> {
    let trimmed = encoded.trim();
    if trimmed.is_empty() {
        return Err(Rejection::MalformedInput("empty argument".into()));
    }

    let bytes = STANDARD_LENIENT
        .decode(trimmed)
        .or_else(|_| URL_SAFE_LENIENT.decode(trimmed))
        .map_err(|e| Rejection::MalformedInput(format!("invalid base64 ({e})")))?;

    let decoded = String::from_utf8(bytes)
        .map_err(|_| Rejection::MalformedInput("decoded URL is not UTF-8".into()))?;
    if decoded.trim().is_empty() {
        return Err(Rejection::MalformedInput("decoded URL is empty".into()));
    }

    Ok(decoded)
}

/// Encodes a URL the way callers are expected to (standard alphabet, padded).
pub fn encode_url(url: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(url)
}

/// Decodes the caller's argument and runs it through the allow-list.
pub fn resolve(encoded: &str, allow_list: &OriginAllowList) -> Result<SourceUrl, Rejection> {
    let decoded = decode_url(encoded)?;
    allow_list.approve(decoded.trim())
}

fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}
