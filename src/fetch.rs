use async_trait::async_trait;
use futures::TryStreamExt;
use mime::Mime;
use reqwest::{redirect, Client, StatusCode};
use std::io::SeekFrom;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

use crate::gate::{OriginAllowList, SourceUrl};

pub const MAX_REDIRECTS: usize = 5;
const USER_AGENT: &str = concat!("thumbproxy/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out fetching source")]
    Timeout,
    #[error("request failed: {0}")]
    Request(String),
    #[error("upstream status: {0}")]
    Status(StatusCode),
    #[error("source is not an image: {0}")]
    NotAnImage(String),
    #[error("source exceeds {limit} byte limit")]
    TooLarge { limit: usize },
    #[error("redirect refused: {0}")]
    Redirect(String),
    #[error("temporary spool failed: {0}")]
    Spool(#[from] std::io::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_redirect() {
            FetchError::Redirect(e.to_string())
        } else {
            FetchError::Request(e.to_string())
        }
    }
}

/// Retrieves the raw bytes behind an approved source URL. One attempt per call.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, url: &SourceUrl) -> Result<Vec<u8>, FetchError>;
}

/// `reqwest`-backed fetcher.
///
/// The client is built once and never carries caller headers. Redirects are
/// followed up to [`MAX_REDIRECTS`] hops and every hop must land on an allowed
/// origin; otherwise the request fails with [`FetchError::Redirect`].
///
/// Bodies are streamed into an anonymous temporary file with the size limit
/// enforced while streaming, so a lying `Content-Length` cannot push past it. The
/// file is unlinked on creation and closed on every exit path.
pub struct HttpFetcher {
    client: Client,
    max_size: usize,
}

impl HttpFetcher {
    pub fn new(
        allow_list: OriginAllowList,
        timeout: Duration,
        max_size: usize,
    ) -> Result<Self, FetchError> {
        let policy = redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() > MAX_REDIRECTS {
                attempt.error(format!("more than {MAX_REDIRECTS} redirects"))
            } else if allow_list.allows(attempt.url()) {
                attempt.follow()
            } else {
                let target = attempt.url().origin().ascii_serialization();
                attempt.error(format!("redirect to disallowed origin {target}"))
            }
        });

        let client = Client::builder()
            .timeout(timeout)
            .redirect(policy)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;

        Ok(Self { client, max_size })
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &SourceUrl) -> Result<Vec<u8>, FetchError> {
        let resp = self.client.get(url.url().clone()).send().await?;

        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status()));
        }

        // Unknown or unparseable types are left for the decoder to judge
        let ct = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if let Ok(m) = ct.parse::<Mime>() {
            if m.type_() != mime::IMAGE && m.essence_str() != "application/octet-stream" {
                return Err(FetchError::NotAnImage(ct));
            }
        }

        if let Some(len) = resp.content_length() {
            if len > self.max_size as u64 {
                return Err(FetchError::TooLarge { limit: self.max_size });
            }
        }

        let mut spool = tokio::fs::File::from_std(tempfile::tempfile()?);
        let body = Box::pin(resp.bytes_stream().map_err(std::io::Error::other));
        let mut reader = StreamReader::new(body).take(self.max_size as u64 + 1);

        let written = match tokio::io::copy(&mut reader, &mut spool).await {
            Ok(n) => n,
            Err(e) => {
                // Errors from the body stream arrive wrapped in io::Error
                return Err(match e.get_ref().and_then(|inner| inner.downcast_ref::<reqwest::Error>()) {
                    Some(re) if re.is_timeout() => FetchError::Timeout,
                    Some(re) => FetchError::Request(re.to_string()),
                    None => FetchError::Spool(e),
                });
            }
        };
        if written > self.max_size as u64 {
            return Err(FetchError::TooLarge { limit: self.max_size });
        }

        spool.flush().await?;
        spool.seek(SeekFrom::Start(0)).await?;
        let mut bytes = Vec::with_capacity(written as usize);
        spool.read_to_end(&mut bytes).await?;

        tracing::debug!("Fetched {} bytes from {}", bytes.len(), url);
        Ok(bytes)
    }
}
