use axum::{
    extract::{rejection::PathRejection, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    body::Body,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::trace::TraceLayer;

pub mod config;
pub mod gate;
pub mod key;
pub mod cache;
pub mod transform;
pub mod fetch;
pub mod fallback;
pub mod pipeline;
pub mod metrics;

use crate::cache::CacheError;
use crate::config::{ConfigError, RateLimit};
use crate::fallback::FallbackError;
use crate::fetch::FetchError;
use crate::gate::Rejection;
use crate::metrics::METRICS;
use crate::pipeline::{Thumbnail, ThumbnailService};
use crate::transform::TransformError;

#[derive(Error, Debug)]
pub enum ThumbError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),
    #[error("Origin not allowed: {0}")]
    OriginNotAllowed(String),
    #[error("Fetch error for {url}: {source}")]
    Fetch { url: String, #[source] source: FetchError },
    #[error("Decode error for {url}: {source}")]
    Decode { url: String, #[source] source: TransformError },
    #[error("Cache error: {0}")]
    CacheStore(#[from] CacheError),
    #[error("Startup asset missing: {0}")]
    StartupAssetMissing(#[from] FallbackError),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("HTTP client error: {0}")]
    Client(String),
}

impl From<Rejection> for ThumbError {
    fn from(r: Rejection) -> Self {
        match r {
            Rejection::MalformedInput(cause) => ThumbError::MalformedInput(cause),
            Rejection::OriginNotAllowed(origin) => ThumbError::OriginNotAllowed(origin),
        }
    }
}

pub type Result<T> = std::result::Result<T, ThumbError>;

/// Query form of the thumbnail route
#[derive(Debug, Deserialize)]
pub struct ThumbnailQuery {
    #[serde(default)]
    pub url: Option<String>,
}

fn thumbnail_response(thumb: Thumbnail) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(thumb.content_type));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(thumb.cache_control));
    if let Ok(etag) = HeaderValue::from_str(&thumb.etag) {
        headers.insert(header::ETAG, etag);
    }
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    (StatusCode::OK, headers, Body::from(thumb.bytes)).into_response()
}

/// Drops the one separator a doubled slash leaves in the wildcard capture;
/// any further `/` is base64 data.
fn path_argument(captured: &str) -> &str {
    captured.strip_prefix('/').unwrap_or(captured)
}

/// `GET /thumbnail/{encoded}`. The wildcard keeps `/` from the standard base64
/// alphabet intact.
async fn thumbnail_path_handler(
    State(service): State<Arc<ThumbnailService>>,
    encoded: std::result::Result<Path<String>, PathRejection>,
) -> Response {
    // An undecodable path still gets the placeholder, not a 400
    let encoded = encoded.map(|Path(p)| p).unwrap_or_default();
    let thumb = service.thumbnail(path_argument(&encoded)).await;
    thumbnail_response(thumb)
}

/// `GET /thumbnail?url={encoded}`
async fn thumbnail_query_handler(
    State(service): State<Arc<ThumbnailService>>,
    Query(query): Query<ThumbnailQuery>,
) -> Response {
    // Form decoding turns an unescaped `+` into a space
    let encoded = query.url.unwrap_or_default().replace(' ', "+");
    let thumb = service.thumbnail(&encoded).await;
    thumbnail_response(thumb)
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    use serde_json::json;

    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "thumbproxy"
    }))
}

/// Cache statistics endpoint
async fn cache_stats_handler(State(service): State<Arc<ThumbnailService>>) -> Response {
    match service.cache().stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("Cache error: {}", e)).into_response(),
    }
}

/// Metrics endpoint (Prometheus-compatible plain text)
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        METRICS.render(),
    )
}

/// Builds the HTTP surface around a ready service.
///
/// Thumbnail routes get per-IP rate limiting when `rate_limit` is set; the
/// limiter keys on the peer address, so the server must be started with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn router(service: Arc<ThumbnailService>, rate_limit: Option<RateLimit>) -> Router {
    // Observability endpoints - NO rate limiting
    let observability_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/stats/cache", get(cache_stats_handler))
        .with_state(service.clone());

    let mut thumbnail_routes = Router::new()
        .route("/thumbnail", get(thumbnail_query_handler))
        .route("/thumbnail/*encoded", get(thumbnail_path_handler))
        .with_state(service);

    match rate_limit.and_then(|limit| {
        GovernorConfigBuilder::default()
            .per_second(limit.per_second)
            .burst_size(limit.burst)
            .finish()
            .map(|conf| (limit, conf))
    }) {
        Some((limit, governor_conf)) => {
            tracing::info!(
                "Router configured with rate limiting: {}/sec, burst {}",
                limit.per_second,
                limit.burst
            );
            thumbnail_routes = thumbnail_routes.layer(GovernorLayer {
                config: Box::leak(Box::new(governor_conf)),
            });
        }
        None => tracing::info!("Rate limiting disabled"),
    }

    Router::new()
        .merge(observability_routes)
        .merge(thumbnail_routes)
        .layer(TraceLayer::new_for_http())
}
