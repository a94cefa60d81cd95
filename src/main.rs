use std::net::SocketAddr;
use std::sync::Arc;
use thumbproxy::{config::ThumbConfig, pipeline::ThumbnailService, router};

/// Thumbnail proxy entry point.
///
/// Initializes tracing, loads and validates configuration, opens the cache,
/// loads the fallback asset and starts the HTTP server. Any of those failing
/// aborts startup.
///
/// # Configuration
/// Environment variables (see `ThumbConfig::from_lookup` for the full list):
/// - `THUMB_ALLOWED_ORIGINS`: comma-separated origins thumbnails may come from
/// - `THUMB_FALLBACK_PATH`: placeholder image served on any failure
/// - `PORT`: HTTP listen port (default: 8080)
/// - `RUST_LOG`: Logging verbosity (default: "thumbproxy=debug,tower_http=debug")
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with environment-based filtering
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "thumbproxy=debug,tower_http=debug".into())
        )
        .init();

    tracing::info!("Starting thumbproxy server");

    let cfg = ThumbConfig::from_env()?;
    let service = Arc::new(ThumbnailService::from_config(&cfg)?);
    let app = router(service, cfg.rate_limit);

    // Bind to 0.0.0.0 for external access (required for containerized deployment)
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
