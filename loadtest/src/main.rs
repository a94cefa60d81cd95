use base64::Engine;
use goose::prelude::*;
use rand::Rng;

/// Load testing suite for the thumbnail proxy.
///
/// Simulates the traffic a content page produces:
/// - Repeated thumbnails for the same handful of posts (cache hits)
/// - Thumbnails for never-seen sources (cache misses, full fetch + transform)
/// - Abuse attempts against other origins and garbage arguments (fallback path)
/// - Health monitoring endpoints
///
/// # Usage
/// ```bash
/// cd loadtest
/// ORIGIN=https://admin.insights.ubuntu.com cargo run --release -- \
///     --host http://localhost:8080 --users 10 --hatch-rate 2 --run-time 60s
/// ```
///
/// `ORIGIN` must be one of the server's allowed origins.
///
/// # Performance Targets
/// - Cache hits: <20ms p95 latency
/// - Fallbacks: <10ms p95 latency (no network, no transform)
/// - Cache misses: dominated by the origin, bounded by the fetch timeout
/// - Non-200 responses: 0 (every path answers with an image)

const POPULAR_IMAGES: [&str; 4] = [
    "/wp-content/uploads/hero.png",
    "/wp-content/uploads/header.jpg",
    "/wp-content/uploads/diagram.png",
    "/wp-content/uploads/team.jpg",
];

fn origin() -> String {
    std::env::var("ORIGIN").unwrap_or_else(|_| "https://admin.insights.ubuntu.com".to_string())
}

fn thumbnail_path(source: &str) -> String {
    format!(
        "/thumbnail/{}",
        base64::engine::general_purpose::STANDARD.encode(source)
    )
}

#[tokio::main]
async fn main() -> Result<(), GooseError> {
    GooseAttack::initialize()?
        .register_scenario(
            scenario!("ContentPage")
                // Most page views reuse the same thumbnails
                .register_transaction(transaction!(popular_thumbnail).set_weight(15)?)
                // New posts trigger fetch + transform
                .register_transaction(transaction!(fresh_thumbnail).set_weight(3)?)
                // Continuous health validation ensures service availability
                .register_transaction(transaction!(health_check).set_weight(1)?)
        )
        .register_scenario(
            scenario!("Abuse")
                .register_transaction(transaction!(foreign_origin).set_weight(5)?)
                .register_transaction(transaction!(garbage_argument).set_weight(5)?)
        )
        .execute()
        .await?;

    Ok(())
}

/// Validates cache hit performance with a small fixed set of sources.
async fn popular_thumbnail(user: &mut GooseUser) -> TransactionResult {
    // Pick before await to satisfy Send bounds
    let path = {
        let mut rng = rand::thread_rng();
        let image = POPULAR_IMAGES[rng.gen_range(0..POPULAR_IMAGES.len())];
        thumbnail_path(&format!("{}{}", origin(), image))
    };

    let _goose = user.get(&path).await?;
    Ok(())
}

/// Validates cache miss performance with a cache-busting query string.
async fn fresh_thumbnail(user: &mut GooseUser) -> TransactionResult {
    let path = thumbnail_path(&format!(
        "{}/wp-content/uploads/hero.png?v={}",
        origin(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));

    let _goose = user.get(&path).await?;
    Ok(())
}

/// Sources outside the allow-list must be answered with the placeholder.
async fn foreign_origin(user: &mut GooseUser) -> TransactionResult {
    let path = thumbnail_path("https://evil.example/x.png");
    let _goose = user.get(&path).await?;
    Ok(())
}

/// Undecodable arguments must be answered with the placeholder.
async fn garbage_argument(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get("/thumbnail/not*base64").await?;
    Ok(())
}

/// Monitors service availability via health check endpoint.
async fn health_check(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get("/health").await?;
    Ok(())
}
