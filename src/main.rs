//! # Routebox Demo Server
//!
//! Serves a counter on `/counter` behind a 30 second cache. Repeated calls
//! within that window return the same number with `X-Was-Cached: true`.
//!
//! Configuration is read from the YAML file named by `ROUTEBOX_CONFIG_PATH`,
//! or built from defaults plus `ROUTEBOX_*` environment overrides.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, middleware, routing::get, Router};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use routebox::caching::{CacheDirective, CacheManager, CacheMiddleware, RouteCacheSettings};
use routebox::gateway::{cache_hooks, NoCache, Routebox};
use routebox::observability::init_logging;
use routebox::{RouteboxConfig, RouteboxError, RouteboxResult};

#[tokio::main]
async fn main() -> RouteboxResult<()> {
    let config = load_config().await?;
    init_logging(&config.logging);

    info!("Starting routebox demo");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(config).await {
        error!(error_type = e.error_type(), "Demo server failed: {}", e);
        return Err(e);
    }

    info!("Routebox demo shutdown complete");
    Ok(())
}

async fn load_config() -> RouteboxResult<RouteboxConfig> {
    match std::env::var("ROUTEBOX_CONFIG_PATH") {
        Ok(path) => RouteboxConfig::load_from_file(&path).await,
        Err(_) => RouteboxConfig::from_env(),
    }
}

async fn run(config: RouteboxConfig) -> RouteboxResult<()> {
    let manager = Arc::new(CacheManager::from_config(&config).await?);
    let routebox = Routebox::new(Arc::new(CacheMiddleware::new(config.defaults, manager)?));

    let counter = routebox.route(RouteCacheSettings::new(CacheDirective::expires_in(
        Duration::from_secs(30),
    )))?;
    let uncached_counter = routebox.route(RouteCacheSettings::new(CacheDirective::expires_in(
        Duration::from_secs(30),
    )))?;

    let hits = Arc::new(AtomicU64::new(0));
    let app = Router::new()
        .route("/counter", get(count))
        .route_layer(middleware::from_fn_with_state(counter, cache_hooks))
        .merge(
            Router::new()
                .route("/counter/live", get(count_uncached))
                .route_layer(middleware::from_fn_with_state(uncached_counter, cache_hooks)),
        )
        .with_state(hits)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .map_err(|e| RouteboxError::Io {
            message: format!("Failed to bind {}: {}", config.server.bind_address, e),
        })?;
    info!("Listening on {}", config.server.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| RouteboxError::Io {
            message: format!("Server error: {}", e),
        })?;

    info!("Flushing pending cache writes");
    routebox.flush().await;
    Ok(())
}

async fn count(State(hits): State<Arc<AtomicU64>>) -> String {
    hits.fetch_add(1, Ordering::SeqCst).to_string()
}

/// Same counter, but opts out of caching on every call
async fn count_uncached(State(hits): State<Arc<AtomicU64>>, cache: NoCache) -> String {
    cache.nocache();
    hits.fetch_add(1, Ordering::SeqCst).to_string()
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
