mod config;
mod error;
mod routes;

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use config::Config;
use loco_cache::{open_store, CsvExportSource, QueryService, SyncEngine};
use routes::AppState;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = Config::load_default()?;
    config.apply_env(|name| std::env::var(name).ok())?;
    config.validate()?;

    info!(
        sheet_id = %config.source.sheet_id,
        interval_secs = config.sync.interval_secs,
        "loco-server starting"
    );

    let source = CsvExportSource::new(config.source.base_url.clone(), config.source_timeout())
        .context("Failed to build spreadsheet client")?;
    let store = open_store(&config.store)
        .await
        .context("Failed to open cache store")?;
    info!(store = store.name(), "cache store ready");

    let engine = Arc::new(SyncEngine::new(config.to_sync_config(), Arc::new(source), store.clone()));
    let state = AppState {
        query: QueryService::new(store, config.query),
        engine: engine.clone(),
    };

    // First tick syncs immediately; requests are served from whatever
    // generation the store already holds in the meantime.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = engine.spawn_scheduler(shutdown_rx);

    let app = routes::router(state)
        .layer(cors_layer(&config.server.cors_origins)?)
        .layer(TraceLayer::new_for_http());

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Server running at http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    shutdown_tx.send(true).ok();
    if let Err(e) = scheduler.await {
        warn!(error = %e, "sync scheduler ended abnormally");
    }

    info!("loco-server stopped");
    Ok(())
}

fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return Ok(layer.allow_origin(Any));
    }

    let origins = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).with_context(|| format!("Invalid CORS origin: {origin}"))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(layer.allow_origin(AllowOrigin::list(origins)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
