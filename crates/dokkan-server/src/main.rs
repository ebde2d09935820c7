use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use dokkan_client::HttpSources;
use dokkan_client::sources::DEFAULT_TIMEOUT;
use dokkan_core::{AggregatorConfig, Coordinator, Refresher, TracingRefreshReporter};
use dokkan_server::routes;
use dokkan_server::state::AppState;
use dokkan_store::{FileCacheStore, StoreConfig};

const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("dokkan=info".parse()?))
        .with_target(false)
        .init();

    let config = match std::env::var("DOKKAN_CONFIG") {
        Ok(path) => AggregatorConfig::load(&path)?,
        Err(_) => AggregatorConfig::default_seed(),
    };
    let timeout = match std::env::var("DOKKAN_HTTP_TIMEOUT_SECS") {
        Ok(raw) => Duration::from_secs(raw.parse().context("Invalid DOKKAN_HTTP_TIMEOUT_SECS")?),
        Err(_) => DEFAULT_TIMEOUT,
    };
    let port = std::env::var("DOKKAN_SERVER_PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{port}");

    let sources = HttpSources::new(&config.sources, timeout)?;
    let store = FileCacheStore::open(&StoreConfig::from_env()?).await?;
    let coordinator = Arc::new(Coordinator::from_config(&config, sources, store)?);

    let cancel = CancellationToken::new();
    let refresher = Refresher::new(Arc::clone(&coordinator), &config.refresh);
    let refresher_cancel = cancel.clone();
    let refresher_handle = tokio::spawn(async move {
        if let Err(e) = refresher
            .run(refresher_cancel, &TracingRefreshReporter)
            .await
        {
            tracing::error!(error = %e, "Refresher stopped with an error");
        }
    });

    let state = Arc::new(AppState::new(coordinator));
    let app = routes::router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!(
        data_types = config.data_types.len(),
        sources = config.sources.len(),
        "Starting server on {addr}"
    );
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await?;

    if let Err(e) = refresher_handle.await {
        tracing::warn!(error = %e, "Refresher task panicked");
    }
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for CTRL+C, shutting down");
    }
    tracing::info!("Shutdown signal received");
    cancel.cancel();
}
