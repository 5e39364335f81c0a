//! HTTP server exposing the mind map API under `/api`.

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mindmap_sync::api::{AppState, routes};
use mindmap_sync::config::ServerConfig;
use mindmap_sync::operations::MindMapOperations;
use mindmap_sync::store::MemoryStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mindmap_sync=info,tower_http=info")),
        )
        .init();

    let config = ServerConfig::from_env().context("failed to load server configuration")?;
    info!(?config, "starting mind map server");
    if config.authenticator.is_empty() {
        warn!("no API tokens configured; every mind map request will be rejected");
    }

    let operations = open_store(&config).await?;
    let state = AppState::new(operations, Arc::new(config.authenticator.clone()));
    let app = Router::new()
        .nest("/api", routes::<AppState>())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!(address = %config.bind, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated unexpectedly")?;
    info!("server stopped");
    Ok(())
}

#[cfg(feature = "sqlx")]
async fn open_store(config: &ServerConfig) -> anyhow::Result<MindMapOperations> {
    use mindmap_sync::db::{PgStore, create_mind_map_tables};

    let Some(database_url) = config.database_url.as_deref() else {
        info!("DATABASE_URL not set; keeping mind maps in memory");
        return Ok(MindMapOperations::from_store(MemoryStore::new()));
    };
    let store = PgStore::connect(database_url, config.max_connections)
        .await
        .context("failed to connect to Postgres")?;
    create_mind_map_tables(&store.pool())
        .await
        .context("failed to run mind map migrations")?;
    info!("connected to Postgres and applied migrations");
    Ok(MindMapOperations::from_store(store))
}

#[cfg(not(feature = "sqlx"))]
async fn open_store(config: &ServerConfig) -> anyhow::Result<MindMapOperations> {
    if config.database_url.is_some() {
        warn!("built without Postgres support; ignoring DATABASE_URL");
    }
    Ok(MindMapOperations::from_store(MemoryStore::new()))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown requested");
}
