//! Server setup and initialization
//!
//! Wires together all components: entity store, flow registry, history
//! recorder, flow engine and HTTP routes.

use crate::{
    api::{create_api_routes, AppState},
    config::Config,
    database,
    flow::{registry::FlowRegistry, storage::{EntityStore, SqliteEntityStore}},
    history::{recorder::HistoryRecorder, storage::{HistoryStore, SqliteHistoryStore}},
    runtime::engine::FlowEngine,
};
use anyhow::Result;
use axum::{routing::get, Router};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Create the main Axum application with all routes
///
/// Opens the configured database, then delegates to [`build_app`].
pub async fn create_app(config: Config) -> Result<Router> {
    let pool = database::connect(&config.database.url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open database: {}", e))?;

    build_app(&config, pool).await
}

/// Build the application over an already initialized pool
pub async fn build_app(config: &Config, pool: SqlitePool) -> Result<Router> {
    let entity_store: Arc<dyn EntityStore> = Arc::new(SqliteEntityStore::new(pool.clone()));
    let history_store: Arc<dyn HistoryStore> = Arc::new(SqliteHistoryStore::new(pool));

    tracing::info!("📊 Initializing flow registry");
    let registry = Arc::new(FlowRegistry::new(Arc::clone(&entity_store)));
    registry
        .reload_all()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load flows from storage: {}", e))?;

    tracing::info!("📚 Starting history writer");
    let (recorder, _writer) = HistoryRecorder::spawn(
        Arc::clone(&history_store),
        config.engine.history_write_timeout(),
        config.engine.history_queue_capacity,
    );

    tracing::info!("🚀 Initializing flow engine");
    let engine = Arc::new(
        FlowEngine::new(&config.engine, entity_store, Arc::clone(&registry), recorder)
            .map_err(|e| anyhow::anyhow!("Failed to initialize flow engine: {}", e))?,
    );

    let state = AppState {
        engine,
        registry,
        history: history_store,
        maintenance_api_key: config.maintenance.api_key.clone(),
    };
    if state.maintenance_api_key.is_none() {
        tracing::warn!("🔒 NODEDASH_MAINTENANCE_API_KEY is unset, history cleanup is disabled");
    }

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_api_routes().with_state(state));

    tracing::info!("✅ Application initialized successfully");

    Ok(app)
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    // Level filter from NODEDASH_LOG, e.g. "debug" or "nodedash=debug,sqlx=warn"
    let filter = EnvFilter::try_from_env("NODEDASH_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting Nodedash flow engine...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}
