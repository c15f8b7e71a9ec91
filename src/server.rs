/// Server setup and initialization
///
/// Wires together all components: store, node registry, execution engine,
/// webhook router, cron rescheduler and HTTP routes.

use crate::{
    api::{
        create_execution_routes, create_node_routes, create_webhook_routes,
        create_workflow_routes, AppState,
    },
    config::Config,
    runtime::{CronRescheduler, ExecutionEngine, NodeRegistry, ScriptRunner, WebhookRouter},
    workflow::storage::WorkflowStore,
};
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Build the shared application state from configuration
///
/// Opens the store, builds the built-in node registry around the sandbox
/// runner, and creates (but does not start) the cron rescheduler.
pub async fn create_state(config: &Config) -> Result<AppState> {
    tracing::info!("📁 Ensuring data directory exists: {}", config.database.data_dir);
    std::fs::create_dir_all(&config.database.data_dir)
        .with_context(|| format!("failed to create data directory {}", config.database.data_dir))?;

    tracing::info!("📋 Opening workflow store");
    let store = WorkflowStore::connect(&config.database.url)
        .await
        .with_context(|| format!("failed to open database {}", config.database.url))?;

    let sandbox_program = config.engine.sandbox_program();
    tracing::info!("🧪 Code nodes run in {}", sandbox_program.display());
    let runner = ScriptRunner::new(sandbox_program)
        .with_timeout(config.engine.code_timeout())
        .with_memory_limit(config.engine.script_memory_limit);

    tracing::info!("🚀 Initializing execution engine");
    let engine = ExecutionEngine::new(store, NodeRegistry::builtin(runner));

    tracing::info!("⏰ Initializing cron rescheduler");
    let scheduler = Arc::new(
        CronRescheduler::new(engine.clone())
            .await
            .context("failed to initialize cron scheduler")?,
    );

    Ok(AppState {
        webhooks: WebhookRouter::new(engine.clone()),
        engine,
        scheduler,
    })
}

/// Create the Axum router for a prepared state
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .merge(create_node_routes())
        .merge(create_workflow_routes())
        .merge(create_execution_routes())
        .merge(create_webhook_routes())
        .with_state(state)
}

/// Start the HTTP server with the given configuration
///
/// Serves until ctrl-c, then stops the cron scheduler.
pub async fn start_server(config: Config) -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting flowlite server...");

    let state = create_state(&config).await?;
    let scheduler = Arc::clone(&state.scheduler);
    scheduler.start().await?;

    let app = create_app(state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await?;
    tracing::info!("👋 Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("⏹️ Shutdown signal received");
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
