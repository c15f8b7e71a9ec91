/// flowlite: workflow automation engine
///
/// Main entry point for the flowlite server. Loads configuration from the
/// environment and starts the HTTP server with workflow management,
/// webhook dispatch and cron scheduling.

use flowlite::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Workflow management API at /api/workflows/*
/// - Execution history at /api/executions/*
/// - Webhook execution at /api/webhooks/{path}
/// - Health check at /healthz
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::default();
    start_server(config).await
}
