/// HTTP API Layer
///
/// This module provides the REST API used by the editor and inbound webhooks:
/// - Workflow CRUD operations and manual runs
/// - Execution history with recorded steps
/// - Node definitions for the editor palette
/// - Webhook dispatch by (method, path)

use crate::runtime::{CronRescheduler, ExecutionEngine, WebhookRouter};
use std::sync::Arc;

// Mapping of library errors onto HTTP responses
pub mod error;

// Workflow management endpoints (POST/GET/PUT/DELETE, run)
pub mod workflows;

// Execution history endpoints
pub mod executions;

// Node definition listing
pub mod nodes;

// Webhook execution endpoints
pub mod webhooks;

pub use error::ApiError;

/// Shared state handed to every route
#[derive(Clone)]
pub struct AppState {
    pub engine: ExecutionEngine,
    pub webhooks: WebhookRouter,
    pub scheduler: Arc<CronRescheduler>,
}

// Re-export router builders
pub use executions::create_execution_routes;
pub use nodes::create_node_routes;
pub use webhooks::create_webhook_routes;
pub use workflows::create_workflow_routes;
