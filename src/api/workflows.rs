/// Workflow management REST API endpoints
///
/// Provides CRUD operations for workflow definitions plus manual runs. Every
/// save validates the graph, persists it, re-syncs the workflow's webhook
/// endpoints and rebuilds the cron schedule.

use crate::api::{ApiError, AppState};
use crate::workflow::types::{Edge, Node, Workflow};
use crate::workflow::validate::validate_workflow;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

/// Body accepted by create and update
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowPayload {
    /// Optional on create; a UUID is generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// Create workflow management routes
pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(create_workflow).get(list_workflows))
        .route(
            "/api/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/api/workflows/{id}/run", post(run_workflow))
}

/// Validate, persist, sync webhooks and reschedule cron jobs
async fn persist(state: &AppState, workflow: &Workflow) -> Result<(), ApiError> {
    validate_workflow(workflow)?;
    state.engine.store().save_workflow(workflow).await?;
    state.webhooks.sync(workflow).await?;
    state.scheduler.reschedule_from_store().await?;
    Ok(())
}

/// Create a new workflow
///
/// POST /api/workflows
/// Body: { "name": "...", "active": true, "nodes": [...], "edges": [...] }
async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<WorkflowPayload>,
) -> Result<(StatusCode, Json<Workflow>), ApiError> {
    if payload.name.trim().is_empty() {
        return Err(ApiError::BadRequest("workflow name must not be empty".into()));
    }

    let id = payload
        .id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if state.engine.store().get_workflow(&id).await?.is_some() {
        return Err(ApiError::Conflict(format!("workflow '{}' already exists", id)));
    }

    let now = Utc::now();
    let workflow = Workflow {
        id,
        name: payload.name,
        active: payload.active,
        nodes: payload.nodes,
        edges: payload.edges,
        created_at: now,
        updated_at: now,
    };

    persist(&state, &workflow).await?;
    tracing::info!("🔥 Created workflow: {} ({})", workflow.id, workflow.name);

    Ok((StatusCode::CREATED, Json(workflow)))
}

/// List all workflows
///
/// GET /api/workflows
async fn list_workflows(State(state): State<AppState>) -> Result<Json<Vec<Workflow>>, ApiError> {
    Ok(Json(state.engine.store().list_workflows().await?))
}

/// GET /api/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    state
        .engine
        .store()
        .get_workflow(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("workflow not found: {}", id)))
}

/// Update an existing workflow
///
/// PUT /api/workflows/{id}
async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<WorkflowPayload>,
) -> Result<Json<Workflow>, ApiError> {
    if payload.name.trim().is_empty() {
        return Err(ApiError::BadRequest("workflow name must not be empty".into()));
    }

    let existing = state
        .engine
        .store()
        .get_workflow(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("workflow not found: {}", id)))?;

    // The URL wins over any id in the body
    let workflow = Workflow {
        id,
        name: payload.name,
        active: payload.active,
        nodes: payload.nodes,
        edges: payload.edges,
        created_at: existing.created_at,
        updated_at: Utc::now(),
    };

    persist(&state, &workflow).await?;
    tracing::info!("🔥 Updated workflow: {} ({})", workflow.id, workflow.name);

    Ok(Json(workflow))
}

/// DELETE /api/workflows/{id}
async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.engine.store().delete_workflow(&id).await? {
        return Err(ApiError::NotFound(format!("workflow not found: {}", id)));
    }

    state.scheduler.reschedule_from_store().await?;
    tracing::info!("🗑️ Deleted workflow: {}", id);

    Ok(Json(json!({ "deleted": true })))
}

/// Run a stored workflow with no trigger items
///
/// POST /api/workflows/{id}/run
async fn run_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let execution_id = state.engine.run_manual(&id).await?;
    Ok(Json(json!({ "executionId": execution_id })))
}
