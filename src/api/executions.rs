/// Execution history endpoints
///
/// GET /api/executions?workflowId=...   newest first
/// GET /api/executions/{id}             execution with its steps

use crate::api::{ApiError, AppState};
use crate::workflow::types::{Execution, ExecutionStep};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFilter {
    pub workflow_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecutionDetail {
    #[serde(flatten)]
    pub execution: Execution,
    pub steps: Vec<ExecutionStep>,
}

pub fn create_execution_routes() -> Router<AppState> {
    Router::new()
        .route("/api/executions", get(list_executions))
        .route("/api/executions/{id}", get(get_execution))
}

async fn list_executions(
    State(state): State<AppState>,
    Query(filter): Query<ExecutionFilter>,
) -> Result<Json<Vec<Execution>>, ApiError> {
    let executions = state
        .engine
        .store()
        .list_executions(filter.workflow_id.as_deref())
        .await?;
    Ok(Json(executions))
}

async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionDetail>, ApiError> {
    let store = state.engine.store();
    let execution = store
        .get_execution(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("execution not found: {}", id)))?;
    let steps = store.list_steps(&id).await?;

    Ok(Json(ExecutionDetail { execution, steps }))
}
