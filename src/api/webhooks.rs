/// Webhook execution endpoint
///
/// Any method on /api/webhooks/{*path} is routed by (method, path) to the
/// workflow whose webhookTrigger declared it. The request becomes a single
/// trigger item `{body, headers, query}`.

use crate::api::{ApiError, AppState};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderMap, Method},
    response::Json,
    routing::any,
    Router,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

pub fn create_webhook_routes() -> Router<AppState> {
    Router::new().route("/api/webhooks/{*path}", any(execute_webhook))
}

/// JSON bodies are parsed when the content type says JSON; anything else is null
fn parse_body(headers: &HeaderMap, body: &Bytes) -> Result<Value, ApiError> {
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.to_ascii_lowercase().contains("json"));

    if !is_json || body.is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {}", e)))
}

fn header_map(headers: &HeaderMap) -> Map<String, Value> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.to_string(), Value::String(value.to_string())))
        })
        .collect()
}

/// ANY /api/webhooks/{*path}
async fn execute_webhook(
    State(state): State<AppState>,
    method: Method,
    Path(path): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    tracing::info!("📥 Webhook request received: {} /{}", method, path);

    let payload = parse_body(&headers, &body)?;
    let query: Map<String, Value> = query
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();

    let execution_id = state
        .webhooks
        .dispatch(method.as_str(), &path, payload, header_map(&headers), query)
        .await?;

    Ok(Json(json!({ "executionId": execution_id })))
}
