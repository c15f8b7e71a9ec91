/// Node definition listing
///
/// GET /api/nodes returns the static schema of every node kind so the editor
/// can render its palette and parameter forms.

use crate::api::AppState;
use crate::workflow::schema::{node_definitions, NodeDefinition};
use axum::{response::Json, routing::get, Router};

pub fn create_node_routes() -> Router<AppState> {
    Router::new().route("/api/nodes", get(list_nodes))
}

async fn list_nodes() -> Json<Vec<NodeDefinition>> {
    Json(node_definitions())
}
