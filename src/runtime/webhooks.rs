/// Webhook routing
///
/// Derives (path, method) endpoints from webhookTrigger nodes, keeps them in
/// the store, and turns inbound requests into executions.

use crate::error::{EngineError, StoreError, WebhookError};
use crate::runtime::engine::ExecutionEngine;
use crate::workflow::types::{Item, NodeKind, WebhookEndpoint, Workflow};
use serde_json::{Map, Value};

/// Strip leading and trailing slashes from a webhook path
pub fn normalize_path(path: &str) -> &str {
    path.trim().trim_matches('/')
}

/// One endpoint per webhookTrigger node with a non-empty path
pub fn endpoints_for(workflow: &Workflow) -> Vec<WebhookEndpoint> {
    workflow
        .nodes
        .iter()
        .filter(|node| node.kind == NodeKind::WebhookTrigger)
        .filter_map(|node| {
            let path = normalize_path(node.string_param("path")?);
            if path.is_empty() {
                return None;
            }
            let method = node.string_param("method").unwrap_or("POST").trim().to_uppercase();

            Some(WebhookEndpoint {
                id: uuid::Uuid::new_v4().to_string(),
                workflow_id: workflow.id.clone(),
                path: path.to_string(),
                method,
                node_id: node.id.clone(),
            })
        })
        .collect()
}

/// Routes inbound webhook requests to workflow executions
#[derive(Debug, Clone)]
pub struct WebhookRouter {
    engine: ExecutionEngine,
}

impl WebhookRouter {
    pub fn new(engine: ExecutionEngine) -> Self {
        Self { engine }
    }

    /// Replace the stored endpoints of `workflow` with the ones it declares
    ///
    /// When another workflow already owns a (path, method) pair, the earlier
    /// registration keeps winning and a warning is logged.
    pub async fn sync(&self, workflow: &Workflow) -> Result<Vec<WebhookEndpoint>, StoreError> {
        let endpoints = endpoints_for(workflow);
        let store = self.engine.store();
        store
            .replace_webhook_endpoints(&workflow.id, &endpoints)
            .await?;

        for endpoint in &endpoints {
            if let Some(owner) = store
                .find_webhook_endpoint(&endpoint.path, &endpoint.method)
                .await?
            {
                if owner.workflow_id != workflow.id {
                    tracing::warn!(
                        "⚠️ Webhook {} /{} of workflow {} is shadowed by workflow {}",
                        endpoint.method,
                        endpoint.path,
                        workflow.id,
                        owner.workflow_id
                    );
                }
            }
        }

        tracing::debug!(
            "🔗 Synced {} webhook endpoints for workflow {}",
            endpoints.len(),
            workflow.id
        );
        Ok(endpoints)
    }

    /// Run the workflow registered for (method, path) with one trigger item
    /// `{body, headers, query}`
    pub async fn dispatch(
        &self,
        method: &str,
        path: &str,
        body: Value,
        headers: Map<String, Value>,
        query: Map<String, Value>,
    ) -> Result<String, WebhookError> {
        let method = method.to_uppercase();
        let path = normalize_path(path);

        let endpoint = self
            .engine
            .store()
            .find_webhook_endpoint(path, &method)
            .await?
            .ok_or_else(|| WebhookError::NotFound {
                method: method.clone(),
                path: path.to_string(),
            })?;

        let workflow = self
            .engine
            .store()
            .get_workflow(&endpoint.workflow_id)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound(endpoint.workflow_id.clone()))?;

        tracing::info!(
            "📥 Webhook {} /{} -> workflow {} (node {})",
            method,
            path,
            workflow.id,
            endpoint.node_id
        );

        let mut item = Item::new();
        item.insert("body".into(), body);
        item.insert("headers".into(), Value::Object(headers));
        item.insert("query".into(), Value::Object(query));

        Ok(self.engine.execute(&workflow, vec![item]).await?)
    }
}
