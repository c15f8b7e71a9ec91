/// Node handler registry and the built-in node handlers
///
/// Every node kind maps to one [`NodeHandler`]. Handlers receive the node's
/// parameters, the items accumulated for it, and a [`RunContext`] used for
/// log capture and correlation. They return either a single default list or
/// a map of named outputs used for branching.

use crate::error::NodeError;
use crate::runtime::sandbox::ScriptRunner;
use crate::workflow::types::{Item, NodeKind, Params, StepOutput};
use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Per-dispatch context handed to a handler
#[derive(Debug, Clone)]
pub struct RunContext {
    pub execution_id: String,
    pub node_id: String,
    logs: Vec<String>,
}

impl RunContext {
    pub fn new(execution_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            node_id: node_id.into(),
            logs: Vec::new(),
        }
    }

    /// Capture a diagnostic line on the current step
    pub fn log(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::debug!("📝 [{}/{}] {}", self.execution_id, self.node_id, line);
        self.logs.push(line);
    }

    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    pub fn into_logs(self) -> Vec<String> {
        self.logs
    }
}

/// What a handler produced
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutput {
    /// Single implicit output sent along every outgoing edge
    Default(Vec<Item>),
    /// Named outputs selected by each edge's `sourceHandle`
    Routed(BTreeMap<String, Vec<Item>>),
}

impl HandlerOutput {
    /// Items carried by an edge leaving through `handle`
    pub fn items_for(&self, handle: &str) -> Vec<Item> {
        match self {
            HandlerOutput::Default(items) => items.clone(),
            HandlerOutput::Routed(outputs) => outputs.get(handle).cloned().unwrap_or_default(),
        }
    }
}

impl From<HandlerOutput> for StepOutput {
    fn from(output: HandlerOutput) -> Self {
        match output {
            HandlerOutput::Default(items) => StepOutput::Items(items),
            HandlerOutput::Routed(outputs) => StepOutput::Routed(outputs),
        }
    }
}

/// Behavior of one node kind
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn run(
        &self,
        params: &Params,
        items: Vec<Item>,
        ctx: &mut RunContext,
    ) -> Result<HandlerOutput, NodeError>;
}

/// Mapping from node kind to handler
#[derive(Clone, Default)]
pub struct NodeRegistry {
    handlers: HashMap<NodeKind, Arc<dyn NodeHandler>>,
}

impl NodeRegistry {
    /// Registry with no handlers; see [`NodeRegistry::register`]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with a handler for every built-in kind
    pub fn builtin(runner: ScriptRunner) -> Self {
        Self::empty()
            .register(NodeKind::ManualTrigger, PassThrough)
            .register(NodeKind::CronTrigger, PassThrough)
            .register(NodeKind::WebhookTrigger, PassThrough)
            .register(NodeKind::HttpRequest, HttpRequestHandler::new())
            .register(NodeKind::Code, CodeHandler::new(runner))
            .register(NodeKind::If, IfHandler)
            .register(NodeKind::Set, SetHandler)
    }

    pub fn register(mut self, kind: NodeKind, handler: impl NodeHandler + 'static) -> Self {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    pub fn get(&self, kind: NodeKind) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: NodeKind) -> bool {
        self.handlers.contains_key(&kind)
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Trigger nodes forward their trigger items unchanged
pub struct PassThrough;

#[async_trait]
impl NodeHandler for PassThrough {
    async fn run(
        &self,
        _params: &Params,
        items: Vec<Item>,
        _ctx: &mut RunContext,
    ) -> Result<HandlerOutput, NodeError> {
        Ok(HandlerOutput::Default(items))
    }
}

/// One outbound HTTP call per dispatch
///
/// Expected params: { "url": "...", "method": "POST", "headers": {...}, "query": {...},
///                    "body": {...}, "authType": "bearer", "authToken": "..." }
pub struct HttpRequestHandler {
    client: reqwest::Client,
}

impl HttpRequestHandler {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn string_param<'a>(params: &'a Params, name: &str) -> Option<&'a str> {
    params
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// Header and query values: strings as-is, anything else JSON-encoded
fn string_pairs(params: &Params, name: &str) -> Vec<(String, String)> {
    params
        .get(name)
        .and_then(Value::as_object)
        .map(|object| {
            object
                .iter()
                .map(|(key, value)| {
                    let value = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (key.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl NodeHandler for HttpRequestHandler {
    async fn run(
        &self,
        params: &Params,
        _items: Vec<Item>,
        ctx: &mut RunContext,
    ) -> Result<HandlerOutput, NodeError> {
        let url = string_param(params, "url").ok_or(NodeError::MissingParameter {
            kind: NodeKind::HttpRequest,
            param: "url",
        })?;
        let method = string_param(params, "method")
            .unwrap_or("GET")
            .to_uppercase();
        let method = match method.as_str() {
            "GET" | "POST" | "PUT" | "PATCH" | "DELETE" | "HEAD" | "OPTIONS" => {
                reqwest::Method::from_bytes(method.as_bytes()).map_err(|e| {
                    NodeError::InvalidParameter {
                        kind: NodeKind::HttpRequest,
                        param: "method",
                        reason: e.to_string(),
                    }
                })?
            }
            other => {
                return Err(NodeError::InvalidParameter {
                    kind: NodeKind::HttpRequest,
                    param: "method",
                    reason: format!("unsupported HTTP method '{}'", other),
                })
            }
        };

        let mut headers = string_pairs(params, "headers");
        match string_param(params, "authType") {
            Some("basic") => {
                let credentials = format!(
                    "{}:{}",
                    params.get("authUsername").and_then(Value::as_str).unwrap_or(""),
                    params.get("authPassword").and_then(Value::as_str).unwrap_or("")
                );
                let token = base64::engine::general_purpose::STANDARD.encode(credentials);
                headers.retain(|(key, _)| !key.eq_ignore_ascii_case("authorization"));
                headers.push(("Authorization".into(), format!("Basic {}", token)));
            }
            Some("bearer") => {
                let token = params.get("authToken").and_then(Value::as_str).unwrap_or("");
                headers.retain(|(key, _)| !key.eq_ignore_ascii_case("authorization"));
                headers.push(("Authorization".into(), format!("Bearer {}", token)));
            }
            Some(other) => {
                return Err(NodeError::InvalidParameter {
                    kind: NodeKind::HttpRequest,
                    param: "authType",
                    reason: format!("expected basic or bearer, got '{}'", other),
                })
            }
            None => {}
        }

        tracing::debug!("🌍 HTTP Request: {} {}", method, url);

        let mut request = self.client.request(method.clone(), url);
        for (key, value) in &headers {
            request = request.header(key.as_str(), value.as_str());
        }
        let query = string_pairs(params, "query");
        if !query.is_empty() {
            request = request.query(&query);
        }
        if let Some(body) = params.get("body").filter(|body| !body.is_null()) {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let response_headers: serde_json::Map<String, Value> = response
            .headers()
            .iter()
            .filter_map(|(key, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (key.to_string(), Value::String(value.to_string())))
            })
            .collect();
        let body = response.bytes().await?;

        let mut item = Item::new();
        item.insert("status".into(), json!(status.as_u16()));
        if body.is_empty() {
            item.insert("data".into(), Value::Null);
        } else {
            match serde_json::from_slice::<Value>(&body) {
                Ok(data) => {
                    item.insert("data".into(), data);
                }
                Err(e) => {
                    ctx.log(format!("Response body is not JSON: {}", e));
                    item.insert("data".into(), Value::Null);
                    item.insert(
                        "note".into(),
                        json!(format!("non-JSON response body ({} bytes)", body.len())),
                    );
                }
            }
        }
        item.insert("headers".into(), Value::Object(response_headers));

        tracing::info!("✅ HTTP request completed: {} {} (status: {})", method, url, status);
        Ok(HandlerOutput::Default(vec![item]))
    }
}

/// Sandboxed Lua transformation
pub struct CodeHandler {
    runner: ScriptRunner,
}

impl CodeHandler {
    pub fn new(runner: ScriptRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl NodeHandler for CodeHandler {
    async fn run(
        &self,
        params: &Params,
        items: Vec<Item>,
        ctx: &mut RunContext,
    ) -> Result<HandlerOutput, NodeError> {
        let code = string_param(params, "code").ok_or(NodeError::MissingParameter {
            kind: NodeKind::Code,
            param: "code",
        })?;

        let output = self.runner.run(code, items, ctx).await?;
        Ok(HandlerOutput::Default(output))
    }
}

/// Walk a dot-separated path through nested objects
///
/// A missing key, a JSON null or a non-object intermediate all resolve to
/// `None`.
pub fn lookup_path<'a>(item: &'a Item, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = item.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    (!current.is_null()).then_some(current)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Equals,
    NotEquals,
    Exists,
}

/// Partition items into the "true" and "false" outputs
///
/// Expected params: { "field": "user.status", "operator": "equals", "value": "active" }
pub struct IfHandler;

#[async_trait]
impl NodeHandler for IfHandler {
    async fn run(
        &self,
        params: &Params,
        items: Vec<Item>,
        _ctx: &mut RunContext,
    ) -> Result<HandlerOutput, NodeError> {
        let field = string_param(params, "field").ok_or(NodeError::MissingParameter {
            kind: NodeKind::If,
            param: "field",
        })?;
        let operator = match string_param(params, "operator").unwrap_or("equals") {
            "equals" => Operator::Equals,
            "notEquals" => Operator::NotEquals,
            "exists" => Operator::Exists,
            other => {
                return Err(NodeError::InvalidParameter {
                    kind: NodeKind::If,
                    param: "operator",
                    reason: format!("unknown operator '{}'", other),
                })
            }
        };
        let expected = params.get("value").filter(|value| !value.is_null());

        let mut truthy = Vec::new();
        let mut falsy = Vec::new();
        for item in items {
            let actual = lookup_path(&item, field);
            let matched = match operator {
                Operator::Exists => actual.is_some(),
                Operator::Equals => actual == expected,
                Operator::NotEquals => actual != expected,
            };
            if matched {
                truthy.push(item);
            } else {
                falsy.push(item);
            }
        }

        let mut outputs = BTreeMap::new();
        outputs.insert("true".to_string(), truthy);
        outputs.insert("false".to_string(), falsy);
        Ok(HandlerOutput::Routed(outputs))
    }
}

/// Shallow-merge fixed fields into every item
pub struct SetHandler;

#[async_trait]
impl NodeHandler for SetHandler {
    async fn run(
        &self,
        params: &Params,
        items: Vec<Item>,
        _ctx: &mut RunContext,
    ) -> Result<HandlerOutput, NodeError> {
        let fields = match params.get("fields") {
            Some(Value::Object(fields)) => fields,
            None | Some(Value::Null) => {
                return Err(NodeError::MissingParameter {
                    kind: NodeKind::Set,
                    param: "fields",
                })
            }
            Some(_) => {
                return Err(NodeError::InvalidParameter {
                    kind: NodeKind::Set,
                    param: "fields",
                    reason: "must be an object".into(),
                })
            }
        };

        let output = items
            .into_iter()
            .map(|mut item| {
                for (key, value) in fields {
                    item.insert(key.clone(), value.clone());
                }
                item
            })
            .collect();

        Ok(HandlerOutput::Default(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Query,
        http::HeaderMap,
        routing::{get, post},
        Json, Router,
    };
    use std::collections::HashMap as StdHashMap;

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    fn items(value: Value) -> Vec<Item> {
        serde_json::from_value(value).unwrap()
    }

    fn ctx() -> RunContext {
        RunContext::new("exec-1", "node-1")
    }

    #[tokio::test]
    async fn triggers_pass_items_through() {
        let input = items(json!([{ "a": 1 }]));
        let output = PassThrough
            .run(&Params::new(), input.clone(), &mut ctx())
            .await
            .unwrap();
        assert_eq!(output, HandlerOutput::Default(input));
    }

    #[tokio::test]
    async fn set_merges_fields_over_items() {
        let output = SetHandler
            .run(
                &params(json!({ "fields": { "b": 2, "a": "new" } })),
                items(json!([{ "a": 1 }, { "c": 3 }])),
                &mut ctx(),
            )
            .await
            .unwrap();

        assert_eq!(
            output,
            HandlerOutput::Default(items(json!([
                { "a": "new", "b": 2 },
                { "c": 3, "a": "new", "b": 2 }
            ])))
        );
    }

    #[tokio::test]
    async fn set_requires_fields() {
        let result = SetHandler.run(&Params::new(), vec![], &mut ctx()).await;
        assert!(matches!(result, Err(NodeError::MissingParameter { param: "fields", .. })));
    }

    #[tokio::test]
    async fn if_partitions_every_item() {
        let input = items(json!([
            { "user": { "status": "active" } },
            { "user": { "status": "banned" } },
            { "user": "flat" },
            {}
        ]));

        let output = IfHandler
            .run(
                &params(json!({ "field": "user.status", "value": "active" })),
                input,
                &mut ctx(),
            )
            .await
            .unwrap();

        assert_eq!(output.items_for("true").len(), 1);
        assert_eq!(output.items_for("false").len(), 3);
        assert!(output.items_for("default").is_empty());
    }

    #[tokio::test]
    async fn if_exists_ignores_nulls() {
        let output = IfHandler
            .run(
                &params(json!({ "field": "a", "operator": "exists" })),
                items(json!([{ "a": 0 }, { "a": null }, { "b": 1 }])),
                &mut ctx(),
            )
            .await
            .unwrap();

        assert_eq!(output.items_for("true"), items(json!([{ "a": 0 }])));
        assert_eq!(output.items_for("false").len(), 2);
    }

    #[tokio::test]
    async fn if_absent_value_equals_absent_field() {
        let output = IfHandler
            .run(
                &params(json!({ "field": "missing", "operator": "equals" })),
                items(json!([{ "a": 1 }])),
                &mut ctx(),
            )
            .await
            .unwrap();
        assert_eq!(output.items_for("true").len(), 1);
    }

    #[tokio::test]
    async fn if_rejects_unknown_operator() {
        let result = IfHandler
            .run(
                &params(json!({ "field": "a", "operator": "greaterThan" })),
                vec![],
                &mut ctx(),
            )
            .await;
        assert!(matches!(result, Err(NodeError::InvalidParameter { param: "operator", .. })));
    }

    #[test]
    fn lookup_path_walks_objects_only() {
        let item = items(json!([{ "a": { "b": { "c": 1 } }, "list": [1] }])).remove(0);
        assert_eq!(lookup_path(&item, "a.b.c"), Some(&json!(1)));
        assert_eq!(lookup_path(&item, "a.x.c"), None);
        assert_eq!(lookup_path(&item, "list.0"), None);
    }

    #[test]
    fn registry_dispatches_by_kind() {
        let registry = NodeRegistry::empty().register(NodeKind::Set, SetHandler);
        assert!(registry.contains(NodeKind::Set));
        assert!(registry.get(NodeKind::Code).is_none());

        let builtin = NodeRegistry::builtin(ScriptRunner::new("flowlite-sandbox"));
        assert!(NodeKind::ALL.iter().all(|kind| builtin.contains(*kind)));
    }

    async fn spawn_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn http_request_sends_auth_query_and_body() {
        let app = Router::new()
            .route(
                "/echo",
                post(
                    |headers: HeaderMap,
                     Query(query): Query<StdHashMap<String, String>>,
                     Json(body): Json<Value>| async move {
                        Json(json!({
                            "auth": headers.get("authorization").and_then(|v| v.to_str().ok()),
                            "trace": headers.get("x-trace").and_then(|v| v.to_str().ok()),
                            "page": query.get("page"),
                            "body": body,
                        }))
                    },
                ),
            )
            .route("/text", get(|| async { "plain text" }))
            .route("/empty", get(|| async { "" }));
        let base = spawn_server(app).await;
        let handler = HttpRequestHandler::new();

        let output = handler
            .run(
                &params(json!({
                    "url": format!("{}/echo", base),
                    "method": "post",
                    "headers": { "X-Trace": "abc" },
                    "query": { "page": 2 },
                    "body": { "hello": "world" },
                    "authType": "basic",
                    "authUsername": "user",
                    "authPassword": "pass"
                })),
                vec![],
                &mut ctx(),
            )
            .await
            .unwrap();

        let item = output.items_for("default").remove(0);
        assert_eq!(item["status"], 200);
        assert_eq!(item["data"]["auth"], "Basic dXNlcjpwYXNz");
        assert_eq!(item["data"]["trace"], "abc");
        assert_eq!(item["data"]["page"], "2");
        assert_eq!(item["data"]["body"], json!({ "hello": "world" }));
        assert!(item["headers"].is_object());

        let mut text_ctx = ctx();
        let output = handler
            .run(&params(json!({ "url": format!("{}/text", base) })), vec![], &mut text_ctx)
            .await
            .unwrap();
        let item = output.items_for("default").remove(0);
        assert_eq!(item["data"], Value::Null);
        assert!(item.contains_key("note"));
        assert_eq!(text_ctx.logs().len(), 1);

        let output = handler
            .run(&params(json!({ "url": format!("{}/empty", base) })), vec![], &mut ctx())
            .await
            .unwrap();
        let item = output.items_for("default").remove(0);
        assert_eq!(item["data"], Value::Null);
        assert!(!item.contains_key("note"));
    }

    #[tokio::test]
    async fn http_request_rejects_unknown_method() {
        let result = HttpRequestHandler::new()
            .run(
                &params(json!({ "url": "http://127.0.0.1:9", "method": "FETCH" })),
                vec![],
                &mut ctx(),
            )
            .await;
        assert!(matches!(result, Err(NodeError::InvalidParameter { param: "method", .. })));
    }

    #[tokio::test]
    async fn http_request_requires_url() {
        let result = HttpRequestHandler::new()
            .run(&Params::new(), vec![], &mut ctx())
            .await;
        assert!(matches!(result, Err(NodeError::MissingParameter { param: "url", .. })));
    }
}
