/// Core workflow type definitions
///
/// Defines workflows, nodes, edges and the execution records the engine writes.
/// Nodes and edges use the camelCase wire shape produced by the editor:
/// `{ "id", "type", "position", "data": { "params": {...} } }`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// One record flowing along an edge
pub type Item = Map<String, Value>;

/// Node parameter mapping (string key -> JSON value)
pub type Params = Map<String, Value>;

/// Name of the implicit output handle
pub const DEFAULT_HANDLE: &str = "default";

/// A complete workflow definition containing nodes and their connections
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Unique workflow identifier
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    /// Inactive workflows keep their webhooks but are never scheduled
    #[serde(default)]
    pub active: bool,
    /// Ordered list of nodes
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Connections between nodes
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Nodes that can originate an execution
    pub fn trigger_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|node| node.kind.is_trigger())
    }

    /// A workflow is runnable once it carries at least one trigger node
    pub fn is_runnable(&self) -> bool {
        self.trigger_nodes().next().is_some()
    }
}

/// A single node in the workflow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique node identifier within the workflow (e.g., "n1", "webhook-start")
    pub id: String,
    /// The type of node which determines execution behavior
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Editor canvas position, ignored by the engine
    #[serde(default)]
    pub position: Position,
    /// Parameters and display data
    #[serde(default)]
    pub data: NodeData,
}

impl Node {
    pub fn params(&self) -> &Params {
        &self.data.params
    }

    /// Read a string parameter, treating empty strings as absent
    pub fn string_param(&self, name: &str) -> Option<&str> {
        self.data
            .params
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub params: Params,
}

/// The fixed set of node types compiled into the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    /// Starts a workflow from the run endpoint
    ManualTrigger,
    /// Starts a workflow on a cron schedule
    /// Expected params: { "cronExpression": "*/5 * * * *" }
    CronTrigger,
    /// Starts a workflow from an inbound webhook request
    /// Expected params: { "path": "orders", "method": "POST" }
    WebhookTrigger,
    /// One outbound HTTP call
    /// Expected params: { "url": "...", "method": "GET", "headers": {...}, "authType": "bearer" }
    HttpRequest,
    /// Sandboxed Lua transformation
    /// Expected params: { "code": "function(items) return items end" }
    Code,
    /// Conditional branching into "true" / "false" outputs
    /// Expected params: { "field": "user.status", "operator": "equals", "value": "ok" }
    If,
    /// Shallow-merge fixed fields into every item
    /// Expected params: { "fields": { "source": "api" } }
    Set,
}

impl NodeKind {
    pub const ALL: [NodeKind; 7] = [
        NodeKind::ManualTrigger,
        NodeKind::CronTrigger,
        NodeKind::WebhookTrigger,
        NodeKind::HttpRequest,
        NodeKind::Code,
        NodeKind::If,
        NodeKind::Set,
    ];

    pub fn is_trigger(self) -> bool {
        matches!(
            self,
            NodeKind::ManualTrigger | NodeKind::CronTrigger | NodeKind::WebhookTrigger
        )
    }

    /// Wire name of the node type
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::ManualTrigger => "manualTrigger",
            NodeKind::CronTrigger => "cronTrigger",
            NodeKind::WebhookTrigger => "webhookTrigger",
            NodeKind::HttpRequest => "httpRequest",
            NodeKind::Code => "code",
            NodeKind::If => "if",
            NodeKind::Set => "set",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    /// Source node ID
    pub source: String,
    /// Target node ID
    pub target: String,
    /// Named output of the source node carried by this edge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    /// Display only, never used for routing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Edge {
    pub fn handle(&self) -> &str {
        self.source_handle
            .as_deref()
            .filter(|handle| !handle.is_empty())
            .unwrap_or(DEFAULT_HANDLE)
    }
}

/// Lifecycle shared by executions and steps: running -> success | failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(RunStatus::Running),
            "success" => Some(RunStatus::Success),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// One run of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub workflow_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Execution {
    /// New execution in the running state
    pub fn start(workflow_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }
}

/// Captured output of a step: the default list or the routed map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepOutput {
    Items(Vec<Item>),
    Routed(std::collections::BTreeMap<String, Vec<Item>>),
}

/// One node visit within an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    pub id: String,
    pub execution_id: String,
    pub node_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub input: Vec<Item>,
    pub output: Option<StepOutput>,
    pub logs: Vec<String>,
    pub error: Option<String>,
}

impl ExecutionStep {
    pub fn start(execution_id: &str, node_id: &str, input: Vec<Item>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            input,
            output: None,
            logs: Vec::new(),
            error: None,
        }
    }

    pub fn succeed(&mut self, output: StepOutput, logs: Vec<String>) {
        self.status = RunStatus::Success;
        self.finished_at = Some(Utc::now());
        self.output = Some(output);
        self.logs = logs;
    }

    pub fn fail(&mut self, error: String, logs: Vec<String>) {
        self.status = RunStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
        self.logs = logs;
    }
}

/// Routing row derived from a webhookTrigger node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEndpoint {
    pub id: String,
    pub workflow_id: String,
    /// Path without leading or trailing slashes
    pub path: String,
    /// Upper-cased HTTP method
    pub method: String,
    pub node_id: String,
}
