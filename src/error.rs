/// Error taxonomy for the engine
///
/// Configuration errors (no trigger, unknown node type) abort an execution,
/// node errors are recorded on the failing step, store errors come from the
/// persistence layer. The server and binaries wrap all of these in anyhow.

use crate::workflow::types::NodeKind;
use thiserror::Error;

/// Persistence failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to encode record: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A stored record that no longer decodes or validates
    #[error("corrupt {table} record '{id}': {reason}")]
    Corrupt {
        table: &'static str,
        id: String,
        reason: String,
    },
}

/// Structural problems found before a workflow is saved
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("edge '{edge_id}' references unknown node '{node_id}'")]
    UnknownEdgeEndpoint { edge_id: String, node_id: String },

    #[error("workflow contains a cycle through node '{0}'")]
    Cycle(String),

    #[error("node '{node_id}' ({kind}) is missing required parameter '{param}'")]
    MissingParameter {
        node_id: String,
        kind: NodeKind,
        param: &'static str,
    },

    #[error("node '{node_id}' parameter '{param}' must be {expected}")]
    WrongParameterType {
        node_id: String,
        param: &'static str,
        expected: &'static str,
    },
}

/// Failures raised by a node handler
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("{kind} node requires {param}")]
    MissingParameter { kind: NodeKind, param: &'static str },

    #[error("{kind} node parameter '{param}' is invalid: {reason}")]
    InvalidParameter {
        kind: NodeKind,
        param: &'static str,
        reason: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The script raised inside the sandbox
    #[error("{0}")]
    Script(String),

    #[error("Code node timed out")]
    Timeout,

    #[error("Code node must return a list of items")]
    NonListReturn,

    /// The sandbox process could not be spawned or misbehaved
    #[error("sandbox failure: {0}")]
    Sandbox(String),
}

/// Failures of a whole execution
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Workflow '{workflow_id}' has no trigger node")]
    NoTriggerNode { workflow_id: String },

    #[error("No handler for node type {kind} (node '{node_id}')")]
    UnknownNodeType {
        execution_id: String,
        node_id: String,
        kind: NodeKind,
    },

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("node '{node_id}' failed: {source}")]
    NodeFailed {
        execution_id: String,
        node_id: String,
        #[source]
        source: NodeError,
    },

    /// The store failed after the execution record was created
    #[error("execution '{execution_id}' could not be recorded: {source}")]
    Persist {
        execution_id: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Execution id recorded for this failure, if one was created
    pub fn execution_id(&self) -> Option<&str> {
        match self {
            EngineError::UnknownNodeType { execution_id, .. }
            | EngineError::NodeFailed { execution_id, .. }
            | EngineError::Persist { execution_id, .. } => Some(execution_id),
            _ => None,
        }
    }
}

/// Failures of an inbound webhook dispatch
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("no webhook registered for {method} /{path}")]
    NotFound { method: String, path: String },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
