/// Workflow Management Layer
///
/// This module handles workflow definitions, node schemas, validation and persistence:
/// - Type definitions (Workflow, Node, Edge, Execution records)
/// - Static node parameter schema served to the editor
/// - Save-time validation (ids, edges, cycles, required params)
/// - SQLite persistence with sqlx

// Core workflow type definitions
pub mod types;

// Node definitions and parameter schema
pub mod schema;

// Structural and parameter validation
pub mod validate;

// SQLite persistence layer for workflows and executions
pub mod storage;

// Re-export commonly used types
pub use storage::WorkflowStore;
pub use types::{
    Edge, Execution, ExecutionStep, Item, Node, NodeKind, Params, RunStatus, StepOutput,
    WebhookEndpoint, Workflow,
};
pub use validate::validate_workflow;
