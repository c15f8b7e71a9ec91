/// flowlite: workflow automation engine
///
/// This library provides the workflow engine: typed workflow graphs stored in
/// SQLite, a FIFO execution engine over a registry of node handlers, a
/// process-isolated Lua runner for Code nodes, and cron/webhook triggers.

// Core configuration and setup
pub mod config;

// Error taxonomy shared by the store, engine and API
pub mod error;

// Workflow management layer - definitions, schema, validation and storage
pub mod workflow;

// Runtime execution engine - handlers, sandbox, engine and triggers
pub mod runtime;

// HTTP API layer - REST endpoints for workflow management and webhook triggers
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{EngineError, NodeError, StoreError, ValidationError, WebhookError};
pub use runtime::{CronRescheduler, ExecutionEngine, NodeRegistry, ScriptRunner, WebhookRouter};
pub use server::start_server;
pub use workflow::{Edge, Node, NodeKind, Workflow, WorkflowStore};
