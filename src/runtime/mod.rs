/// Runtime Execution Engine
///
/// This module runs workflows and connects them to their inbound surfaces:
/// - Node handler registry with the built-in node behaviors
/// - Process-isolated Lua runner for Code nodes
/// - FIFO execution engine that records every step
/// - Cron rescheduler and webhook router that start executions

// Node handler contract, registry and built-in handlers
pub mod handlers;

// Sandboxed script runner (host and child sides)
pub mod sandbox;

// FIFO execution engine
pub mod engine;

// Background cron scheduler service for CronTrigger nodes
pub mod scheduler;

// Webhook endpoint derivation and dispatch
pub mod webhooks;

// Re-export main types
pub use engine::ExecutionEngine;
pub use handlers::{HandlerOutput, NodeHandler, NodeRegistry, RunContext};
pub use sandbox::ScriptRunner;
pub use scheduler::CronRescheduler;
pub use webhooks::WebhookRouter;
