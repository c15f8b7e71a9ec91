/// FIFO workflow execution engine
///
/// Seeds a work queue with every trigger node, then processes nodes one at a
/// time in arrival order. Each node runs at most once per execution with all
/// items delivered to it before its turn; items arriving afterwards are
/// dropped. Every visit is recorded as an execution step.

use crate::error::{EngineError, NodeError};
use crate::runtime::handlers::{HandlerOutput, NodeRegistry, RunContext};
use crate::workflow::storage::WorkflowStore;
use crate::workflow::types::{Edge, Execution, ExecutionStep, Item, Node, RunStatus, Workflow};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Executes workflows against a store
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    store: WorkflowStore,
    registry: Arc<NodeRegistry>,
}

impl ExecutionEngine {
    pub fn new(store: WorkflowStore, registry: NodeRegistry) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
        }
    }

    pub fn store(&self) -> &WorkflowStore {
        &self.store
    }

    /// Load a stored workflow and run it with no trigger items
    pub async fn run_manual(&self, workflow_id: &str) -> Result<String, EngineError> {
        let workflow = self
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.to_string()))?;

        self.execute(&workflow, Vec::new()).await
    }

    /// Run `workflow`, seeding every trigger node with `trigger_items`
    ///
    /// Returns the execution id. A workflow without trigger nodes fails before
    /// anything is recorded; any later failure is recorded on the execution
    /// and returned.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        trigger_items: Vec<Item>,
    ) -> Result<String, EngineError> {
        if !workflow.is_runnable() {
            return Err(EngineError::NoTriggerNode {
                workflow_id: workflow.id.clone(),
            });
        }

        let execution = Execution::start(&workflow.id);
        self.store.create_execution(&execution).await?;

        tracing::info!(
            "🚀 Starting execution {} of workflow {} ({} nodes, {} edges)",
            execution.id,
            workflow.id,
            workflow.nodes.len(),
            workflow.edges.len()
        );
        let started = std::time::Instant::now();

        let outcome = match self.traverse(&execution, workflow, trigger_items).await {
            Ok(()) => self
                .store
                .finish_execution(&execution.id, RunStatus::Success, None)
                .await
                .map_err(EngineError::from),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                tracing::info!(
                    "🎉 Execution {} completed in {:?}",
                    execution.id,
                    started.elapsed()
                );
                Ok(execution.id)
            }
            Err(e) => {
                let e = match e {
                    EngineError::Store(source) => EngineError::Persist {
                        execution_id: execution.id.clone(),
                        source,
                    },
                    other => other,
                };
                tracing::error!("❌ Execution {} failed: {}", execution.id, e);

                let message = match &e {
                    EngineError::NodeFailed { source, .. } => source.to_string(),
                    other => other.to_string(),
                };
                if let Err(store_error) = self
                    .store
                    .finish_execution(&execution.id, RunStatus::Failed, Some(&message))
                    .await
                {
                    tracing::error!(
                        "❌ Failed to record failure of execution {}: {}",
                        execution.id,
                        store_error
                    );
                }
                Err(e)
            }
        }
    }

    async fn traverse(
        &self,
        execution: &Execution,
        workflow: &Workflow,
        trigger_items: Vec<Item>,
    ) -> Result<(), EngineError> {
        let nodes: HashMap<&str, &Node> = workflow
            .nodes
            .iter()
            .map(|node| (node.id.as_str(), node))
            .collect();

        let mut outgoing: HashMap<&str, Vec<&Edge>> = HashMap::new();
        for edge in &workflow.edges {
            outgoing.entry(edge.source.as_str()).or_default().push(edge);
        }

        let mut pending: HashMap<&str, Vec<Item>> = HashMap::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        for trigger in workflow.trigger_nodes() {
            pending.insert(trigger.id.as_str(), trigger_items.clone());
            queue.push_back(trigger.id.as_str());
        }

        let mut visited: HashSet<&str> = HashSet::new();

        while let Some(node_id) = queue.pop_front() {
            let Some(node) = nodes.get(node_id) else {
                tracing::debug!("⏭️ Skipping unknown node {}", node_id);
                continue;
            };
            if !visited.insert(node_id) {
                continue;
            }

            let input = pending.remove(node_id).unwrap_or_default();
            let output = self.run_node(execution, node, input).await?;

            for edge in outgoing.get(node_id).into_iter().flatten() {
                if !nodes.contains_key(edge.target.as_str()) {
                    tracing::debug!("⏭️ Edge {} targets missing node {}", edge.id, edge.target);
                    continue;
                }
                if visited.contains(edge.target.as_str()) {
                    tracing::debug!(
                        "⏭️ Dropping late items for already processed node {}",
                        edge.target
                    );
                    continue;
                }

                let routed = output.items_for(edge.handle());
                pending
                    .entry(edge.target.as_str())
                    .or_default()
                    .extend(routed);
                queue.push_back(edge.target.as_str());
            }
        }

        Ok(())
    }

    /// Dispatch one node and record its step
    async fn run_node(
        &self,
        execution: &Execution,
        node: &Node,
        input: Vec<Item>,
    ) -> Result<HandlerOutput, EngineError> {
        let handler = self
            .registry
            .get(node.kind)
            .ok_or_else(|| EngineError::UnknownNodeType {
                execution_id: execution.id.clone(),
                node_id: node.id.clone(),
                kind: node.kind,
            })?;

        tracing::debug!(
            "🔧 Running node {} ({}) with {} items",
            node.id,
            node.kind,
            input.len()
        );

        let mut step = ExecutionStep::start(&execution.id, &node.id, input.clone());
        self.store.create_step(&step).await?;

        let mut ctx = RunContext::new(&execution.id, &node.id);
        let result = handler.run(node.params(), input, &mut ctx).await;

        match result {
            Ok(output) => {
                step.succeed(output.clone().into(), ctx.into_logs());
                self.store.finish_step(&step).await?;
                tracing::debug!("✅ Node {} completed", node.id);
                Ok(output)
            }
            Err(error) => {
                step.fail(error.to_string(), ctx.into_logs());
                self.store.finish_step(&step).await?;
                Err(node_failed(execution, node, error))
            }
        }
    }
}

fn node_failed(execution: &Execution, node: &Node, source: NodeError) -> EngineError {
    EngineError::NodeFailed {
        execution_id: execution.id.clone(),
        node_id: node.id.clone(),
        source,
    }
}
