/// Save-time workflow validation
///
/// Checks node id uniqueness, edge endpoints, acyclicity (petgraph toposort)
/// and required node parameters. The store re-runs the structural checks
/// whenever it decodes a stored workflow.

use crate::error::ValidationError;
use crate::workflow::types::Workflow;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// Full validation: structure, cycles and parameters
pub fn validate_workflow(workflow: &Workflow) -> Result<(), ValidationError> {
    validate_structure(workflow)?;
    validate_acyclic(workflow)?;
    validate_params(workflow)?;
    Ok(())
}

/// Unique node ids and edges that point at existing nodes
pub fn validate_structure(workflow: &Workflow) -> Result<(), ValidationError> {
    let mut seen = std::collections::HashSet::new();
    for node in &workflow.nodes {
        if !seen.insert(node.id.as_str()) {
            return Err(ValidationError::DuplicateNode(node.id.clone()));
        }
    }

    for edge in &workflow.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !seen.contains(endpoint.as_str()) {
                return Err(ValidationError::UnknownEdgeEndpoint {
                    edge_id: edge.id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
    }

    Ok(())
}

/// Reject graphs the FIFO traversal could re-enter
pub fn validate_acyclic(workflow: &Workflow) -> Result<(), ValidationError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut node_id_to_index: HashMap<&str, NodeIndex> = HashMap::new();

    for node in &workflow.nodes {
        let index = graph.add_node(node.id.as_str());
        node_id_to_index.insert(node.id.as_str(), index);
    }

    for edge in &workflow.edges {
        if let (Some(&from), Some(&to)) = (
            node_id_to_index.get(edge.source.as_str()),
            node_id_to_index.get(edge.target.as_str()),
        ) {
            graph.add_edge(from, to, ());
        }
    }

    toposort(&graph, None)
        .map(|_| ())
        .map_err(|cycle| ValidationError::Cycle(graph[cycle.node_id()].to_string()))
}

/// Required parameters present and of the declared primitive type
pub fn validate_params(workflow: &Workflow) -> Result<(), ValidationError> {
    for node in &workflow.nodes {
        let definition = node.kind.definition();
        for spec in &definition.params {
            match node.params().get(spec.name) {
                None | Some(serde_json::Value::Null) => {
                    if spec.required {
                        return Err(ValidationError::MissingParameter {
                            node_id: node.id.clone(),
                            kind: node.kind,
                            param: spec.name,
                        });
                    }
                }
                Some(value) => {
                    if !spec.param_type.accepts(value) {
                        return Err(ValidationError::WrongParameterType {
                            node_id: node.id.clone(),
                            param: spec.name,
                            expected: spec.param_type.describe(),
                        });
                    }
                    if spec.required && value.as_str().is_some_and(|s| s.trim().is_empty()) {
                        return Err(ValidationError::MissingParameter {
                            node_id: node.id.clone(),
                            kind: node.kind,
                            param: spec.name,
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workflow(value: serde_json::Value) -> Workflow {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn accepts_a_simple_chain() {
        let wf = workflow(json!({
            "id": "wf", "name": "chain",
            "nodes": [
                { "id": "t", "type": "manualTrigger" },
                { "id": "s", "type": "set", "data": { "params": { "fields": { "x": 1 } } } }
            ],
            "edges": [{ "id": "e1", "source": "t", "target": "s" }]
        }));
        assert_eq!(validate_workflow(&wf), Ok(()));
    }

    #[test]
    fn rejects_duplicate_node_ids() {
        let wf = workflow(json!({
            "id": "wf", "name": "dup",
            "nodes": [
                { "id": "t", "type": "manualTrigger" },
                { "id": "t", "type": "manualTrigger" }
            ]
        }));
        assert_eq!(
            validate_workflow(&wf),
            Err(ValidationError::DuplicateNode("t".into()))
        );
    }

    #[test]
    fn rejects_dangling_edges() {
        let wf = workflow(json!({
            "id": "wf", "name": "dangling",
            "nodes": [{ "id": "t", "type": "manualTrigger" }],
            "edges": [{ "id": "e1", "source": "t", "target": "missing" }]
        }));
        assert!(matches!(
            validate_workflow(&wf),
            Err(ValidationError::UnknownEdgeEndpoint { .. })
        ));
    }

    #[test]
    fn rejects_cycles() {
        let wf = workflow(json!({
            "id": "wf", "name": "loop",
            "nodes": [
                { "id": "t", "type": "manualTrigger" },
                { "id": "a", "type": "set", "data": { "params": { "fields": {} } } },
                { "id": "b", "type": "set", "data": { "params": { "fields": {} } } }
            ],
            "edges": [
                { "id": "e1", "source": "t", "target": "a" },
                { "id": "e2", "source": "a", "target": "b" },
                { "id": "e3", "source": "b", "target": "a" }
            ]
        }));
        assert!(matches!(validate_workflow(&wf), Err(ValidationError::Cycle(_))));
    }

    #[test]
    fn rejects_missing_required_params() {
        let wf = workflow(json!({
            "id": "wf", "name": "http",
            "nodes": [{ "id": "h", "type": "httpRequest", "data": { "params": { "url": " " } } }]
        }));
        assert!(matches!(
            validate_workflow(&wf),
            Err(ValidationError::MissingParameter { param: "url", .. })
        ));
    }

    #[test]
    fn rejects_wrongly_typed_params() {
        let wf = workflow(json!({
            "id": "wf", "name": "code",
            "nodes": [{ "id": "c", "type": "code", "data": { "params": { "code": 42 } } }]
        }));
        assert!(matches!(
            validate_workflow(&wf),
            Err(ValidationError::WrongParameterType { param: "code", .. })
        ));
    }
}
