//! Execution graph builder
//!
//! Materializes a stored flow into a petgraph `DiGraph` for one run: every
//! node tagged by kind with its function or integration resolved from the
//! entity store, every edge weighted by its position in the stored edge list
//! so fan-out order stays deterministic. Cycles are allowed here; the walker
//! is responsible for terminating on them.

use crate::error::GraphIntegrityError;
use crate::flow::storage::EntityStore;
use crate::flow::types::{Flow, Function, Integration, NodeKind};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A typed node with its configuration resolved
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub entity_id: String,
    pub spec: NodeSpec,
}

#[derive(Debug, Clone)]
pub enum NodeSpec {
    Device,
    Label,
    Function {
        function: Arc<Function>,
        node_config: Value,
    },
    Integration {
        integration: Arc<Integration>,
        node_config: Value,
    },
}

impl GraphNode {
    pub fn kind(&self) -> NodeKind {
        match self.spec {
            NodeSpec::Device => NodeKind::Device,
            NodeSpec::Label => NodeKind::Label,
            NodeSpec::Function { .. } => NodeKind::Function,
            NodeSpec::Integration { .. } => NodeKind::Integration,
        }
    }
}

/// In-memory form of a flow for the lifetime of one run
#[derive(Debug)]
pub struct ExecutionGraph {
    flow_id: String,
    graph: DiGraph<GraphNode, usize>,
    node_id_to_index: HashMap<String, NodeIndex>,
}

impl ExecutionGraph {
    /// Build and validate the execution graph of `flow`
    ///
    /// Structure is checked before any entity is fetched, so a malformed
    /// flow fails without touching the store.
    pub async fn build(flow: &Flow, store: &dyn EntityStore) -> Result<Self, GraphIntegrityError> {
        tracing::debug!(
            "🏗️ Building execution graph for '{}' with {} nodes and {} edges",
            flow.id,
            flow.nodes.len(),
            flow.edges.len()
        );
        check_structure(flow)?;

        let mut functions: HashMap<String, Arc<Function>> = HashMap::new();
        let mut integrations: HashMap<String, Arc<Integration>> = HashMap::new();
        let mut graph = DiGraph::new();
        let mut node_id_to_index = HashMap::new();

        for node in &flow.nodes {
            let spec = match node.kind {
                NodeKind::Device => NodeSpec::Device,
                NodeKind::Label => NodeSpec::Label,
                NodeKind::Function => {
                    let function = match functions.get(&node.entity_id) {
                        Some(function) => Arc::clone(function),
                        None => {
                            let fetched = store
                                .function(&node.entity_id)
                                .await
                                .map_err(|e| GraphIntegrityError::Store {
                                    node_id: node.id.clone(),
                                    message: e.to_string(),
                                })?
                                .ok_or_else(|| GraphIntegrityError::UnknownFunction {
                                    node_id: node.id.clone(),
                                    function_id: node.entity_id.clone(),
                                })?;
                            let fetched = Arc::new(fetched);
                            functions.insert(node.entity_id.clone(), Arc::clone(&fetched));
                            fetched
                        }
                    };
                    NodeSpec::Function {
                        function,
                        node_config: node.config.clone(),
                    }
                }
                NodeKind::Integration => {
                    let integration = match integrations.get(&node.entity_id) {
                        Some(integration) => Arc::clone(integration),
                        None => {
                            let fetched = store
                                .integration(&node.entity_id)
                                .await
                                .map_err(|e| GraphIntegrityError::Store {
                                    node_id: node.id.clone(),
                                    message: e.to_string(),
                                })?
                                .ok_or_else(|| GraphIntegrityError::UnknownIntegration {
                                    node_id: node.id.clone(),
                                    integration_id: node.entity_id.clone(),
                                })?;
                            let fetched = Arc::new(fetched);
                            integrations.insert(node.entity_id.clone(), Arc::clone(&fetched));
                            fetched
                        }
                    };
                    NodeSpec::Integration {
                        integration,
                        node_config: node.config.clone(),
                    }
                }
            };

            let index = graph.add_node(GraphNode {
                id: node.id.clone(),
                entity_id: node.entity_id.clone(),
                spec,
            });
            node_id_to_index.insert(node.id.clone(), index);
        }

        // Endpoints were checked above, lookups cannot miss
        for (ordinal, edge) in flow.edges.iter().enumerate() {
            if let (Some(&from), Some(&to)) = (
                node_id_to_index.get(&edge.source),
                node_id_to_index.get(&edge.target),
            ) {
                graph.add_edge(from, to, ordinal);
            }
        }

        Ok(Self {
            flow_id: flow.id.clone(),
            graph,
            node_id_to_index,
        })
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    pub fn index_of(&self, node_id: &str) -> Option<NodeIndex> {
        self.node_id_to_index.get(node_id).copied()
    }

    pub fn node(&self, index: NodeIndex) -> &GraphNode {
        &self.graph[index]
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Targets of `index`'s outgoing edges in stored edge order
    pub fn successors(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let mut edges: Vec<(usize, NodeIndex)> = self
            .graph
            .edges(index)
            .map(|edge| (*edge.weight(), edge.target()))
            .collect();
        edges.sort_by_key(|(ordinal, _)| *ordinal);
        edges.into_iter().map(|(_, target)| target).collect()
    }
}

/// Reject duplicate node ids and edges whose endpoints do not exist
fn check_structure(flow: &Flow) -> Result<(), GraphIntegrityError> {
    let mut seen = HashSet::new();
    for node in &flow.nodes {
        if !seen.insert(node.id.as_str()) {
            return Err(GraphIntegrityError::DuplicateNode(node.id.clone()));
        }
    }

    for edge in &flow.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !seen.contains(endpoint.as_str()) {
                tracing::error!(
                    "❌ Flow '{}' edge {} -> {} references unknown node '{}'",
                    flow.id,
                    edge.source,
                    edge.target,
                    endpoint
                );
                return Err(GraphIntegrityError::DanglingEdge {
                    source_id: edge.source.clone(),
                    target_id: edge.target.clone(),
                    missing: endpoint.clone(),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::connect_in_memory;
    use crate::flow::storage::SqliteEntityStore;
    use crate::flow::types::{FlowEdge, FlowNode, IntegrationKind};
    use serde_json::json;

    fn node(id: &str, kind: NodeKind, entity_id: &str) -> FlowNode {
        FlowNode {
            id: id.to_string(),
            kind,
            entity_id: entity_id.to_string(),
            config: Value::Null,
        }
    }

    fn edge(source: &str, target: &str) -> FlowEdge {
        FlowEdge {
            source: source.to_string(),
            target: target.to_string(),
        }
    }

    async fn seeded_store() -> SqliteEntityStore {
        let store = SqliteEntityStore::new(connect_in_memory().await.unwrap());
        store
            .save_function(&Function {
                id: "fn-1".to_string(),
                name: "noop".to_string(),
                code: "return payload".to_string(),
                parameters: vec![],
                config: json!({}),
            })
            .await
            .unwrap();
        store
            .save_integration(&Integration {
                id: "int-1".to_string(),
                name: "hook".to_string(),
                kind: IntegrationKind::Http,
                config: json!({"url": "http://localhost/hook"}),
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn successors_follow_stored_edge_order() {
        let store = seeded_store().await;
        let flow = Flow {
            id: "flow".to_string(),
            name: "flow".to_string(),
            nodes: vec![
                node("t", NodeKind::Device, "dev-1"),
                node("c", NodeKind::Integration, "int-1"),
                node("a", NodeKind::Function, "fn-1"),
                node("b", NodeKind::Function, "fn-1"),
            ],
            edges: vec![edge("t", "c"), edge("t", "a"), edge("t", "b"), edge("a", "c")],
        };

        let graph = ExecutionGraph::build(&flow, &store).await.unwrap();
        let trigger = graph.index_of("t").unwrap();
        let order: Vec<&str> = graph
            .successors(trigger)
            .into_iter()
            .map(|index| graph.node(index).id.as_str())
            .collect();

        assert_eq!(order, vec!["c", "a", "b"]);
        assert_eq!(graph.node(graph.index_of("a").unwrap()).kind(), NodeKind::Function);
        assert_eq!(graph.node_count(), 4);
    }

    #[tokio::test]
    async fn cycles_are_accepted() {
        let store = seeded_store().await;
        let flow = Flow {
            id: "loop".to_string(),
            name: "loop".to_string(),
            nodes: vec![node("t", NodeKind::Label, "lbl-1"), node("f", NodeKind::Function, "fn-1")],
            edges: vec![edge("t", "f"), edge("f", "t")],
        };

        assert!(ExecutionGraph::build(&flow, &store).await.is_ok());
    }

    #[tokio::test]
    async fn dangling_edge_fails_integrity() {
        let store = seeded_store().await;
        let flow = Flow {
            id: "broken".to_string(),
            name: "broken".to_string(),
            nodes: vec![node("t", NodeKind::Device, "dev-1")],
            edges: vec![edge("t", "ghost")],
        };

        let err = ExecutionGraph::build(&flow, &store).await.unwrap_err();
        assert!(matches!(err, GraphIntegrityError::DanglingEdge { ref missing, .. } if missing == "ghost"));
    }

    #[tokio::test]
    async fn duplicate_nodes_and_missing_entities_fail_integrity() {
        let store = seeded_store().await;
        let duplicated = Flow {
            id: "dup".to_string(),
            name: "dup".to_string(),
            nodes: vec![node("t", NodeKind::Device, "dev-1"), node("t", NodeKind::Label, "lbl-1")],
            edges: vec![],
        };
        assert!(matches!(
            ExecutionGraph::build(&duplicated, &store).await.unwrap_err(),
            GraphIntegrityError::DuplicateNode(_)
        ));

        let missing = Flow {
            id: "missing".to_string(),
            name: "missing".to_string(),
            nodes: vec![node("t", NodeKind::Device, "dev-1"), node("i", NodeKind::Integration, "nope")],
            edges: vec![edge("t", "i")],
        };
        assert!(matches!(
            ExecutionGraph::build(&missing, &store).await.unwrap_err(),
            GraphIntegrityError::UnknownIntegration { .. }
        ));
    }
}
