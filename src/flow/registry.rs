//! Hot-reload flow registry using ArcSwap
//!
//! Provides lock-free, atomic updates to the in-memory flow registry. Each
//! update swaps the entire registry pointer, so runs already resolving against
//! the previous snapshot continue uninterrupted.

use crate::flow::{
    storage::EntityStore,
    types::{Flow, NodeKind},
};
use anyhow::Result;
use arc_swap::ArcSwap;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

/// Lock-free flow registry
///
/// Key: flow_id, Value: compiled flow. The registry is the source the Flow
/// Resolver matches triggering devices against.
pub struct FlowRegistry {
    flows: ArcSwap<BTreeMap<String, CompiledFlow>>,
    store: Arc<dyn EntityStore>,
}

/// Flow with its trigger nodes indexed by referenced device/label
///
/// Device ids and label ids live in separate namespaces, so the index key
/// carries the node kind.
#[derive(Debug, Clone)]
pub struct CompiledFlow {
    /// Base flow definition
    pub flow: Arc<Flow>,
    /// (kind, entity id) -> trigger node ids referencing it, in node order
    pub triggers: HashMap<(NodeKind, String), Vec<String>>,
}

impl CompiledFlow {
    /// Compile a flow and extract its trigger index
    ///
    /// Returns `None` when the flow has no device or label node and can
    /// therefore never be triggered.
    pub fn compile(flow: Flow) -> Option<Self> {
        let mut triggers: HashMap<(NodeKind, String), Vec<String>> = HashMap::new();
        for node in flow.nodes.iter().filter(|node| node.kind.is_trigger()) {
            triggers
                .entry((node.kind, node.entity_id.clone()))
                .or_default()
                .push(node.id.clone());
        }

        if triggers.is_empty() {
            return None;
        }

        Some(Self {
            flow: Arc::new(flow),
            triggers,
        })
    }

    /// Trigger node ids for the device node of `device_id` and the label
    /// nodes of `label_ids`
    pub fn matching_triggers(&self, device_id: &str, label_ids: &[String]) -> Vec<String> {
        let keys = std::iter::once((NodeKind::Device, device_id.to_string()))
            .chain(label_ids.iter().map(|id| (NodeKind::Label, id.clone())));
        let mut matched: Vec<String> = keys
            .filter_map(|key| self.triggers.get(&key))
            .flatten()
            .cloned()
            .collect();
        matched.sort();
        matched.dedup();
        matched
    }
}

impl FlowRegistry {
    /// Create new, empty registry instance over an entity store
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self {
            flows: ArcSwap::new(Arc::new(BTreeMap::new())),
            store,
        }
    }

    /// Rebuild the registry from every flow in the entity store
    ///
    /// Called during startup and on the reload endpoint.
    pub async fn reload_all(&self) -> Result<usize> {
        let stored_flows = self.store.list_flows().await?;
        let mut compiled = BTreeMap::new();

        for flow in stored_flows {
            let flow_id = flow.id.clone();
            match CompiledFlow::compile(flow) {
                Some(compiled_flow) => {
                    compiled.insert(flow_id, compiled_flow);
                }
                None => tracing::warn!("⚠️ Flow '{}' has no device or label trigger, skipping", flow_id),
            }
        }

        let count = compiled.len();
        self.flows.store(Arc::new(compiled));

        tracing::info!("📊 Flow registry loaded with {} flows", count);

        Ok(count)
    }

    /// Hot-reload a single flow
    ///
    /// A flow that disappeared from the store, or lost all of its triggers,
    /// is dropped from the registry.
    pub async fn reload_flow(&self, flow_id: &str) -> Result<()> {
        let compiled = self.store.flow(flow_id).await?.and_then(CompiledFlow::compile);

        let current = self.flows.load();
        let mut next = (**current).clone();
        match compiled {
            Some(compiled_flow) => {
                next.insert(flow_id.to_string(), compiled_flow);
                tracing::info!("🔥 Hot-reloaded flow: {}", flow_id);
            }
            None => {
                next.remove(flow_id);
                tracing::info!("🗑️ Flow '{}' is gone or untriggerable, removed from registry", flow_id);
            }
        }
        self.flows.store(Arc::new(next));

        Ok(())
    }

    /// Get a compiled flow by ID (lock-free read)
    pub fn get(&self, flow_id: &str) -> Option<CompiledFlow> {
        self.flows.load().get(flow_id).cloned()
    }

    /// Point-in-time snapshot of every compiled flow, ordered by flow id
    pub fn snapshot(&self) -> Arc<BTreeMap<String, CompiledFlow>> {
        self.flows.load_full()
    }

    pub fn len(&self) -> usize {
        self.flows.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.load().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::types::FlowNode;
    use serde_json::Value;

    fn node(id: &str, kind: NodeKind, entity_id: &str) -> FlowNode {
        FlowNode {
            id: id.to_string(),
            kind,
            entity_id: entity_id.to_string(),
            config: Value::Null,
        }
    }

    #[test]
    fn compile_indexes_device_and_label_triggers() {
        let flow = Flow {
            id: "f".to_string(),
            name: "f".to_string(),
            nodes: vec![
                node("d", NodeKind::Device, "dev-1"),
                node("l", NodeKind::Label, "lbl-1"),
                node("l2", NodeKind::Label, "lbl-1"),
                node("fn", NodeKind::Function, "dev-1"),
            ],
            edges: vec![],
        };
        let compiled = CompiledFlow::compile(flow).unwrap();

        assert_eq!(compiled.matching_triggers("dev-1", &[]), vec!["d".to_string()]);
        assert_eq!(
            compiled.matching_triggers("dev-1", &["lbl-1".to_string(), "lbl-1".to_string()]),
            vec!["d".to_string(), "l".to_string(), "l2".to_string()]
        );
        assert!(compiled.matching_triggers("other", &[]).is_empty());
    }

    #[test]
    fn device_and_label_ids_do_not_collide() {
        let flow = Flow {
            id: "f".to_string(),
            name: "f".to_string(),
            nodes: vec![node("d", NodeKind::Device, "7"), node("l", NodeKind::Label, "8")],
            edges: vec![],
        };
        let compiled = CompiledFlow::compile(flow).unwrap();

        // A device whose id equals a label id is not that label
        assert!(compiled.matching_triggers("8", &[]).is_empty());
        assert!(compiled.matching_triggers("9", &["7".to_string()]).is_empty());
        assert_eq!(compiled.matching_triggers("9", &["8".to_string()]), vec!["l".to_string()]);
    }

    #[test]
    fn flows_without_triggers_do_not_compile() {
        let flow = Flow {
            id: "f".to_string(),
            name: "f".to_string(),
            nodes: vec![node("fn", NodeKind::Function, "fn-1")],
            edges: vec![],
        };
        assert!(CompiledFlow::compile(flow).is_none());
    }
}
