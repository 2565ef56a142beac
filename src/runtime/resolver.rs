//! Flow resolver
//!
//! Maps a triggering device to the flows whose device or label trigger nodes
//! reference it. Matching reads a registry snapshot, so a concurrent reload
//! never changes the result of a resolution already under way.

use crate::error::LookupError;
use crate::flow::registry::{CompiledFlow, FlowRegistry};
use crate::flow::storage::EntityStore;
use crate::flow::types::Device;
use std::sync::Arc;

/// A flow matched for one uplink, with the trigger nodes the walk starts from
#[derive(Debug, Clone)]
pub struct FlowMatch {
    pub flow: CompiledFlow,
    pub trigger_node_ids: Vec<String>,
}

/// Device snapshot and every flow it triggers
#[derive(Debug, Clone)]
pub struct Resolution {
    pub device: Device,
    pub label_ids: Vec<String>,
    pub matches: Vec<FlowMatch>,
}

pub struct FlowResolver {
    store: Arc<dyn EntityStore>,
    registry: Arc<FlowRegistry>,
}

impl FlowResolver {
    pub fn new(store: Arc<dyn EntityStore>, registry: Arc<FlowRegistry>) -> Self {
        Self { store, registry }
    }

    /// Load the device and its labels by external id
    async fn lookup_device(&self, external_id: &str) -> Result<(Device, Vec<String>), LookupError> {
        let device = self
            .store
            .device_by_external_id(external_id)
            .await
            .map_err(|e| LookupError::Store(e.to_string()))?
            .ok_or_else(|| LookupError::UnknownDevice(external_id.to_string()))?;
        let label_ids = self
            .store
            .device_label_ids(&device.id)
            .await
            .map_err(|e| LookupError::Store(e.to_string()))?;

        Ok((device, label_ids))
    }

    /// Resolve every flow triggered by the device with `external_id`
    ///
    /// No match is an empty result, not an error.
    pub async fn resolve(&self, external_id: &str) -> Result<Resolution, LookupError> {
        let (device, label_ids) = self.lookup_device(external_id).await?;
        let matches = self.match_flows(&device.id, &label_ids);
        tracing::debug!(
            "🔎 Device '{}' with {} labels matched {} flows",
            device.id,
            label_ids.len(),
            matches.len()
        );

        Ok(Resolution {
            device,
            label_ids,
            matches,
        })
    }

    /// Flows whose trigger set intersects {device_id} ∪ label_ids, ordered by flow id
    pub fn match_flows(&self, device_id: &str, label_ids: &[String]) -> Vec<FlowMatch> {
        self.registry
            .snapshot()
            .values()
            .filter_map(|flow| {
                let trigger_node_ids = flow.matching_triggers(device_id, label_ids);
                (!trigger_node_ids.is_empty()).then(|| FlowMatch {
                    flow: flow.clone(),
                    trigger_node_ids,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::connect_in_memory;
    use crate::flow::storage::SqliteEntityStore;
    use crate::flow::types::{DeviceStatus, Flow, FlowNode, Label, NodeKind};
    use serde_json::{json, Value};

    fn trigger(id: &str, kind: NodeKind, entity_id: &str) -> FlowNode {
        FlowNode {
            id: id.to_string(),
            kind,
            entity_id: entity_id.to_string(),
            config: Value::Null,
        }
    }

    async fn resolver() -> FlowResolver {
        let store = SqliteEntityStore::new(connect_in_memory().await.unwrap());
        store
            .save_device(&Device {
                id: "dev-1".to_string(),
                external_id: "eui-1".to_string(),
                name: "north".to_string(),
                status: DeviceStatus::Online,
                metadata: json!({}),
            })
            .await
            .unwrap();
        store
            .save_device(&Device {
                id: "dev-2".to_string(),
                external_id: "eui-2".to_string(),
                name: "south".to_string(),
                status: DeviceStatus::Online,
                metadata: json!({}),
            })
            .await
            .unwrap();
        store
            .save_label(&Label {
                id: "lbl-1".to_string(),
                name: "greenhouse".to_string(),
            })
            .await
            .unwrap();
        store.attach_label("dev-1", "lbl-1").await.unwrap();

        for (id, nodes) in [
            ("by-device", vec![trigger("d", NodeKind::Device, "dev-1")]),
            ("by-label", vec![trigger("l", NodeKind::Label, "lbl-1")]),
            (
                "both",
                vec![trigger("d", NodeKind::Device, "dev-1"), trigger("l", NodeKind::Label, "lbl-1")],
            ),
            ("other", vec![trigger("d", NodeKind::Device, "dev-9")]),
        ] {
            store
                .save_flow(&Flow {
                    id: id.to_string(),
                    name: id.to_string(),
                    nodes,
                    edges: vec![],
                })
                .await
                .unwrap();
        }

        let store: Arc<dyn EntityStore> = Arc::new(store);
        let registry = Arc::new(FlowRegistry::new(Arc::clone(&store)));
        registry.reload_all().await.unwrap();
        FlowResolver::new(store, registry)
    }

    #[tokio::test]
    async fn matches_by_device_and_label() {
        let resolution = resolver().await.resolve("eui-1").await.unwrap();

        assert_eq!(resolution.device.id, "dev-1");
        assert_eq!(resolution.label_ids, vec!["lbl-1".to_string()]);
        let matched: Vec<(&str, Vec<String>)> = resolution
            .matches
            .iter()
            .map(|m| (m.flow.flow.id.as_str(), m.trigger_node_ids.clone()))
            .collect();
        assert_eq!(
            matched,
            vec![
                ("both", vec!["d".to_string(), "l".to_string()]),
                ("by-device", vec!["d".to_string()]),
                ("by-label", vec!["l".to_string()]),
            ]
        );
    }

    #[tokio::test]
    async fn unreferenced_device_matches_nothing() {
        let resolution = resolver().await.resolve("eui-2").await.unwrap();
        assert!(resolution.matches.is_empty());
    }

    #[tokio::test]
    async fn label_trigger_ignores_device_with_same_id() {
        let store = SqliteEntityStore::new(connect_in_memory().await.unwrap());
        store
            .save_device(&Device {
                id: "7".to_string(),
                external_id: "eui-7".to_string(),
                name: "unlabelled".to_string(),
                status: DeviceStatus::Online,
                metadata: json!({}),
            })
            .await
            .unwrap();
        store
            .save_label(&Label {
                id: "7".to_string(),
                name: "orchard".to_string(),
            })
            .await
            .unwrap();
        store
            .save_flow(&Flow {
                id: "label-flow".to_string(),
                name: "label-flow".to_string(),
                nodes: vec![trigger("l", NodeKind::Label, "7")],
                edges: vec![],
            })
            .await
            .unwrap();

        let store: Arc<dyn EntityStore> = Arc::new(store);
        let registry = Arc::new(FlowRegistry::new(Arc::clone(&store)));
        registry.reload_all().await.unwrap();
        let resolver = FlowResolver::new(store, registry);

        let resolution = resolver.resolve("eui-7").await.unwrap();
        assert!(resolution.label_ids.is_empty());
        assert!(resolution.matches.is_empty());
        assert_eq!(resolver.match_flows("other", &["7".to_string()]).len(), 1);
    }

    #[tokio::test]
    async fn unknown_device_is_a_lookup_error() {
        let err = resolver().await.resolve("eui-404").await.unwrap_err();
        assert!(matches!(err, LookupError::UnknownDevice(ref id) if id == "eui-404"));
    }
}
