#![allow(dead_code)]

use nodedash::config::EngineConfig;
use nodedash::database::connect_in_memory;
use nodedash::flow::types::{Device, DeviceStatus, Function, Integration, IntegrationKind, Label};
use nodedash::flow::{EntityStore, Flow, FlowEdge, FlowNode, FlowRegistry, NodeKind, SqliteEntityStore};
use nodedash::history::{HistoryRecorder, SqliteHistoryStore};
use nodedash::runtime::FlowEngine;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::Arc;

pub struct Harness {
    pub pool: SqlitePool,
    pub store: SqliteEntityStore,
    pub history: Arc<SqliteHistoryStore>,
    pub registry: Arc<FlowRegistry>,
    pub recorder: HistoryRecorder,
    pub engine: FlowEngine,
}

impl Harness {
    pub async fn new() -> Self {
        let pool = connect_in_memory().await.unwrap();
        let store = SqliteEntityStore::new(pool.clone());
        let history = Arc::new(SqliteHistoryStore::new(pool.clone()));
        let entities: Arc<dyn EntityStore> = Arc::new(SqliteEntityStore::new(pool.clone()));
        let registry = Arc::new(FlowRegistry::new(Arc::clone(&entities)));
        let (recorder, _writer) = HistoryRecorder::spawn(history.clone(), std::time::Duration::from_secs(1), 1_024);
        let engine = FlowEngine::new(&engine_config(), entities, Arc::clone(&registry), recorder.clone()).unwrap();

        Self {
            pool,
            store,
            history,
            registry,
            recorder,
            engine,
        }
    }

    pub async fn device(&self, id: &str, external_id: &str, labels: &[&str]) {
        self.store
            .save_device(&Device {
                id: id.to_string(),
                external_id: external_id.to_string(),
                name: id.to_string(),
                status: DeviceStatus::Online,
                metadata: json!({}),
            })
            .await
            .unwrap();
        for label in labels {
            self.store
                .save_label(&Label {
                    id: label.to_string(),
                    name: label.to_string(),
                })
                .await
                .unwrap();
            self.store.attach_label(id, label).await.unwrap();
        }
    }

    pub async fn function(&self, id: &str, code: &str) {
        self.store
            .save_function(&Function {
                id: id.to_string(),
                name: id.to_string(),
                code: code.to_string(),
                parameters: vec![],
                config: json!({}),
            })
            .await
            .unwrap();
    }

    pub async fn integration(&self, id: &str, kind: IntegrationKind, config: Value) {
        self.store
            .save_integration(&Integration {
                id: id.to_string(),
                name: id.to_string(),
                kind,
                config,
            })
            .await
            .unwrap();
    }

    /// Store the flow and reload the registry
    pub async fn flow(&self, id: &str, nodes: Vec<FlowNode>, edges: Vec<FlowEdge>) {
        self.store
            .save_flow(&Flow {
                id: id.to_string(),
                name: id.to_string(),
                nodes,
                edges,
            })
            .await
            .unwrap();
        self.registry.reload_all().await.unwrap();
    }
}

pub fn engine_config() -> EngineConfig {
    EngineConfig {
        function_timeout_ms: 1_000,
        function_memory_limit: 8 * 1024 * 1024,
        integration_timeout_ms: 2_000,
        response_body_limit: 4_096,
        max_path_depth: 64,
        history_write_timeout_ms: 1_000,
        history_queue_capacity: 1_024,
    }
}

pub fn node(id: &str, kind: NodeKind, entity_id: &str) -> FlowNode {
    FlowNode {
        id: id.to_string(),
        kind,
        entity_id: entity_id.to_string(),
        config: Value::Null,
    }
}

pub fn edge(source: &str, target: &str) -> FlowEdge {
    FlowEdge {
        source: source.to_string(),
        target: target.to_string(),
    }
}
