//! Flow engine entry point
//!
//! One call per ingested uplink: look the device up, record the uplink,
//! resolve the triggered flows and run each of them concurrently under its
//! own flow-run id. Callers get one status per matched flow plus the id of
//! the flow-run record holding the details.

use crate::config::EngineConfig;
use crate::error::LookupError;
use crate::flow::registry::FlowRegistry;
use crate::flow::storage::EntityStore;
use crate::flow::types::{Device, Payload, Uplink};
use crate::history::recorder::HistoryRecorder;
use crate::history::types::{elapsed_ms, DeviceEventRecord, FlowRunRecord};
use crate::runtime::dispatch::IntegrationDispatcher;
use crate::runtime::graph::ExecutionGraph;
use crate::runtime::outcome::{aggregate, RunStatus};
use crate::runtime::resolver::{FlowMatch, FlowResolver, Resolution};
use crate::runtime::sandbox::FunctionInvoker;
use crate::runtime::walker::GraphWalker;
use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Trigger source written on flow runs started by an uplink
pub const TRIGGER_DEVICE_UPLINK: &str = "device_uplink";

/// Status of one flow run, referencing its history record
#[derive(Debug, Clone, Serialize)]
pub struct FlowRunOutcome {
    pub flow_id: String,
    pub flow_run_id: Uuid,
    pub status: RunStatus,
}

/// Result of handling one uplink
#[derive(Debug, Clone, Serialize)]
pub struct UplinkReport {
    pub device_id: String,
    pub runs: Vec<FlowRunOutcome>,
}

pub struct FlowEngine {
    store: Arc<dyn EntityStore>,
    resolver: FlowResolver,
    walker: GraphWalker,
    recorder: HistoryRecorder,
}

impl FlowEngine {
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn EntityStore>,
        registry: Arc<FlowRegistry>,
        recorder: HistoryRecorder,
    ) -> Result<Self> {
        let walker = GraphWalker::new(
            FunctionInvoker::new(config),
            IntegrationDispatcher::new(config)?,
            recorder.clone(),
            config.max_path_depth,
        );

        Ok(Self {
            resolver: FlowResolver::new(Arc::clone(&store), registry),
            store,
            walker,
            recorder,
        })
    }

    /// Resolve and run every flow triggered by `uplink`
    ///
    /// Only an unknown device (or a failing entity store) is an error. Node
    /// failures and malformed flows are reported through the run statuses.
    pub async fn handle_uplink(&self, uplink: &Uplink) -> Result<UplinkReport, LookupError> {
        let Resolution { device, matches, .. } = self.resolver.resolve(&uplink.device_external_id).await?;
        let payload = Payload::from_uplink(uplink);

        self.recorder.device_uplink(DeviceEventRecord {
            id: Uuid::new_v4(),
            device_id: device.id.clone(),
            event: "uplink".to_string(),
            data: payload.to_value(),
            timestamp: uplink.timestamp,
        });

        tracing::info!(
            "📥 Uplink from device '{}' ({}) matched {} flows",
            device.id,
            device.external_id,
            matches.len()
        );

        let runs = join_all(
            matches
                .iter()
                .map(|matched| self.run_flow(matched, &device, payload.clone())),
        )
        .await;

        Ok(UplinkReport {
            device_id: device.id,
            runs,
        })
    }

    /// Execute one matched flow and record exactly one flow-run record for it
    async fn run_flow(&self, matched: &FlowMatch, device: &Device, payload: Payload) -> FlowRunOutcome {
        let flow = &matched.flow.flow;
        let flow_run_id = Uuid::new_v4();
        let start_time = Utc::now();
        tracing::info!(
            "🚀 Starting flow run {} for '{}' from triggers {:?}",
            flow_run_id,
            flow.id,
            matched.trigger_node_ids
        );

        let (status, execution_path, output_data, error_details) =
            match ExecutionGraph::build(flow, self.store.as_ref()).await {
                Ok(graph) => {
                    let report = self
                        .walker
                        .walk(&graph, flow_run_id, &matched.trigger_node_ids, payload.clone())
                        .await;
                    (aggregate(&report.outcomes), report.paths, report.output_data, None)
                }
                Err(e) => {
                    tracing::error!("❌ Flow '{}' run {} cannot start: {}", flow.id, flow_run_id, e);
                    (RunStatus::Error, Vec::new(), Map::new(), Some(e.to_string()))
                }
            };

        let end_time = Utc::now();
        self.recorder.flow_run(FlowRunRecord {
            id: flow_run_id,
            flow_id: flow.id.clone(),
            status,
            trigger_source: TRIGGER_DEVICE_UPLINK.to_string(),
            source_id: Some(device.id.clone()),
            execution_path,
            error_details,
            input_data: payload.to_value(),
            output_data: Value::Object(output_data),
            start_time,
            end_time,
            execution_time_ms: elapsed_ms(start_time, end_time),
        });

        tracing::info!(
            "🎉 Flow run {} for '{}' finished with status '{}' in {}ms",
            flow_run_id,
            flow.id,
            status.as_str(),
            elapsed_ms(start_time, end_time)
        );

        FlowRunOutcome {
            flow_id: flow.id.clone(),
            flow_run_id,
            status,
        }
    }
}
