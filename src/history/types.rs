//! History record definitions
//!
//! Append-only records produced by a run: one per function invocation, one
//! per integration call, one per flow run, plus one device event per
//! ingested uplink. Records are never updated after they are written.

use crate::flow::types::IntegrationKind;
use crate::runtime::outcome::RunStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Status of a single node execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Success,
    Error,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Success => "success",
            NodeStatus::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "success" => NodeStatus::Success,
            _ => NodeStatus::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionRunRecord {
    pub id: Uuid,
    pub flow_run_id: Uuid,
    pub flow_id: String,
    pub function_id: String,
    pub node_id: String,
    pub status: NodeStatus,
    pub input_data: Value,
    pub output_data: Option<Value>,
    pub error_message: Option<String>,
    /// Lua stack traceback captured with a script error
    pub error_stack: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub execution_time_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationCallRecord {
    pub id: Uuid,
    pub flow_run_id: Uuid,
    pub flow_id: String,
    pub integration_id: String,
    pub node_id: String,
    pub kind: IntegrationKind,
    pub status: NodeStatus,
    pub input_data: Value,
    /// Status code and truncated body for http, acknowledgment for mqtt
    pub response_data: Option<Value>,
    pub error_message: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub execution_time_ms: i64,
}

/// How a single path through the graph ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathStatus {
    /// Reached a node with no outgoing edges
    Success,
    /// Stopped at a failed function or integration node
    Error,
    /// Stopped by cycle or depth protection
    Cut,
}

/// One completed path of a flow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathTrace {
    /// Node ids in visit order, starting at the trigger
    pub nodes: Vec<String>,
    pub status: PathStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRunRecord {
    pub id: Uuid,
    pub flow_id: String,
    pub status: RunStatus,
    /// What started the run ("device_uplink")
    pub trigger_source: String,
    /// Id of the triggering device
    pub source_id: Option<String>,
    pub execution_path: Vec<PathTrace>,
    /// Resolution error for runs that never executed a node
    pub error_details: Option<String>,
    pub input_data: Value,
    /// Terminal node id -> payload that reached it
    pub output_data: Value,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub execution_time_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEventRecord {
    pub id: Uuid,
    pub device_id: String,
    /// "uplink" for ingested device data
    pub event: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

/// A flow-run record with the node records that belong to it
#[derive(Debug, Clone, Serialize)]
pub struct FlowRunDetail {
    pub flow_run: FlowRunRecord,
    pub function_runs: Vec<FunctionRunRecord>,
    pub integration_calls: Vec<IntegrationCallRecord>,
}

/// Rows deleted from each history table by a retention purge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeCounts {
    pub device_history: u64,
    pub flow_history: u64,
    pub function_history: u64,
    pub integration_history: u64,
}

/// Milliseconds between two timestamps, never negative
pub fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_milliseconds().max(0)
}
