//! Execution History Layer
//!
//! Append-only records of device uplinks, function runs, integration calls
//! and flow runs, the store they are written to, and the one-way recorder
//! the engine emits them through.

// Record definitions
pub mod types;

// History store boundary and its SQLite implementation
pub mod storage;

// Channel-backed best-effort writer
pub mod recorder;

pub use recorder::HistoryRecorder;
pub use storage::{HistoryStore, SqliteHistoryStore};
pub use types::{
    DeviceEventRecord, FlowRunDetail, FlowRunRecord, FunctionRunRecord, IntegrationCallRecord, NodeStatus,
    PathStatus, PathTrace, PurgeCounts,
};
