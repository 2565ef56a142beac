//! Flow Management Layer
//!
//! Entity definitions read by the engine, the read-only entity store boundary
//! and the hot-reload flow registry.

// Device, label, function, integration and flow definitions
pub mod types;

// Read-only entity store boundary and its SQLite implementation
pub mod storage;

// Lock-free hot-reload registry of compiled flows
pub mod registry;

pub use registry::{CompiledFlow, FlowRegistry};
pub use storage::{EntityStore, SqliteEntityStore};
pub use types::{
    Device, Flow, FlowEdge, FlowNode, Function, Integration, IntegrationKind, NodeKind, Payload,
    Uplink,
};
