//! Nodedash: IoT flow execution engine
//!
//! Runs stored automation flows when devices report data: resolves the flows
//! an uplink triggers, walks each flow graph through sandboxed Lua functions
//! and HTTP/MQTT integrations, and records multi-level execution history.

// Core configuration and setup
pub mod config;

// Typed engine errors
pub mod error;

// SQLite pool and schema bootstrap
pub mod database;

// Entity definitions, entity store boundary and hot-reload flow registry
pub mod flow;

// History records, history store and the best-effort recorder
pub mod history;

// Runtime execution engine - graph building, walking, functions and integrations
pub mod runtime;

// HTTP API layer - uplink ingestion, history, reloads, maintenance
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{GraphIntegrityError, LookupError};
pub use flow::{Flow, FlowNode, NodeKind, Payload, Uplink};
pub use runtime::{FlowEngine, FlowRunOutcome, RunStatus};
pub use server::start_server;
