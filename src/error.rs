//! Engine error taxonomy
//!
//! Only resolution-class failures are errors. Anything that goes wrong while a
//! node executes is captured as a failure value on that node and never
//! surfaces through these types.

use thiserror::Error;

/// Failure to look up the entities a run starts from.
#[derive(Debug, Error)]
pub enum LookupError {
    /// No device with this external id exists in the entity store
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// The entity store itself failed while we were reading from it
    #[error("entity store lookup failed: {0}")]
    Store(String),
}

/// A stored flow could not be materialized into an execution graph.
#[derive(Debug, Error)]
pub enum GraphIntegrityError {
    #[error("duplicate node id '{0}' in flow")]
    DuplicateNode(String),

    #[error("edge {source_id} -> {target_id} references unknown node '{missing}'")]
    DanglingEdge {
        source_id: String,
        target_id: String,
        missing: String,
    },

    #[error("node '{node_id}' references unknown function '{function_id}'")]
    UnknownFunction { node_id: String, function_id: String },

    #[error("node '{node_id}' references unknown integration '{integration_id}'")]
    UnknownIntegration {
        node_id: String,
        integration_id: String,
    },

    #[error("entity store failed while resolving node '{node_id}': {message}")]
    Store { node_id: String, message: String },
}
