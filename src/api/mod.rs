//! HTTP API Layer
//!
//! REST endpoints around the flow engine:
//! - Uplink ingestion (the engine's trigger boundary)
//! - Flow-run history inspection
//! - Flow registry reloads
//! - History retention maintenance

use crate::flow::registry::FlowRegistry;
use crate::history::storage::HistoryStore;
use crate::runtime::engine::FlowEngine;
use axum::Router;
use std::sync::Arc;

// Uplink ingestion endpoint
pub mod uplinks;

// Flow-run and device history endpoints
pub mod history;

// Registry reload endpoints
pub mod flows;

// History cleanup endpoint for external cron jobs
pub mod maintenance;

/// Shared resources handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<FlowEngine>,
    pub registry: Arc<FlowRegistry>,
    pub history: Arc<dyn HistoryStore>,
    /// Expected X-API-Key for maintenance calls; `None` disables them
    pub maintenance_api_key: Option<String>,
}

/// Every API route, ready for `with_state`
pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        .merge(uplinks::create_uplink_routes())
        .merge(history::create_history_routes())
        .merge(flows::create_flow_routes())
        .merge(maintenance::create_maintenance_routes())
}
