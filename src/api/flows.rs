//! Flow registry reload endpoints
//!
//! The CRUD layer owns flow definitions; after it writes one it calls these
//! so the registry picks the change up without a restart.

use crate::api::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use serde_json::{json, Value};

pub fn create_flow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/flows/reload", post(reload_all_flows))
        .route("/api/flows/{id}/reload", post(reload_flow))
}

/// Rebuild the whole registry from the entity store
///
/// POST /api/flows/reload
async fn reload_all_flows(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    match state.registry.reload_all().await {
        Ok(count) => Ok(Json(json!({ "success": true, "flows": count }))),
        Err(e) => {
            tracing::error!("❌ Failed to reload flow registry: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Recompile a single flow
///
/// POST /api/flows/{id}/reload
async fn reload_flow(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    if let Err(e) = state.registry.reload_flow(&flow_id).await {
        tracing::error!("❌ Failed to reload flow '{}': {}", flow_id, e);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    Ok(Json(json!({
        "success": true,
        "flow_id": flow_id,
        "active": state.registry.get(&flow_id).is_some(),
    })))
}
