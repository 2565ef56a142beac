//! Uplink ingestion endpoint
//!
//! Receives normalized device uplinks and runs every flow they trigger.

use crate::api::AppState;
use crate::error::LookupError;
use crate::flow::types::Uplink;
use crate::runtime::engine::UplinkReport;
use axum::{extract::State, http::StatusCode, response::Json, routing::post, Router};
use serde_json::{json, Value};

pub fn create_uplink_routes() -> Router<AppState> {
    Router::new().route("/api/uplinks", post(ingest_uplink))
}

/// Run the flows triggered by one uplink
///
/// POST /api/uplinks
/// Body: `{device_external_id, timestamp?, data}`
async fn ingest_uplink(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<UplinkReport>, (StatusCode, Json<Value>)> {
    // Parse JSON body manually to answer malformed input with a 400
    let uplink: Uplink = serde_json::from_str(&body).map_err(|e| {
        tracing::warn!("❌ Invalid uplink payload: {}", e);
        (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })))
    })?;
    tracing::info!("📥 Uplink received from '{}'", uplink.device_external_id);
    tracing::debug!("📄 Uplink data: {:?}", uplink.data);

    match state.engine.handle_uplink(&uplink).await {
        Ok(report) => Ok(Json(report)),
        Err(e @ LookupError::UnknownDevice(_)) => {
            tracing::warn!("❌ {}", e);
            Err((StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() }))))
        }
        Err(e) => {
            tracing::error!("❌ Uplink lookup failed: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))))
        }
    }
}
