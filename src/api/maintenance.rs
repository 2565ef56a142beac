//! History retention endpoint
//!
//! Called periodically by an external job; deletes history rows older than
//! the requested retention window.

use crate::api::AppState;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::post,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 {
    1
}

pub fn create_maintenance_routes() -> Router<AppState> {
    Router::new().route("/api/maintenance/cleanup-history", post(cleanup_history))
}

/// Purge device, function, integration and flow history past retention
///
/// POST /api/maintenance/cleanup-history?retention_days=N
/// Header: X-API-Key
async fn cleanup_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CleanupQuery>,
) -> (StatusCode, Json<Value>) {
    let provided = headers.get("x-api-key").and_then(|value| value.to_str().ok());
    let authorized = matches!(
        (state.maintenance_api_key.as_deref(), provided),
        (Some(expected), Some(given)) if expected == given
    );
    if !authorized {
        tracing::warn!("🔒 Rejected history cleanup with missing or wrong API key");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "error": "invalid or missing API key" })),
        );
    }

    tracing::info!("🧹 Cleaning history older than {} days", query.retention_days);
    match state.history.purge_older_than(query.retention_days).await {
        Ok(counts) => {
            let total = counts.device_history + counts.flow_history + counts.function_history + counts.integration_history;
            tracing::info!("✅ History cleanup removed {} rows", total);
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "deleted_counts": counts,
                    "message": format!(
                        "deleted {} history records older than {} days",
                        total, query.retention_days
                    ),
                })),
            )
        }
        Err(e) => {
            tracing::error!("❌ History cleanup failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": e.to_string() })),
            )
        }
    }
}
