//! History inspection endpoints

use crate::api::AppState;
use crate::history::types::{DeviceEventRecord, FlowRunDetail, FlowRunRecord};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

/// Default and maximum page size for flow-run listings
const DEFAULT_RUN_LIMIT: i64 = 50;
const MAX_RUN_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct RunListQuery {
    pub limit: Option<i64>,
}

pub fn create_history_routes() -> Router<AppState> {
    Router::new()
        .route("/api/flow-runs/{id}", get(get_flow_run))
        .route("/api/flows/{id}/runs", get(list_flow_runs))
        .route("/api/devices/{id}/events", get(list_device_events))
}

/// Flow-run record with its function-run and integration-call records
///
/// GET /api/flow-runs/{id}
async fn get_flow_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FlowRunDetail>, StatusCode> {
    let flow_run_id = Uuid::parse_str(&id).map_err(|_| StatusCode::BAD_REQUEST)?;

    match state.history.flow_run_detail(flow_run_id).await {
        Ok(Some(detail)) => Ok(Json(detail)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("❌ Failed to load flow run {}: {}", flow_run_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Most recent runs of one flow, newest first
///
/// GET /api/flows/{id}/runs?limit=N
async fn list_flow_runs(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
    Query(query): Query<RunListQuery>,
) -> Result<Json<Vec<FlowRunRecord>>, StatusCode> {
    let limit = query.limit.unwrap_or(DEFAULT_RUN_LIMIT).clamp(1, MAX_RUN_LIMIT);

    state.history.flow_runs(&flow_id, limit).await.map(Json).map_err(|e| {
        tracing::error!("❌ Failed to list runs of flow '{}': {}", flow_id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Uplinks recorded for one device
///
/// GET /api/devices/{id}/events
async fn list_device_events(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<Vec<DeviceEventRecord>>, StatusCode> {
    state.history.device_events(&device_id).await.map(Json).map_err(|e| {
        tracing::error!("❌ Failed to list events of device '{}': {}", device_id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
