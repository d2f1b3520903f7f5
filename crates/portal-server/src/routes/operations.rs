//! `POST /api/servers/bulk`, `GET/POST /api/operations/{id}*`.

use crate::dto::{ApiResponse, BulkSubmitResponse};
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use portal_types::{BulkOperation, BulkOperationRequest};
use serde_json::{json, Value};
use uuid::Uuid;

pub async fn submit_bulk(
    State(state): State<AppState>,
    Json(req): Json<BulkOperationRequest>,
) -> Result<Json<ApiResponse<BulkSubmitResponse>>, ApiError> {
    let operation_id = state.bulk.submit(req).await?;
    Ok(ApiResponse::ok(BulkSubmitResponse { operation_id }))
}

pub async fn get_operation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<BulkOperation>>, ApiError> {
    state
        .bulk
        .get(id)
        .map(ApiResponse::ok)
        .ok_or(ApiError::UnknownOperation(id))
}

pub async fn cancel_operation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    state.bulk.cancel(id)?;
    Ok(ApiResponse::ok(json!({"cancelled": true})))
}

pub async fn retry_operation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    state.bulk.retry(id).await?;
    Ok(ApiResponse::ok(json!({"retried": true})))
}
