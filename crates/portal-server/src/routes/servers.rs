//! `GET/POST /api/servers*`.

use crate::dto::{ApiResponse, BulkSubmitResponse, EnableDisableRequest};
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use portal_types::{
    BulkOperationRequest, BulkOperationType, BulkTargetConfig, ServerName, ServerState, UserId,
};

pub async fn list_servers(State(state): State<AppState>) -> Json<ApiResponse<Vec<ServerState>>> {
    ApiResponse::ok(state.state.list())
}

pub async fn get_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<ServerState>>, ApiError> {
    let name = ServerName::new(name);
    state
        .state
        .get(&name)
        .map(ApiResponse::ok)
        .ok_or_else(|| ApiError::UnknownServer(name.to_string()))
}

/// Enqueues a single-target bulk operation, the mechanism behind both
/// `/enable` and `/disable`.
async fn enqueue_single(
    state: &AppState,
    name: String,
    command: &str,
    operation_type: BulkOperationType,
    req: EnableDisableRequest,
) -> Result<BulkSubmitResponse, ApiError> {
    let server_name = ServerName::new(name);
    let tenant_id = state
        .state
        .get(&server_name)
        .map(|s| s.tenant_id)
        .ok_or_else(|| ApiError::UnknownServer(server_name.to_string()))?;

    let bulk_req = BulkOperationRequest {
        operation_type,
        command: command.to_string(),
        targets: vec![server_name],
        target_filter: None,
        config: BulkTargetConfig::default(),
        user_id: UserId(req.user_id),
        tenant_id,
    };
    let operation_id = state.bulk.submit(bulk_req).await?;
    Ok(BulkSubmitResponse { operation_id })
}

pub async fn enable_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<EnableDisableRequest>,
) -> Result<Json<ApiResponse<BulkSubmitResponse>>, ApiError> {
    let resp = enqueue_single(&state, name, "server-enable", BulkOperationType::EnableServers, req).await?;
    Ok(ApiResponse::ok(resp))
}

pub async fn disable_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<EnableDisableRequest>,
) -> Result<Json<ApiResponse<BulkSubmitResponse>>, ApiError> {
    let resp = enqueue_single(&state, name, "server-disable", BulkOperationType::DisableServers, req).await?;
    Ok(ApiResponse::ok(resp))
}
