//! `GET /api/flags/{name}`.

use crate::dto::{ApiResponse, FlagEvalQuery, FlagEvalResponse};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use portal_types::{FlagContext, ServerName, TenantId, UserId};

pub async fn evaluate_flag(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<FlagEvalQuery>,
) -> Json<ApiResponse<FlagEvalResponse>> {
    let ctx = FlagContext {
        user_id: UserId(query.user_id),
        server_name: query.server_name.map(ServerName::new),
        tenant_id: query.tenant_id.map(TenantId),
    };
    let (_, reason) = state.flags.evaluate(&name, &ctx);
    let value = state.flags.evaluate_and_audit(&name, &ctx);
    ApiResponse::ok(FlagEvalResponse {
        flag: name,
        value,
        reason: format!("{reason:?}"),
    })
}
