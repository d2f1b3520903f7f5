//! `POST /api/oauth/register`.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use portal_oauth::{DcrRequest, DcrResponse};

/// Unlike the rest of 's REST surface, RFC 7591 pins its own response
/// shape, so this handler returns it unwrapped rather than inside the
/// `{success, data}` envelope the other routes use.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<DcrRequest>,
) -> Result<Json<DcrResponse>, ApiError> {
    let resp = state.dcr.register(req).await?;
    Ok(Json(resp))
}
