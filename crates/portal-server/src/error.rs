//! REST-layer error translation: maps every component error's `ErrorKind`
//! to an HTTP status code. Never string-matches a message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use portal_types::ErrorKind;
use serde_json::json;

/// Anything a route handler can fail with; each variant knows its own
/// `ErrorKind` so the status-code mapping stays in one place.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Bulk(#[from] portal_bulk::BulkError),
    #[error(transparent)]
    OAuth(#[from] portal_oauth::OAuthError),
    #[error(transparent)]
    State(#[from] portal_state::StateError),
    #[error(transparent)]
    TokenStore(#[from] portal_tokenstore::TokenStoreError),
    #[error(transparent)]
    Executor(#[from] portal_executor::ExecutorError),
    #[error("unknown server {0}")]
    UnknownServer(String),
    #[error("unknown operation {0}")]
    UnknownOperation(uuid::Uuid),
    #[error("unknown flag {0}")]
    UnknownFlag(String),
    #[error("invalid request: {0}")]
    BadRequest(String),
}

fn kind_to_status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Authorization => StatusCode::FORBIDDEN,
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::IllegalTransition | ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Bulk(e) => e.kind(),
            ApiError::OAuth(e) => e.kind(),
            ApiError::State(e) => e.kind(),
            ApiError::TokenStore(e) => e.kind(),
            ApiError::Executor(e) => e.kind(),
            ApiError::UnknownServer(_)
            | ApiError::UnknownOperation(_)
            | ApiError::UnknownFlag(_)
            | ApiError::BadRequest(_) => ErrorKind::Validation,
        }
    }
}

/// Renders every error as `{success: false, error, code}`.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = kind_to_status(kind);
        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
            "code": format!("{kind:?}"),
        }));
        (status, body).into_response()
    }
}
