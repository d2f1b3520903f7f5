//! REST + realtime route handlers.

pub mod flags;
pub mod health;
pub mod oauth;
pub mod operations;
pub mod realtime;
pub mod servers;

use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;

/// Assembles the full `/api` surface plus the realtime endpoints over one
/// `AppState`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health))
        .route("/api/servers", get(servers::list_servers))
        .route("/api/servers/{name}", get(servers::get_server))
        .route("/api/servers/{name}/enable", post(servers::enable_server))
        .route("/api/servers/{name}/disable", post(servers::disable_server))
        .route("/api/servers/bulk", post(operations::submit_bulk))
        .route("/api/operations/{id}", get(operations::get_operation))
        .route("/api/operations/{id}/cancel", post(operations::cancel_operation))
        .route("/api/operations/{id}/retry", post(operations::retry_operation))
        .route("/api/oauth/register", post(oauth::register))
        .route("/api/flags/{name}", get(flags::evaluate_flag))
        .route("/realtime/ws", get(realtime::websocket_upgrade))
        .route("/realtime/sse", get(realtime::sse_stream))
        .with_state(state)
}
