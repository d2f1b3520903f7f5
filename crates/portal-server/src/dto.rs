//! Request/response shapes for the REST surface. Where a core type is
//! already the right wire shape (`ServerState`, `BulkOperationRequest`,
//! `DcrRequest`/`DcrResponse`) the handler uses it directly; this module
//! only adds the envelope and the handful of shapes that don't already
//! exist as a core type.

use portal_types::{FlagValue, ServerStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The success half of every response envelope: `{success, data?, error?,
/// code?}`. `ApiError::into_response` renders the failure half.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> axum::Json<Self> {
        axum::Json(Self { success: true, data })
    }
}

/// `GET /api/health` component breakdown. `db`/`cache` are external
/// collaborators; this process only reports whether it can still
/// reach the in-process handles it was wired with at startup.
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub db: &'static str,
    pub cache: &'static str,
    pub executor: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub components: ComponentHealth,
    pub last_check: chrono::DateTime<chrono::Utc>,
    pub subscriber_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct EnableDisableRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BulkSubmitResponse {
    pub operation_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ServerSummary {
    pub name: String,
    pub status: ServerStatus,
    pub health_status: portal_types::HealthStatus,
    pub is_stale: bool,
}

/// Flag-evaluation response shape for `GET /api/flags/{name}`.
#[derive(Debug, Deserialize)]
pub struct FlagEvalQuery {
    pub user_id: Uuid,
    pub server_name: Option<String>,
    pub tenant_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct FlagEvalResponse {
    pub flag: String,
    pub value: FlagValue,
    pub reason: String,
}

/// Realtime inbound frames: `{action: "subscribe"|"unsubscribe"|"ping"}`.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RealtimeInbound {
    Subscribe { channels: Vec<String>, #[serde(default)] event_types: Option<Vec<portal_types::EventType>> },
    Unsubscribe,
    Ping,
}

/// Realtime outbound frames: `{type: "event"|"ack"|"pong"|"error"}`.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeOutbound {
    Event { event: portal_types::Event },
    Ack { channels: Vec<String> },
    Pong,
    Error { message: String },
}

/// Query params accepted by the SSE endpoint: channels, event_types,
/// sources, token.
#[derive(Debug, Deserialize)]
pub struct SseQuery {
    pub channels: Option<String>,
    pub event_types: Option<String>,
    pub sources: Option<String>,
    pub token: Option<String>,
}

pub fn parse_csv(raw: &Option<String>) -> Vec<String> {
    raw.as_ref()
        .map(|s| s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect())
        .unwrap_or_default()
}
