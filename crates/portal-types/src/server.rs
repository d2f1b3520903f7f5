//! Server state data model.

use crate::ids::{ServerName, TenantId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The observable status of a managed MCP server.
///
/// Legal transitions between these are enforced by `portal-state`'s
/// transition table; this enum only carries the tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Unknown,
    Initializing,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
    Maintenance,
    Updating,
    Paused,
    Restarting,
}

impl ServerStatus {
    /// Whether `containerID` is expected to be non-empty for this status.
    pub fn expects_container(self) -> bool {
        matches!(
            self,
            ServerStatus::Starting
                | ServerStatus::Running
                | ServerStatus::Stopping
                | ServerStatus::Restarting
                | ServerStatus::Paused
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Stdio,
    Http,
    Sse,
    Websocket,
}

/// One health-check outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub response_time_ms: Option<u64>,
    pub status_code: Option<u16>,
    pub message: Option<String>,
    pub error_message: Option<String>,
}

/// Per-server OAuth descriptor").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub provider_type: String,
    pub client_id: String,
    /// Never populated from a deserialize of persisted state; the secret
    /// itself lives in `TokenStore` under `oauth-client-<clientID>`.
    #[serde(skip_serializing)]
    pub client_secret: Option<String>,
    pub scopes: Vec<String>,
    pub redirect_uri: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub registration_endpoint: Option<String>,
}

/// The observable condition of one managed MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerState {
    pub name: ServerName,
    pub tenant_id: TenantId,
    pub display_name: String,
    pub version: String,

    pub status: ServerStatus,

    pub container_id: Option<String>,
    pub container_state: Option<ContainerState>,
    pub health_status: HealthStatus,

    pub transport: Transport,
    pub endpoint: Option<String>,
    pub port: Option<u16>,

    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub last_seen: DateTime<Utc>,
    pub last_health_check: Option<DateTime<Utc>>,
    /// Strictly increasing per `name`.
    pub state_version: u64,

    pub cache_expiry: DateTime<Utc>,
    pub is_stale: bool,
    pub stale_since: Option<DateTime<Utc>>,

    pub user_id: UserId,

    pub oauth: Option<ServerConfig>,
}

impl ServerState {
    /// A freshly-discovered server in `Unknown` status, owned by nobody yet.
    pub fn new(name: ServerName, tenant_id: TenantId, user_id: UserId, ttl: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            name,
            tenant_id,
            display_name: String::new(),
            version: String::new(),
            status: ServerStatus::Unknown,
            container_id: None,
            container_state: None,
            health_status: HealthStatus::Unknown,
            transport: Transport::Stdio,
            endpoint: None,
            port: None,
            started_at: None,
            stopped_at: None,
            last_seen: now,
            last_health_check: None,
            state_version: 0,
            cache_expiry: now + ttl,
            is_stale: false,
            stale_since: None,
            user_id,
            oauth: None,
        }
    }

    /// `containerID` non-empty iff `status` expects one; used by
    /// `portal-state` after every transition to assert the invariant holds.
    pub fn container_invariant_holds(&self) -> bool {
        let has_container = self.container_id.as_deref().is_some_and(|s| !s.is_empty());
        has_container == self.status.expects_container()
    }

    pub fn mark_stale(&mut self, now: DateTime<Utc>) {
        if !self.is_stale {
            self.is_stale = true;
            self.stale_since = Some(now);
        }
    }

    pub fn mark_fresh(&mut self) {
        self.is_stale = false;
        self.stale_since = None;
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.cache_expiry < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_invariant_unknown_has_no_container() {
        let s = ServerState::new(
            ServerName::new("alpha"),
            TenantId::new(),
            UserId::new(),
            chrono::Duration::seconds(30),
        );
        assert!(s.container_invariant_holds());
    }

    #[test]
    fn container_invariant_violated_when_running_without_container() {
        let mut s = ServerState::new(
            ServerName::new("alpha"),
            TenantId::new(),
            UserId::new(),
            chrono::Duration::seconds(30),
        );
        s.status = ServerStatus::Running;
        assert!(!s.container_invariant_holds());
        s.container_id = Some("c1".into());
        assert!(s.container_invariant_holds());
    }
}
