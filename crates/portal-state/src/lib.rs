//! Authoritative server state, transition enforcement, health checks,
//! and cache.

pub mod cache;
pub mod error;
pub mod health;
pub mod transition;

pub use cache::{state_key, InMemoryLongLivedCache, LongLivedCache};
pub use error::{StateError, StateResult};
pub use health::{
    CheckOutcome, ExecProbe, HealthChecker, HealthProbe, HttpProbe, ProbeTarget, TcpProbe,
    DEFAULT_CHECK_INTERVAL, DEFAULT_CHECK_TIMEOUT, DEFAULT_FLEET_CONCURRENCY, DEFAULT_RETRIES,
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use portal_events::EventFabric;
use portal_types::{Channel, Event, EventType, HealthStatus, ServerName, ServerState, ServerStatus};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Default cache TTL backing `cacheExpiry`.
pub const DEFAULT_CACHE_TTL: chrono::Duration = chrono::Duration::seconds(60);
/// Default ring-buffer depth for per-server `StateEvent` history.
pub const DEFAULT_EVENT_RING_DEPTH: usize = 100;

/// One recorded transition. Every successful transition appends a
/// `StateEvent` to a per-server bounded ring (default 100).
#[derive(Debug, Clone)]
pub struct StateEvent {
    pub at: DateTime<Utc>,
    pub from: ServerStatus,
    pub to: ServerStatus,
    pub reason: String,
    pub state_version: u64,
}

/// StateManager: owns every `ServerState` and the transition/health/cache
/// machinery around it. Everyone else holds read snapshots.
pub struct StateManager {
    authoritative: DashMap<ServerName, ServerState>,
    event_rings: DashMap<ServerName, Mutex<VecDeque<StateEvent>>>,
    cache: Arc<dyn LongLivedCache>,
    fabric: Option<Arc<EventFabric>>,
    cache_ttl: chrono::Duration,
    ring_depth: usize,
}

impl StateManager {
    pub fn new(cache: Arc<dyn LongLivedCache>, fabric: Option<Arc<EventFabric>>) -> Self {
        Self {
            authoritative: DashMap::new(),
            event_rings: DashMap::new(),
            cache,
            fabric,
            cache_ttl: DEFAULT_CACHE_TTL,
            ring_depth: DEFAULT_EVENT_RING_DEPTH,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Registers a server the manager did not previously know about, in
    /// `Unknown` status.
    pub fn register(&self, state: ServerState) {
        self.authoritative.insert(state.name.clone(), state);
    }

    /// On process restart with an empty authoritative map, the long-lived
    /// cache seeds it and every entry is marked `isStale=true` until the
    /// next health check confirms freshness.
    pub async fn seed_from_cache_if_empty(&self) {
        if !self.authoritative.is_empty() {
            return;
        }
        let seeded = self.cache.scan_servers().await;
        for mut state in seeded {
            state.mark_stale(Utc::now());
            info!(server = %state.name, "seeded server state from long-lived cache, marked stale");
            self.authoritative.insert(state.name.clone(), state);
        }
    }

    /// Reads a server's state, honoring the cache-expiry/staleness contract:
    /// a read never returns `cacheExpiry < now` without either a refresh
    /// attempt or an `isStale = true` flag.
    pub fn get(&self, name: &ServerName) -> Option<ServerState> {
        let mut entry = self.authoritative.get_mut(name)?;
        if entry.is_expired(Utc::now()) && !entry.is_stale {
            // No refresh in progress known to this call; mark stale so the
            // caller can see the cache boundary was crossed. A real refresh
            // is the responsibility of the health-check scheduler or an
            // explicit `refresh` call — this getter never blocks.
            entry.mark_stale(Utc::now());
        }
        Some(entry.clone())
    }

    pub fn list(&self) -> Vec<ServerState> {
        self.authoritative.iter().map(|e| e.value().clone()).collect()
    }

    /// Marks a server fresh again and bumps `cacheExpiry`, typically called
    /// after a successful refresh (health check or re-sync).
    pub fn mark_refreshed(&self, name: &ServerName) {
        if let Some(mut entry) = self.authoritative.get_mut(name) {
            entry.mark_fresh();
            entry.cache_expiry = Utc::now() + self.cache_ttl;
            entry.last_seen = Utc::now();
        }
    }

    /// Applies a legal transition, bumping `stateVersion`, recording a
    /// `StateEvent`, and publishing a `StateChangeEvent`.
    #[instrument(skip(self), fields(server = %name, target = ?target))]
    pub async fn transition(&self, name: &ServerName, target: ServerStatus, reason: &str) -> StateResult<ServerState> {
        let mut entry = self
            .authoritative
            .get_mut(name)
            .ok_or_else(|| StateError::UnknownServer(name.to_string()))?;

        let from = entry.status;
        if !transition::is_legal(from, target) {
            warn!(from = ?from, to = ?target, "rejected illegal transition");
            return Err(StateError::IllegalTransition { from, to: target });
        }

        entry.status = target;
        entry.state_version += 1;
        let now = Utc::now();
        entry.last_seen = now;
        if target == ServerStatus::Running && entry.started_at.is_none() {
            entry.started_at = Some(now);
        }
        if target == ServerStatus::Stopped {
            entry.stopped_at = Some(now);
        }
        let snapshot = entry.clone();
        drop(entry);

        self.push_event(name, StateEvent {
            at: now,
            from,
            to: target,
            reason: reason.to_string(),
            state_version: snapshot.state_version,
        });

        self.cache
            .set(&state_key(name), snapshot.clone(), Duration::from_secs(self.cache_ttl.num_seconds().max(1) as u64))
            .await;

        if let Some(fabric) = &self.fabric {
            fabric.broadcast(
                &Channel::Server(name.clone()),
                EventType::ServerStatusChanged,
                json!({
                    "name": name.to_string(),
                    "from": format!("{from:?}"),
                    "to": format!("{target:?}"),
                    "reason": reason,
                    "state_version": snapshot.state_version,
                }),
                Some(name.to_string()),
            );
            fabric.broadcast(
                &Channel::Servers,
                EventType::ServerStatusChanged,
                json!({"name": name.to_string(), "to": format!("{target:?}")}),
                Some(name.to_string()),
            );
        }

        debug!(from = ?from, to = ?target, version = snapshot.state_version, "transition applied");
        Ok(snapshot)
    }

    fn push_event(&self, name: &ServerName, event: StateEvent) {
        let ring = self
            .event_rings
            .entry(name.clone())
            .or_insert_with(|| Mutex::new(VecDeque::with_capacity(self.ring_depth)));
        let mut ring = ring.lock();
        if ring.len() == self.ring_depth {
            ring.pop_front();
        }
        ring.push_back(event);
    }

    pub fn history(&self, name: &ServerName) -> Vec<StateEvent> {
        self.event_rings
            .get(name)
            .map(|ring| ring.lock().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Folds a health-check outcome into the server's `HealthStatus` without
    /// touching `ServerStatus`: failures never mutate status directly,
    /// they only record the failure and publish an event on a change.
    pub fn record_health(&self, name: &ServerName, outcome: &CheckOutcome) {
        let changed = {
            let mut entry = match self.authoritative.get_mut(name) {
                Some(e) => e,
                None => return,
            };
            let prev = entry.health_status;
            entry.health_status = outcome.aggregate_status;
            entry.last_health_check = Some(outcome.result.checked_at);
            prev != outcome.aggregate_status
        };

        if changed {
            if let Some(fabric) = &self.fabric {
                fabric.broadcast(
                    &Channel::Server(name.clone()),
                    EventType::SystemHealth,
                    json!({
                        "name": name.to_string(),
                        "status": format!("{:?}", outcome.aggregate_status),
                        "message": outcome.result.message,
                        "error": outcome.result.error_message,
                    }),
                    Some(name.to_string()),
                );
            }
        }
    }

    pub fn event_fabric(&self) -> Option<&Arc<EventFabric>> {
        self.fabric.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_types::{TenantId, UserId};

    fn fresh_server(name: &str) -> ServerState {
        ServerState::new(ServerName::new(name), TenantId::new(), UserId::new(), chrono::Duration::seconds(30))
    }

    fn manager() -> StateManager {
        StateManager::new(Arc::new(InMemoryLongLivedCache::default()), None)
    }

    #[tokio::test]
    async fn legal_transition_bumps_version_and_records_history() {
        let mgr = manager();
        let mut s = fresh_server("alpha");
        s.status = ServerStatus::Stopped;
        mgr.register(s);
        let name = ServerName::new("alpha");

        let after = mgr.transition(&name, ServerStatus::Starting, "manual").await.unwrap();
        assert_eq!(after.status, ServerStatus::Starting);
        assert_eq!(after.state_version, 1);
        assert_eq!(mgr.history(&name).len(), 1);
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected_and_version_unchanged() {
        let mgr = manager();
        let mut s = fresh_server("alpha");
        s.status = ServerStatus::Stopped;
        mgr.register(s);
        let name = ServerName::new("alpha");

        let err = mgr.transition(&name, ServerStatus::Running, "manual").await.unwrap_err();
        assert!(matches!(err, StateError::IllegalTransition { .. }));
        assert_eq!(mgr.get(&name).unwrap().state_version, 0);
        assert!(mgr.history(&name).is_empty());
    }

    #[tokio::test]
    async fn health_failure_does_not_mutate_status() {
        let mgr = manager();
        let mut s = fresh_server("alpha");
        s.status = ServerStatus::Running;
        mgr.register(s);
        let name = ServerName::new("alpha");

        let outcome = CheckOutcome {
            result: portal_types::HealthCheckResult {
                status: HealthStatus::Unhealthy,
                checked_at: Utc::now(),
                response_time_ms: None,
                status_code: None,
                message: None,
                error_message: Some("down".into()),
            },
            aggregate_status: HealthStatus::Unhealthy,
            status_changed: true,
        };
        mgr.record_health(&name, &outcome);
        let after = mgr.get(&name).unwrap();
        assert_eq!(after.status, ServerStatus::Running);
        assert_eq!(after.health_status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn seed_from_cache_marks_entries_stale() {
        let cache = Arc::new(InMemoryLongLivedCache::default());
        let state = fresh_server("alpha");
        cache.set(&state_key(&state.name), state.clone(), Duration::from_secs(60)).await;

        let mgr = StateManager::new(cache, None);
        mgr.seed_from_cache_if_empty().await;
        let got = mgr.get(&ServerName::new("alpha")).unwrap();
        assert!(got.is_stale);
    }
}
