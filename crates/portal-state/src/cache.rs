//! The secondary long-lived cache: an external K/V accelerator so
//! multi-process deployments can warm up after restart. The in-memory
//! authoritative map is always the source of truth; this is purely an
//! acceleration layer and never persists historical state beyond a
//! rolling window.

use async_trait::async_trait;
use dashmap::DashMap;
use portal_types::{ServerName, ServerState};
use std::time::{Duration, Instant};

/// Cache key convention: `server:state:<name>`.
pub fn state_key(name: &ServerName) -> String {
    format!("server:state:{name}")
}

#[async_trait]
pub trait LongLivedCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<ServerState>;
    async fn set(&self, key: &str, state: ServerState, ttl: Duration);
    async fn scan_servers(&self) -> Vec<ServerState>;
}

/// In-process stand-in for an external K/V store: enough to exercise the
/// seed-on-restart and refresh-on-expiry paths without a live dependency
/// in unit tests.
#[derive(Default)]
pub struct InMemoryLongLivedCache {
    entries: DashMap<String, (ServerState, Instant, Duration)>,
}

#[async_trait]
impl LongLivedCache for InMemoryLongLivedCache {
    async fn get(&self, key: &str) -> Option<ServerState> {
        self.entries.get(key).and_then(|entry| {
            let (state, set_at, ttl) = &*entry;
            if set_at.elapsed() <= *ttl {
                Some(state.clone())
            } else {
                None
            }
        })
    }

    async fn set(&self, key: &str, state: ServerState, ttl: Duration) {
        self.entries.insert(key.to_string(), (state, Instant::now(), ttl));
    }

    async fn scan_servers(&self) -> Vec<ServerState> {
        self.entries
            .iter()
            .filter(|e| e.value().1.elapsed() <= e.value().2)
            .map(|e| e.value().0.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_types::{TenantId, UserId};

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let cache = InMemoryLongLivedCache::default();
        let state = ServerState::new(
            ServerName::new("alpha"),
            TenantId::new(),
            UserId::new(),
            chrono::Duration::seconds(30),
        );
        cache
            .set(&state_key(&state.name), state.clone(), Duration::from_millis(0))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get(&state_key(&state.name)).await.is_none());
    }
}
