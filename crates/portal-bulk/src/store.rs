//! External collaborator: durable persistence for `BulkOperation`. The
//! narrow, row-oriented seam `portal-bulk` needs from the relational
//! store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use portal_types::BulkOperation;
use uuid::Uuid;

/// Default TTL for a persisted `BulkOperation`: stored with a 24-hour
/// TTL by default.
pub const DEFAULT_TTL: chrono::Duration = chrono::Duration::hours(24);

#[async_trait]
pub trait BulkStore: Send + Sync {
    async fn put(&self, op: &BulkOperation, ttl: chrono::Duration);
    async fn get(&self, id: Uuid) -> Option<BulkOperation>;
}

struct Entry {
    op: BulkOperation,
    expires_at: DateTime<Utc>,
}

/// In-memory stand-in for the relational store; same TTL-by-expiry shape
/// as `portal-state::cache::InMemoryLongLivedCache`.
#[derive(Default)]
pub struct InMemoryBulkStore {
    entries: DashMap<Uuid, Entry>,
}

#[async_trait]
impl BulkStore for InMemoryBulkStore {
    async fn put(&self, op: &BulkOperation, ttl: chrono::Duration) {
        self.entries.insert(
            op.id,
            Entry { op: op.clone(), expires_at: Utc::now() + ttl },
        );
    }

    async fn get(&self, id: Uuid) -> Option<BulkOperation> {
        let entry = self.entries.get(&id)?;
        if entry.expires_at < Utc::now() {
            return None;
        }
        Some(entry.op.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_types::{BulkOperationRequest, BulkOperationType, BulkTargetConfig, ServerName, TenantId, UserId};

    fn sample_op() -> BulkOperation {
        let req = BulkOperationRequest {
            operation_type: BulkOperationType::EnableServers,
            command: "server-enable".into(),
            targets: vec![ServerName::new("alpha")],
            target_filter: None,
            config: BulkTargetConfig::default(),
            user_id: UserId::new(),
            tenant_id: TenantId::new(),
        };
        BulkOperation::new(req, vec![ServerName::new("alpha")])
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let store = InMemoryBulkStore::default();
        let op = sample_op();
        store.put(&op, chrono::Duration::seconds(-1)).await;
        assert!(store.get(op.id).await.is_none());
    }

    #[tokio::test]
    async fn unexpired_entry_round_trips() {
        let store = InMemoryBulkStore::default();
        let op = sample_op();
        store.put(&op, chrono::Duration::hours(1)).await;
        assert_eq!(store.get(op.id).await.unwrap().id, op.id);
    }
}
