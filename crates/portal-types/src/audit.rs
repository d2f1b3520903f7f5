//! Audit sink: records a structured event, then logs it.

use crate::ids::{ServerName, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub action: String,
    pub user_id: Option<UserId>,
    pub server_name: Option<ServerName>,
    pub outcome: AuditOutcome,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: impl Into<String>, outcome: AuditOutcome) -> Self {
        Self {
            action: action.into(),
            user_id: None,
            server_name: None,
            outcome,
            detail: None,
            at: Utc::now(),
        }
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_server(mut self, server_name: ServerName) -> Self {
        self.server_name = Some(server_name);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Every component that must emit an audit record takes an
/// `Arc<dyn AuditSink>` rather than writing logs directly, so tests can
/// substitute a capturing sink.
pub trait AuditSink: std::fmt::Debug + Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Default sink: structured `tracing` emission under a dedicated target so a
/// downstream collector can filter on `portal::audit` without parsing messages.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "portal::audit",
            action = %event.action,
            user_id = event.user_id.map(|u| u.to_string()),
            server_name = event.server_name.as_ref().map(|s| s.to_string()),
            outcome = ?event.outcome,
            detail = event.detail.as_deref(),
            "audit"
        );
    }
}

pub fn default_audit_sink() -> Arc<dyn AuditSink> {
    Arc::new(TracingAuditSink)
}
