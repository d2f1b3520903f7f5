//! Bulk operation data model.

use crate::ids::{ServerName, TenantId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOperationType {
    EnableServers,
    DisableServers,
    RestartServers,
    CatalogSync,
    ConfigApply,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOperationStatus {
    Pending,
    Queued,
    Running,
    Retrying,
    Completed,
    PartialSuccess,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

/// Criteria used to resolve `targets` beyond an explicit list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetFilter {
    pub statuses: Vec<crate::server::ServerStatus>,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub name_pattern_include: Option<String>,
    pub name_pattern_exclude: Option<String>,
    pub healthy_only: bool,
    pub running_only: bool,
    pub exclude: Vec<ServerName>,
}

/// Execution configuration for one `BulkOperation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkTargetConfig {
    pub parallel: bool,
    pub max_concurrency: usize,
    pub continue_on_error: bool,
    pub max_error_rate: f64,
    pub delay_between_batches: std::time::Duration,
    pub timeout_per_target: std::time::Duration,
    pub max_retries: u32,
}

impl Default for BulkTargetConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            max_concurrency: 10,
            continue_on_error: true,
            max_error_rate: 1.0,
            delay_between_batches: std::time::Duration::from_millis(0),
            timeout_per_target: std::time::Duration::from_secs(60),
            max_retries: 3,
        }
    }
}

/// The client-supplied request that becomes a `BulkOperation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkOperationRequest {
    #[serde(rename = "type")]
    pub operation_type: BulkOperationType,
    pub command: String,
    pub targets: Vec<ServerName>,
    pub target_filter: Option<TargetFilter>,
    pub config: BulkTargetConfig,
    pub user_id: UserId,
    pub tenant_id: TenantId,
}

/// Per-target outcome within a `BulkOperation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetProgress {
    pub name: ServerName,
    pub status: TargetStatus,
    pub attempt: u32,
    pub exit_code: Option<i32>,
    pub stdout_snippet: Option<String>,
    pub stderr_snippet: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TargetProgress {
    pub fn pending(name: ServerName) -> Self {
        Self {
            name,
            status: TargetStatus::Pending,
            attempt: 0,
            exit_code: None,
            stdout_snippet: None,
            stderr_snippet: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Aggregate progress across all targets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkProgress {
    pub total: usize,
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub per_target: HashMap<String, TargetProgress>,
}

impl BulkProgress {
    /// Invariant: `completed + failed + skipped + cancelledTargets == total`.
    pub fn accounted_for(&self) -> bool {
        self.completed + self.failed + self.skipped + self.cancelled + self.pending == self.total
    }

    pub fn error_rate(&self) -> f64 {
        let denom = self.failed + self.completed;
        if denom == 0 {
            0.0
        } else {
            self.failed as f64 / denom as f64
        }
    }
}

/// One durable batch of per-target commands with shared progress and results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkOperation {
    pub id: Uuid,
    pub operation_type: BulkOperationType,
    pub command: String,
    pub status: BulkOperationStatus,
    pub targets: Vec<ServerName>,
    pub progress: BulkProgress,
    pub config: BulkTargetConfig,
    pub retry_count: u32,
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BulkOperation {
    pub fn new(req: BulkOperationRequest, targets: Vec<ServerName>) -> Self {
        let now = Utc::now();
        let mut per_target = HashMap::with_capacity(targets.len());
        for t in &targets {
            per_target.insert(t.0.clone(), TargetProgress::pending(t.clone()));
        }
        Self {
            id: Uuid::new_v4(),
            operation_type: req.operation_type,
            command: req.command,
            status: BulkOperationStatus::Pending,
            progress: BulkProgress {
                total: targets.len(),
                pending: targets.len(),
                completed: 0,
                failed: 0,
                skipped: 0,
                cancelled: 0,
                per_target,
            },
            targets,
            config: req.config,
            retry_count: 0,
            user_id: req.user_id,
            tenant_id: req.tenant_id,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Final-status decision table.
    pub fn compute_final_status(&self) -> BulkOperationStatus {
        if self.progress.cancelled > 0 {
            return BulkOperationStatus::Cancelled;
        }
        if self.progress.failed == 0 {
            BulkOperationStatus::Completed
        } else if self.progress.completed > 0 {
            BulkOperationStatus::PartialSuccess
        } else {
            BulkOperationStatus::Failed
        }
    }

    /// Retry eligibility: `status in {Failed, PartialSuccess}` and `retryCount < maxRetries`.
    pub fn can_retry(&self) -> bool {
        matches!(
            self.status,
            BulkOperationStatus::Failed | BulkOperationStatus::PartialSuccess
        ) && self.retry_count < self.config.max_retries
    }
}
