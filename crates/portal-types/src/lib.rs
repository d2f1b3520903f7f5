//! Shared data model for the MCP management portal core.
//!
//! This crate is the single source of truth for the types every other
//! `portal-*` crate exchanges: server state, bulk operations, tokens,
//! events, feature flags, and the error taxonomy of 

pub mod audit;
pub mod bulk;
pub mod error;
pub mod event;
pub mod flag;
pub mod ids;
pub mod retry;
pub mod server;
pub mod token;

pub use audit::{AuditEvent, AuditOutcome, AuditSink};
pub use bulk::{
    BulkOperation, BulkOperationRequest, BulkOperationType, BulkOperationStatus, BulkProgress,
    BulkTargetConfig, TargetFilter, TargetProgress, TargetStatus,
};
pub use error::{ErrorKind, PortalError, PortalResult};
pub use event::{Channel, Event, EventFilter, EventType, Subscription};
pub use flag::{FeatureFlag, FlagContext, FlagRule, FlagType, FlagValue};
pub use ids::{ServerName, TenantId, UserId};
pub use retry::RetryPolicy;
pub use server::{
    ContainerState, HealthCheckResult, HealthStatus, ServerConfig, ServerState, ServerStatus,
    Transport,
};
pub use token::{StorageTier, TokenData};
