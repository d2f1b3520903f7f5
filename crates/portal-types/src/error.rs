//! Error taxonomy.
//!
//! Every `portal-*` crate defines its own `thiserror`-derived error type
//! for the failures it can produce, but every variant maps to one of the
//! `ErrorKind`s here so the REST layer can translate kind -> HTTP status
//! without string-matching messages.

use std::time::Duration;

/// The error *kind*, independent of which component raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Inputs violate a stated contract. Never retried.
    Validation,
    /// Caller lacks permission. Never retried.
    Authorization,
    /// Missing/expired credentials. One automatic refresh+retry for OAuth-mediated calls.
    Unauthenticated,
    /// Caller exceeded a rate limit; carries `retry_after`.
    RateLimited,
    /// Deadline exceeded.
    Timeout,
    /// Downstream (provider, store, cache) unreachable.
    Unavailable,
    /// State machine or optimistic-concurrency violation. Never retried silently.
    IllegalTransition,
    /// Conflict not covered by a state-machine edge (e.g. duplicate registration).
    Conflict,
    /// Invariant violation; logged with full context, surfaced as opaque internal error.
    Internal,
}

impl ErrorKind {
    /// Whether an interceptor/engine is permitted to retry an error of this kind
    /// without additional policy input. `RateLimited`/`Timeout` are retryable
    /// subject to backoff policy, everything else is not.
    pub fn is_retryable_candidate(self) -> bool {
        matches!(self, ErrorKind::RateLimited | ErrorKind::Timeout | ErrorKind::Unavailable)
    }
}

/// Portal-wide error, used directly by crates that have no component-specific
/// failure modes of their own (e.g. `portal-types`, `portal-flags`) and as the
/// common currency other crates' errors convert into at their public boundary.
#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("access denied: {0}")]
    Authorization(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("downstream unavailable: {0}")]
    Unavailable(String),

    #[error("illegal state transition: {0}")]
    IllegalTransition(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PortalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PortalError::Validation(_) => ErrorKind::Validation,
            PortalError::Authorization(_) => ErrorKind::Authorization,
            PortalError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            PortalError::RateLimited { .. } => ErrorKind::RateLimited,
            PortalError::Timeout(_) => ErrorKind::Timeout,
            PortalError::Unavailable(_) => ErrorKind::Unavailable,
            PortalError::IllegalTransition(_) => ErrorKind::IllegalTransition,
            PortalError::Conflict(_) => ErrorKind::Conflict,
            PortalError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type PortalResult<T> = Result<T, PortalError>;
