use portal_types::ErrorKind;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("command {0:?} is not in the allowed enumeration")]
    InvalidCommand(String),

    #[error("argument rejected: {0}")]
    UnsafeArgument(String),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to spawn subprocess: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("internal executor error: {0}")]
    Internal(String),
}

impl ExecutorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutorError::InvalidCommand(_) => ErrorKind::Validation,
            ExecutorError::UnsafeArgument(_) => ErrorKind::Validation,
            ExecutorError::RateLimited { .. } => ErrorKind::RateLimited,
            ExecutorError::Timeout(_) => ErrorKind::Timeout,
            ExecutorError::Spawn(_) => ErrorKind::Unavailable,
            ExecutorError::Internal(_) => ErrorKind::Internal,
        }
    }
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
