use portal_types::ErrorKind;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum BulkError {
    #[error("operation has no targets after resolution")]
    NoTargets,

    #[error("unknown bulk operation {0}")]
    UnknownOperation(Uuid),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("operation {0} is not retryable in its current state")]
    NotRetryable(Uuid),

    #[error("durable store unavailable: {0}")]
    StoreUnavailable(String),
}

impl BulkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BulkError::NoTargets => ErrorKind::Validation,
            BulkError::UnknownOperation(_) => ErrorKind::Validation,
            BulkError::InvalidRequest(_) => ErrorKind::Validation,
            BulkError::NotRetryable(_) => ErrorKind::Conflict,
            BulkError::StoreUnavailable(_) => ErrorKind::Unavailable,
        }
    }
}

pub type BulkResult<T> = Result<T, BulkError>;
