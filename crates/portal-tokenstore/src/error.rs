use portal_types::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    #[error("token not found")]
    NotFound,

    #[error("no storage tier accepted the write")]
    StorageUnavailable,

    #[error("tier unavailable: {0}")]
    TierUnavailable(String),

    #[error("authorization failed against tier: {0}")]
    Authorization(String),

    #[error("encryption failure: {0}")]
    Crypto(String),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TokenStoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TokenStoreError::NotFound => ErrorKind::Validation,
            TokenStoreError::StorageUnavailable => ErrorKind::Unavailable,
            TokenStoreError::TierUnavailable(_) => ErrorKind::Unavailable,
            TokenStoreError::Authorization(_) => ErrorKind::Authorization,
            TokenStoreError::Crypto(_) => ErrorKind::Internal,
            TokenStoreError::Serialization(_) => ErrorKind::Internal,
        }
    }
}

pub type TokenStoreResult<T> = Result<T, TokenStoreError>;
