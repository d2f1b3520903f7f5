use portal_types::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("server is not OAuth-configured")]
    NotConfigured,

    #[error("authorization required: visit {authorize_url}")]
    AuthorizationRequired { authorize_url: String, state: String },

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: std::time::Duration },

    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("token store error: {0}")]
    TokenStore(#[from] portal_tokenstore::TokenStoreError),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("provider rejected request as a conflict: {0}")]
    ProviderConflict(String),

    #[error("provider rejected request as invalid: {0}")]
    ProviderInvalid(String),

    #[error("pool exhausted")]
    PoolExhausted,

    #[error("invalid redirect_uri: {0}")]
    InvalidRedirectUri(String),
}

impl OAuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OAuthError::NotConfigured => ErrorKind::Validation,
            OAuthError::AuthorizationRequired { .. } => ErrorKind::Unauthenticated,
            OAuthError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            OAuthError::RateLimited { .. } => ErrorKind::RateLimited,
            OAuthError::Transport(_) => ErrorKind::Unavailable,
            OAuthError::TokenStore(_) => ErrorKind::Unavailable,
            OAuthError::Forbidden(_) => ErrorKind::Authorization,
            OAuthError::ProviderUnavailable(_) => ErrorKind::Unavailable,
            OAuthError::ProviderConflict(_) => ErrorKind::Conflict,
            OAuthError::ProviderInvalid(_) => ErrorKind::Validation,
            OAuthError::PoolExhausted => ErrorKind::Unavailable,
            OAuthError::InvalidRedirectUri(_) => ErrorKind::Validation,
        }
    }
}

pub type OAuthResult<T> = Result<T, OAuthError>;
