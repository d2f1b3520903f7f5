use portal_types::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum EventFabricError {
    #[error("subscription {0} not found")]
    SubscriptionNotFound(uuid::Uuid),

    #[error("transport origin rejected: {0}")]
    OriginRejected(String),

    #[error("transport closed")]
    TransportClosed,
}

impl EventFabricError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EventFabricError::SubscriptionNotFound(_) => ErrorKind::Validation,
            EventFabricError::OriginRejected(_) => ErrorKind::Authorization,
            EventFabricError::TransportClosed => ErrorKind::Unavailable,
        }
    }
}

pub type EventFabricResult<T> = Result<T, EventFabricError>;
