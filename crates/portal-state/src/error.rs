use portal_types::{ErrorKind, ServerStatus};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("server {0} is not known to the state manager")]
    UnknownServer(String),

    #[error("illegal transition {from:?} -> {to:?}")]
    IllegalTransition { from: ServerStatus, to: ServerStatus },
}

impl StateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StateError::UnknownServer(_) => ErrorKind::Validation,
            StateError::IllegalTransition { .. } => ErrorKind::IllegalTransition,
        }
    }
}

pub type StateResult<T> = Result<T, StateError>;
