use bazaar_shared::ProtocolError;
use bazaar_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    #[error("Not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Connection error: {0}")]
    Transient(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Whether the connection has to be dropped. Everything else becomes the
    /// request's failure indicator.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ServerError::Transient(_))
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ServerError::NotFound,
            StoreError::AlreadyExists => ServerError::Conflict(err.to_string()),
            StoreError::InsufficientStock { .. } | StoreError::IllegalTransition { .. } => {
                ServerError::Conflict(err.to_string())
            }
            StoreError::Forbidden(reason) => ServerError::Forbidden(reason),
            StoreError::Invalid(reason) => {
                ServerError::Protocol(ProtocolError::Malformed(reason))
            }
            other => ServerError::Internal(other.to_string()),
        }
    }
}
