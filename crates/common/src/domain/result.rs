use thiserror::Error;

pub type EtlResult<T> = Result<T, EtlError>;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Malformed notification: {0}")]
    MalformedNotification(String),

    #[error("Object not found: {container}/{key}")]
    ObjectNotFound { container: String, key: String },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Transient store error: {0}")]
    TransientStoreError(String),

    #[error("Write failure: {0}")]
    WriteFailure(String),

    #[error("Transient broker error: {0}")]
    TransientBrokerError(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cancelled while {0}")]
    Cancelled(&'static str),
}

impl EtlError {
    /// Whether redelivering the same notification could ever succeed.
    ///
    /// Only malformed notifications are dropped. A permanently missing object
    /// is still retryable and will be redelivered until it appears or the
    /// delivery substrate gives up.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, EtlError::MalformedNotification(_))
    }
}
