use thiserror::Error;
use uuid::Uuid;

/// Core error type for CASK operations.
#[derive(Error, Debug)]
pub enum CaskError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// The queue could not be reached. Producers may retry.
    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    /// No handler exists for the job type. Never retried.
    #[error("No handler registered for job type '{0}'")]
    UnregisteredHandler(String),

    #[error("Handler execution failed: {0}")]
    HandlerExecution(String),

    #[error("Duplicate registration: {0}")]
    DuplicateRegistration(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Lease {0} expired or is unknown")]
    LeaseExpired(Uuid),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CaskError {
    /// Whether the operation may succeed if retried later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::QueueUnavailable(_) | Self::Database(_))
    }

    /// Whether this error must abort process startup.
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::DuplicateRegistration(_) | Self::InvalidSchedule(_)
        )
    }
}

impl From<serde_json::Error> for CaskError {
    fn from(e: serde_json::Error) -> Self {
        CaskError::Serialization(e.to_string())
    }
}

/// Result type alias using CaskError.
pub type Result<T> = std::result::Result<T, CaskError>;
