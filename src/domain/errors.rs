//! Domain errors for the maestro orchestrator.

use thiserror::Error;

/// Domain-level errors that can occur while driving the pipeline.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Design not found: {0}")]
    DesignNotFound(String),

    #[error("Pull request not found: {0}")]
    PrNotFound(i64),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Signature verification failed: {0}")]
    SignatureRejected(String),

    #[error("Integration not configured: {0}")]
    NotConfigured(&'static str),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("External call failed: {0}")]
    ExternalCallFailed(String),

    #[error("Agent run timed out after {0} ms")]
    AgentTimeout(u64),

    #[error("Workspace setup failed: {0}")]
    WorkspaceFailed(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for DomainError {
    fn from(err: reqwest::Error) -> Self {
        DomainError::ExternalCallFailed(err.to_string())
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::IoError(err.to_string())
    }
}
