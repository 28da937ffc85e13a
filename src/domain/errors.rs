//! Domain errors for the Nebulus swarm system.

use thiserror::Error;

/// Domain-level errors that can occur across the swarm.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Minion not found: {0}")]
    MinionNotFound(String),

    #[error("Issue not found: {repo}#{number}")]
    IssueNotFound { repo: String, number: u64 },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("LLM request failed: {0}")]
    LlmError(String),

    #[error("LLM pool: timed out waiting for slot")]
    PoolTimeout,

    #[error("Git operation failed: {0}")]
    GitError(String),

    #[error("Container operation failed: {0}")]
    ContainerError(String),

    #[error("GitHub API rate limited: {remaining} of {limit} remaining")]
    RateLimited { remaining: u64, limit: u64 },

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
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
        DomainError::ExecutionFailed(err.to_string())
    }
}
