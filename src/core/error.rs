//! Governance error types

use thiserror::Error;

/// Errors that can occur inside the governance engine
///
/// None of these reach callers of the decision surface
/// (`PermissionManager::check` and friends); they are logged there and the
/// engine falls back to its in-memory state.
#[derive(Error, Debug)]
pub enum GovernanceError {
    /// IO error while reading or writing the permission store
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A rule pattern that does not compile
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// A string that does not name a known enum value
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Tracing subscriber could not be installed
    #[error("Logging setup failed: {0}")]
    Logging(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl GovernanceError {
    /// Create a generic error from a string
    pub fn other(msg: impl Into<String>) -> Self {
        GovernanceError::Other(msg.into())
    }

    /// Create an invalid value error
    pub fn invalid_value(msg: impl Into<String>) -> Self {
        GovernanceError::InvalidValue(msg.into())
    }
}

/// Result type alias for governance operations
pub type GovernanceResult<T> = Result<T, GovernanceError>;
