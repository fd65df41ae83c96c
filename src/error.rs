//! Error types for query layer operations
//!
//! This module defines the error type shared by the request deduplicator,
//! the normalized entity store and the query client.

use thiserror::Error;

/// Main error type for query layer operations
///
/// `Clone` so that one failed fetch can be handed to every caller joined on
/// the same request key.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Backend fetch or mutation failed
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Entity passed to normalization is malformed
    #[error("Invalid entity for collection '{collection}': {reason}")]
    InvalidEntity { collection: String, reason: String },

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Fetch did not settle in time
    #[error("Request '{key}' timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64, key: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for query layer operations
pub type Result<T> = std::result::Result<T, QueryError>;

impl From<serde_json::Error> for QueryError {
    fn from(e: serde_json::Error) -> Self {
        QueryError::Serialization(e.to_string())
    }
}

impl From<String> for QueryError {
    fn from(s: String) -> Self {
        QueryError::Other(s)
    }
}

impl From<&str> for QueryError {
    fn from(s: &str) -> Self {
        QueryError::Other(s.to_string())
    }
}
