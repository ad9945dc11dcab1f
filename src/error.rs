//! Error handling module
//!
//! Provides unified error types and exit-code mapping for the entire
//! application.

use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum CarveError {
    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Read-only enforcement failed: {0}")]
    ReadOnlyEnforcement(String),

    #[error("Introspection failed: {0}")]
    Introspection(String),

    #[error("Table not found: {0}")]
    SchemaNotFound(String),

    #[error("Invalid timeframe filter: {0}")]
    InvalidFilter(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Dangling reference: {0}")]
    DanglingReference(String),

    #[error("Dependency cycle: {0}")]
    CycleDetected(String),

    #[error("Output error: {0}")]
    Output(#[from] std::io::Error),

    #[error("Cancelled")]
    Cancelled,

    #[error("Cache error: {0}")]
    Cache(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<tokio_postgres::Error> for CarveError {
    fn from(e: tokio_postgres::Error) -> Self {
        CarveError::Fetch(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for CarveError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        CarveError::Connection(e.to_string())
    }
}

impl CarveError {
    /// Map an error to the process exit code documented in the README.
    ///
    /// 0 success, 1 runtime failure, 2 usage error, 3 integrity failure,
    /// 4 cancelled.
    pub fn exit_code(&self) -> i32 {
        match self {
            CarveError::Usage(_) | CarveError::SchemaNotFound(_) | CarveError::InvalidFilter(_) => 2,
            CarveError::DanglingReference(_) | CarveError::CycleDetected(_) => 3,
            CarveError::Cancelled => 4,
            _ => 1,
        }
    }
}

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, CarveError>;

/// Helper function to create a usage error
pub fn usage_error(msg: impl Into<String>) -> CarveError {
    CarveError::Usage(msg.into())
}
