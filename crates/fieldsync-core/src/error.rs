//! Error types for fieldsync-core

use thiserror::Error;

use crate::sync::RemoteError;

/// Result type alias using fieldsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fieldsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record or operation not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local storage could not durably register a change
    #[error("Storage error: {0}")]
    Storage(String),

    /// Remote replica error
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// A resolution decision referenced a conflict that is not open
    #[error("No open conflict for {0}")]
    UnknownConflict(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}
