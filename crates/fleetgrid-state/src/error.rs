//! Error types for the registry store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    /// A row with the same key already exists.
    #[error("already exists: {0}")]
    Conflict(String),

    /// A key segment is empty or contains the key separator.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A row refers to a parent row that does not exist.
    #[error("missing reference: {0}")]
    MissingReference(String),
}
