//! Store error types.

use thiserror::Error;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON (de)serialization failure for a stored value.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// A config row holds a value that cannot be parsed.
    #[error("invalid config value for {key}: {value:?}")]
    InvalidConfig { key: String, value: String },
}

/// Store result type.
pub type Result<T> = std::result::Result<T, StoreError>;
