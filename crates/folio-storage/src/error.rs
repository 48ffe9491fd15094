//! Storage error types for folio-storage.
//!
//! [`StorageError`] covers the failure modes of both backends: SQLite and
//! migration failures, JSON (de)serialization of record columns, missing
//! rows, integrity violations and misuse of the transaction API.

use thiserror::Error;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An underlying SQLite call failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Applying schema migrations failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// JSON serialization or deserialization of a record column failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A row that must exist was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A data integrity violation was detected (duplicate path, dangling
    /// content reference, unparseable id column).
    #[error("integrity error: {reason}")]
    IntegrityError { reason: String },

    /// `begin`/`commit`/`rollback` called out of order.
    #[error("transaction error: {reason}")]
    Transaction { reason: String },
}

impl StorageError {
    pub(crate) fn integrity(reason: impl Into<String>) -> Self {
        StorageError::IntegrityError {
            reason: reason.into(),
        }
    }
}
