//! Core error types for folio-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering the
//! failure modes of the pure domain model (path and name validation).

use thiserror::Error;

/// Core errors produced by the folio-core crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A path segment uses a reserved or malformed name.
    #[error("invalid resource name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// A path is not a well-formed absolute repository path.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
}
