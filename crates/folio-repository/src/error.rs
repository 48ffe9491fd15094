//! Repository error taxonomy.
//!
//! [`RepositoryError`] is the single error type of the public API. Lower
//! layers convert into it through `From` impls that place each failure in
//! one of the caller-facing kinds; [`RepositoryError::kind`] exposes the
//! machine-readable code.

use std::fmt;

use folio_core::CoreError;
use folio_storage::StorageError;

use crate::concurrency::LockError;

/// Errors returned by repository operations.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// A write was attempted without holding the needed lock.
    #[error("lock required: {0}")]
    LockRequired(String),

    /// Another user (or a running publish) holds the lock.
    #[error("lock conflict: {0}")]
    LockConflict(String),

    /// The caller may not perform the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A live resource already occupies the path.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A path, id or historical version does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A direct publish was rejected because an ancestor folder is still new.
    #[error("parent not published: {0}")]
    ParentNotPublished(String),

    /// A path segment or property name is malformed.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// The operation would violate a structural invariant.
    #[error("data consistency: {0}")]
    DataConsistency(String),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    LockRequired,
    LockConflict,
    PermissionDenied,
    AlreadyExists,
    NotFound,
    ParentNotPublished,
    InvalidName,
    DataConsistency,
    Storage,
    Internal,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::LockRequired => "LOCK_REQUIRED",
            ErrorKind::LockConflict => "LOCK_CONFLICT",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::AlreadyExists => "ALREADY_EXISTS",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::ParentNotPublished => "PARENT_NOT_PUBLISHED",
            ErrorKind::InvalidName => "INVALID_NAME",
            ErrorKind::DataConsistency => "DATA_CONSISTENCY",
            ErrorKind::Storage => "STORAGE_ERROR",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl RepositoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RepositoryError::LockRequired(_) => ErrorKind::LockRequired,
            RepositoryError::LockConflict(_) => ErrorKind::LockConflict,
            RepositoryError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            RepositoryError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            RepositoryError::NotFound(_) => ErrorKind::NotFound,
            RepositoryError::ParentNotPublished(_) => ErrorKind::ParentNotPublished,
            RepositoryError::InvalidName(_) => ErrorKind::InvalidName,
            RepositoryError::DataConsistency(_) => ErrorKind::DataConsistency,
            RepositoryError::Storage(_) => ErrorKind::Storage,
            RepositoryError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn not_found(what: impl fmt::Display) -> Self {
        RepositoryError::NotFound(what.to_string())
    }
}

impl From<CoreError> for RepositoryError {
    fn from(err: CoreError) -> Self {
        match &err {
            CoreError::InvalidName { .. } | CoreError::InvalidPath { .. } => {
                RepositoryError::InvalidName(err.to_string())
            }
        }
    }
}

impl From<StorageError> for RepositoryError {
    fn from(err: StorageError) -> Self {
        match &err {
            StorageError::NotFound { .. } => RepositoryError::NotFound(err.to_string()),
            StorageError::IntegrityError { .. } => {
                RepositoryError::DataConsistency(err.to_string())
            }
            _ => RepositoryError::Storage(err),
        }
    }
}

impl From<LockError> for RepositoryError {
    fn from(err: LockError) -> Self {
        match &err {
            LockError::NotHeld { .. } => RepositoryError::LockRequired(err.to_string()),
            LockError::Conflict { .. }
            | LockError::Publishing { .. }
            | LockError::Inherited { .. } => RepositoryError::LockConflict(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::UserId;

    #[test]
    fn test_kind_codes() {
        let err = RepositoryError::ParentNotPublished("/a/".into());
        assert_eq!(err.kind().code(), "PARENT_NOT_PUBLISHED");
    }

    #[test]
    fn test_lock_errors_map_to_taxonomy() {
        let err: RepositoryError = LockError::NotHeld { path: "/x".into() }.into();
        assert_eq!(err.kind(), ErrorKind::LockRequired);
        let err: RepositoryError = LockError::Conflict {
            path: "/x".into(),
            owner: UserId::new(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::LockConflict);
    }

    #[test]
    fn test_storage_integrity_is_data_consistency() {
        let err: RepositoryError = StorageError::IntegrityError {
            reason: "dup".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::DataConsistency);
    }
}
