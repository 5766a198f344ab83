//! Error types for the management core.

use thiserror::Error;

use moorage_metastore::DbError;
use moorage_platform::PlatformError;

/// Result type alias for management operations.
pub type ManageResult<T> = Result<T, ManageError>;

/// Errors surfaced by the management core.
///
/// Store and platform errors pass through transparently so callers can
/// match on the underlying kind (`RecordNotFound`,
/// `ConditionalCheckFailed`, …).
#[derive(Debug, Error)]
pub enum ManageError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ManageError {
    /// Whether this error is the store's conditional-check failure.
    pub fn is_conditional_check_failed(&self) -> bool {
        matches!(self, ManageError::Db(DbError::ConditionalCheckFailed))
    }

    /// Whether this error is the store's record-not-found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ManageError::Db(DbError::RecordNotFound))
    }
}
