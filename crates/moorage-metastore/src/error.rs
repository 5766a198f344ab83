//! Error taxonomy of the metadata store.
//!
//! The four application errors cross the wire as gRPC status code
//! `Unknown` carrying one of the stable description strings below, and are
//! never retried by the client. `Transport` never crosses the wire: the
//! client produces it locally once its retry envelope is exhausted.

use thiserror::Error;

/// Result type alias for metadata store operations.
pub type DbResult<T> = Result<T, DbError>;

/// Wire description of [`DbError::Internal`].
pub const STR_DB_INTERNAL: &str = "db internal error";
/// Wire description of [`DbError::InvalidRequest`].
pub const STR_DB_INVALID_REQUEST: &str = "db invalid request";
/// Wire description of [`DbError::RecordNotFound`].
pub const STR_DB_RECORD_NOT_FOUND: &str = "db record not found";
/// Wire description of [`DbError::ConditionalCheckFailed`].
pub const STR_DB_CONDITIONAL_CHECK_FAILED: &str = "db conditional check failed";

/// Errors surfaced by the metadata store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DbError {
    /// Unexpected server-side failure. Not retried.
    #[error("{}", STR_DB_INTERNAL)]
    Internal,

    /// The caller violated input constraints. Not retried.
    #[error("{}", STR_DB_INVALID_REQUEST)]
    InvalidRequest,

    /// A read found nothing where a record was expected.
    #[error("{}", STR_DB_RECORD_NOT_FOUND)]
    RecordNotFound,

    /// A conditional create or update lost against the stored value.
    #[error("{}", STR_DB_CONDITIONAL_CHECK_FAILED)]
    ConditionalCheckFailed,

    /// Connection or stream failure that survived the retry envelope.
    #[error("transport error: {0}")]
    Transport(String),
}

impl DbError {
    /// The stable description string carried in the gRPC status.
    ///
    /// Only application errors have a wire form; `Transport` maps to
    /// `Internal` should it ever be asked for one.
    pub fn wire_message(&self) -> &'static str {
        match self {
            DbError::Internal | DbError::Transport(_) => STR_DB_INTERNAL,
            DbError::InvalidRequest => STR_DB_INVALID_REQUEST,
            DbError::RecordNotFound => STR_DB_RECORD_NOT_FOUND,
            DbError::ConditionalCheckFailed => STR_DB_CONDITIONAL_CHECK_FAILED,
        }
    }

    /// Translate a wire description back into an error.
    ///
    /// Unrecognised descriptions collapse to `Internal`: the server said
    /// something application-level that this client does not understand,
    /// which is not a condition a retry can fix.
    pub fn from_wire_message(desc: &str) -> DbError {
        match desc {
            STR_DB_INVALID_REQUEST => DbError::InvalidRequest,
            STR_DB_RECORD_NOT_FOUND => DbError::RecordNotFound,
            STR_DB_CONDITIONAL_CHECK_FAILED => DbError::ConditionalCheckFailed,
            _ => DbError::Internal,
        }
    }
}
