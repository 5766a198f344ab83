//! Error types for platform adapters.

use thiserror::Error;

/// Result type alias for platform adapter operations.
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Errors surfaced by the volume, DNS and host adapters.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("resource exhausted: {0}")]
    Exhausted(String),

    #[error("platform error: {0}")]
    Internal(String),
}
