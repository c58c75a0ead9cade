//! Error taxonomy shared by every render operation.

use std::time::Duration;

use thiserror::Error;

/// Error returned by engine, stream and pipeline operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// Null or malformed configuration, or an argument outside its domain.
    #[error("invalid argument: {0}")]
    InvalidArg(String),
    /// A buffer allocation could not be satisfied.
    #[error("out of memory: {0}")]
    NoMem(String),
    /// A thread or other system resource could not be created.
    #[error("no resource: {0}")]
    NoResource(String),
    /// The operation is not legal in the current lifecycle phase.
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// A downstream element or callback failed.
    #[error("operation failed: {0}")]
    Fail(String),
    /// A bounded wait expired.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl RenderError {
    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub(crate) fn invalid_arg(message: impl Into<String>) -> Self {
        Self::InvalidArg(message.into())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, RenderError>;
