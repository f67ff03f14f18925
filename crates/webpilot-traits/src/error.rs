//! Boundary error type raised by external capabilities.
//!
//! Browser backends and model runtimes report failures as loosely
//! structured strings plus, sometimes, an HTTP-like status. The kernel's
//! reliability classifier is the only component that inspects these; inside
//! the kernel every failure travels as a typed `ErrorKind`.

use std::time::Duration;

use thiserror::Error;

/// Error surfaced by a `PageDriver` or `ModelClient` call.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ExternalError {
    pub message: String,
    /// HTTP-like status when the underlying transport had one.
    pub status: Option<u16>,
}

impl ExternalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Timeout error in the canonical phrasing the classifier recognizes.
    pub fn timeout(operation: &str, after: Duration) -> Self {
        Self::new(format!("{operation} timed out after {after:?}"))
    }
}

pub type ExternalResult<T> = std::result::Result<T, ExternalError>;
