//! Error types for the agent kernel.

use thiserror::Error;

/// Kernel error types.
///
/// External boundary failures (`PageDriver`, `ModelClient`) travel as
/// classified `ErrorKind`s inside `ActionResult`s; this enum covers the
/// kernel's own failure modes (parsing, storage, configuration).
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("model error: {0}")]
    Model(String),

    #[error("driver error: {0}")]
    Driver(String),

    #[error("tool error: {0}")]
    Tool(String),

    #[error("invalid response format: {0}")]
    InvalidFormat(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for kernel operations.
pub type Result<T> = std::result::Result<T, AgentError>;
