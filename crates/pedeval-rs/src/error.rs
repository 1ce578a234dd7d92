//! Error types for pedeval-rs.

use thiserror::Error;

use crate::params::IouType;

/// Result type for evaluation operations.
pub type Result<T> = std::result::Result<T, EvalError>;

/// Errors raised while loading records or running an evaluation.
#[derive(Error, Debug)]
pub enum EvalError {
    /// Error during JSON parsing.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error during I/O operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configured evaluation mode has no box geometry.
    #[error("unsupported iou type {0:?}: only bbox evaluation is implemented")]
    UnsupportedIouType(IouType),

    /// A configuration value failed validation.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// A ground-truth or detection record is malformed.
    #[error("invalid annotation: {0}")]
    InvalidAnnotation(String),

    /// A shard worker panicked before finishing its range.
    #[error("worker {0} failed before finishing its shard")]
    WorkerFailed(usize),

    /// The collector saw fewer messages than images dispatched.
    #[error("sharded evaluation incomplete: expected {expected} messages, received {received}")]
    IncompleteShards { expected: usize, received: usize },
}
