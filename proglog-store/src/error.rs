//! Store error types.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("offset {offset} is not the start of a frame (store size {size})")]
    OutOfRange { offset: u64, size: u64 },

    #[error("corrupt frame at offset {offset}: needs {declared} bytes, {available} available")]
    CorruptFrame {
        offset: u64,
        declared: u64,
        available: u64,
    },

    #[error("store is closed")]
    Closed,

    #[error("store is unusable: a failed write could not be rolled back to offset {offset}")]
    Poisoned { offset: u64 },

    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Io(_))
    }
}
