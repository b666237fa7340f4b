//! Error types for the memory subsystem.

use ctxvault_state::StorageError;

/// Errors produced by memory operations.
///
/// Budget rejection is not an error: see [`super::store::InsertOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("persistence failed: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid entry: {0}")]
    InvalidEntry(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Task(String),
}

impl MemoryError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MemoryError::Storage(StorageError::Backend(_)))
    }
}

/// Result type for memory operations.
pub type MemoryResult<T> = std::result::Result<T, MemoryError>;
